use thiserror::Error;

/// I/O errors that can occur when reading from a storage backend.
///
/// A missing key is *not* an error: stores report it as `Ok(None)` so that
/// absent Zarr chunks can be treated as fill value by the read path.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Local filesystem error other than not-found/unreadable
    #[error("I/O error: {0}")]
    Io(String),

    /// HTTP response with an unexpected status
    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Io(e.to_string())
    }
}

/// Errors raised while resolving an NGFF root or decoding Zarr data.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// Unknown scheme, missing `.zarr` segment, or user-info in an S3 URI
    #[error("Invalid NGFF URI: {0}")]
    InvalidUri(String),

    /// Ambient AWS credentials detected in the process environment
    #[error("Invalid credentials configuration: {0}")]
    InvalidCredentials(String),

    /// Missing or malformed `multiscales` metadata
    #[error("Invalid multiscales metadata: {0}")]
    InvalidMultiscales(String),

    /// Array element type outside the supported set
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Chunk compressor outside the supported set
    #[error("Unsupported compressor: {0}")]
    UnsupportedCompressor(String),

    /// Malformed `.zarray`/`.zattrs` document
    #[error("Invalid Zarr metadata: {0}")]
    InvalidMetadata(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Hyperslab request does not fit the array
    #[error("Invalid read shape: {0}")]
    InvalidShape(String),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors surfaced by the pixel buffer region-read API.
#[derive(Debug, Clone, Error)]
pub enum BufferError {
    /// A request coordinate or tile corner is outside the image
    #[error("Dimensions out of bounds: {0}")]
    DimensionsOutOfBounds(String),

    /// Requested plane area exceeds the configured maximum
    #[error("Requested shape {shape:?} > max plane size {max_width} * {max_height}")]
    RequestTooLarge {
        shape: Vec<u64>,
        max_width: u32,
        max_height: u32,
    },

    /// Public resolution level outside `[0, levels)`
    #[error("Resolution level {level} out of bounds ({levels} levels)")]
    ResolutionOutOfRange { level: u32, levels: u32 },

    /// Operation the Zarr pixel buffer does not provide
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl From<IoError> for BufferError {
    fn from(e: IoError) -> Self {
        BufferError::Format(FormatError::Io(e))
    }
}
