//! Zarr v2 array metadata (`.zarray`) and the supported pixel types.

use serde::Deserialize;

use crate::error::FormatError;

/// Supported array element types.
///
/// Maps the Zarr v2 dtype codes `i1,u1,i2,u2,i4,u4,f4,f8` onto the canonical
/// pixel types. 64-bit integers are deliberately unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float,
    Double,
}

impl PixelType {
    /// Size of one element in bytes.
    pub fn byte_width(self) -> usize {
        match self {
            PixelType::Int8 | PixelType::UInt8 => 1,
            PixelType::Int16 | PixelType::UInt16 => 2,
            PixelType::Int32 | PixelType::UInt32 | PixelType::Float => 4,
            PixelType::Double => 8,
        }
    }

    /// Whether the type is a signed integer or floating point type.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PixelType::Int8
                | PixelType::Int16
                | PixelType::Int32
                | PixelType::Float
                | PixelType::Double
        )
    }

    /// Whether the type is floating point.
    pub fn is_float(self) -> bool {
        matches!(self, PixelType::Float | PixelType::Double)
    }

    /// Canonical lower-case name (`uint16`, `float`, ...).
    pub fn name(self) -> &'static str {
        match self {
            PixelType::Int8 => "int8",
            PixelType::UInt8 => "uint8",
            PixelType::Int16 => "int16",
            PixelType::UInt16 => "uint16",
            PixelType::Int32 => "int32",
            PixelType::UInt32 => "uint32",
            PixelType::Float => "float",
            PixelType::Double => "double",
        }
    }
}

/// Byte order of on-disk multi-byte elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Parse a v2 dtype string (`"<u2"`, `">f8"`, `"|i1"`, ...) into a pixel
/// type and its on-disk endianness.
///
/// Single-byte types carry no byte order and report [`Endianness::Big`] so
/// the read path never swaps them.
pub fn parse_dtype(dtype: &str) -> Result<(PixelType, Endianness), FormatError> {
    let mut chars = dtype.chars();
    let (endianness, code) = match chars.next() {
        Some('<') => (Endianness::Little, chars.as_str()),
        Some('>') => (Endianness::Big, chars.as_str()),
        Some('|') => (Endianness::Big, chars.as_str()),
        _ => {
            return Err(FormatError::UnsupportedDataType(dtype.to_string()));
        }
    };
    let pixel_type = match code {
        "i1" => PixelType::Int8,
        "u1" => PixelType::UInt8,
        "i2" => PixelType::Int16,
        "u2" => PixelType::UInt16,
        "i4" => PixelType::Int32,
        "u4" => PixelType::UInt32,
        "f4" => PixelType::Float,
        "f8" => PixelType::Double,
        // i8/u8 are 64-bit integers, outside the supported set.
        _ => return Err(FormatError::UnsupportedDataType(dtype.to_string())),
    };
    Ok((pixel_type, endianness))
}

/// Chunk compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    /// `compressor: null` — chunks are stored raw.
    Raw,
    /// zlib (RFC 1950) streams.
    Zlib,
    /// gzip (RFC 1952) streams.
    Gzip,
}

/// Separator between chunk indices in chunk keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSeparator {
    Dot,
    Slash,
}

impl DimensionSeparator {
    pub fn as_char(self) -> char {
        match self {
            DimensionSeparator::Dot => '.',
            DimensionSeparator::Slash => '/',
        }
    }
}

/// The raw `.zarray` document.
#[derive(Debug, Clone, Deserialize)]
struct ArrayMetadataDoc {
    zarr_format: u64,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    dtype: String,
    compressor: Option<serde_json::Value>,
    #[serde(default)]
    filters: Option<Vec<serde_json::Value>>,
    order: String,
    #[serde(default)]
    dimension_separator: Option<String>,
    // fill_value is accepted but unused: this engine always fills with zero,
    // which is what the NGFF exports it serves actually write.
    #[serde(default, rename = "fill_value")]
    _fill_value: serde_json::Value,
}

/// Validated Zarr v2 array metadata.
#[derive(Debug, Clone)]
pub struct ArrayMetadata {
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub pixel_type: PixelType,
    pub endianness: Endianness,
    pub compressor: Compressor,
    pub dimension_separator: DimensionSeparator,
}

impl ArrayMetadata {
    /// Parse and validate a `.zarray` document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, FormatError> {
        let doc: ArrayMetadataDoc = serde_json::from_slice(bytes)
            .map_err(|e| FormatError::InvalidMetadata(format!(".zarray: {}", e)))?;

        if doc.zarr_format != 2 {
            return Err(FormatError::InvalidMetadata(format!(
                "unsupported zarr_format: {}",
                doc.zarr_format
            )));
        }
        if doc.shape.is_empty() || doc.shape.len() != doc.chunks.len() {
            return Err(FormatError::InvalidMetadata(format!(
                "shape {:?} and chunks {:?} must be non-empty and of equal rank",
                doc.shape, doc.chunks
            )));
        }
        if doc.shape.iter().any(|&n| n == 0) || doc.chunks.iter().any(|&n| n == 0) {
            return Err(FormatError::InvalidMetadata(
                "zero-length dimension".to_string(),
            ));
        }
        if doc.order != "C" {
            return Err(FormatError::InvalidMetadata(format!(
                "unsupported chunk memory order: {}",
                doc.order
            )));
        }
        if let Some(filters) = &doc.filters {
            if !filters.is_empty() {
                return Err(FormatError::UnsupportedCompressor(
                    "filter chains are not supported".to_string(),
                ));
            }
        }

        let (pixel_type, endianness) = parse_dtype(&doc.dtype)?;
        let compressor = parse_compressor(doc.compressor.as_ref())?;
        let dimension_separator = match doc.dimension_separator.as_deref() {
            None | Some(".") => DimensionSeparator::Dot,
            Some("/") => DimensionSeparator::Slash,
            Some(other) => {
                return Err(FormatError::InvalidMetadata(format!(
                    "unsupported dimension_separator: {}",
                    other
                )));
            }
        };

        Ok(Self {
            shape: doc.shape,
            chunks: doc.chunks,
            pixel_type,
            endianness,
            compressor,
            dimension_separator,
        })
    }

    /// Number of elements in one chunk.
    pub fn chunk_len(&self) -> u64 {
        self.chunks.iter().product()
    }
}

fn parse_compressor(value: Option<&serde_json::Value>) -> Result<Compressor, FormatError> {
    let Some(value) = value else {
        return Ok(Compressor::Raw);
    };
    if value.is_null() {
        return Ok(Compressor::Raw);
    }
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FormatError::InvalidMetadata("compressor without id".to_string()))?;
    match id {
        "zlib" => Ok(Compressor::Zlib),
        "gzip" => Ok(Compressor::Gzip),
        other => Err(FormatError::UnsupportedCompressor(other.to_string())),
    }
}
