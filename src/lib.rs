//! NGFF Pixel Buffer - a read-only region engine for OME-NGFF Zarr images
//!
//! This library serves bounded rectangular regions (tiles, rows, columns,
//! planes, stacks, timepoints) from multiscale OME-NGFF (Zarr v2) images
//! stored on the local filesystem, behind HTTP, or in S3-compatible object
//! storage. Callers work in a canonical (X,Y,Z,C,T) coordinate system; the
//! engine handles axis permutation, resolution pyramids, Z-downsampled
//! levels, sparse chunks, and byte-order normalization to big-endian.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod error;
pub mod multiscale;
pub mod service;
pub mod store;
pub mod zarr;

// Re-export commonly used types
pub use buffer::{ArrayCache, MetadataCache, PixelsShape, ZarrPixelBuffer};
pub use cache::AsyncLruCache;
pub use config::EngineConfig;
pub use error::{BufferError, FormatError, IoError};
pub use multiscale::{Axis, AxisMap, Multiscales};
pub use service::PixelBufferService;
pub use store::{parse_root_uri, FilesystemStore, HttpStore, ObjectStore, S3Options, S3Store, StoreHandle};
pub use zarr::{ArrayMetadata, Endianness, PixelType, ZarrArray};
