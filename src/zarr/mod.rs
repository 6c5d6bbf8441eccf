//! Zarr v2 format layer: metadata documents, group attributes, and the
//! chunked-array read path.

pub mod array;
pub mod group;
pub mod metadata;

pub use array::ZarrArray;
pub use group::{open_array, read_attributes};
pub use metadata::{ArrayMetadata, Compressor, Endianness, PixelType};
