//! Chunked-array read path.

use std::io::Read;

use tracing::trace;

use super::metadata::{ArrayMetadata, Compressor, Endianness, PixelType};
use crate::error::FormatError;
use crate::store::StoreHandle;

/// A read-only Zarr v2 array.
///
/// Holds the store handle of the array directory and its validated
/// `.zarray` metadata. Reads assemble axis-aligned hyperslabs from the
/// underlying chunk blobs and always emit big-endian bytes, whatever the
/// on-disk byte order.
#[derive(Debug)]
pub struct ZarrArray {
    handle: StoreHandle,
    metadata: ArrayMetadata,
}

impl ZarrArray {
    pub(crate) fn new(handle: StoreHandle, metadata: ArrayMetadata) -> Self {
        Self { handle, metadata }
    }

    /// The array shape (length per dimension).
    pub fn shape(&self) -> &[u64] {
        &self.metadata.shape
    }

    /// The chunk shape (length per dimension).
    pub fn chunks(&self) -> &[u64] {
        &self.metadata.chunks
    }

    /// The element type.
    pub fn pixel_type(&self) -> PixelType {
        self.metadata.pixel_type
    }

    /// Size of one element in bytes.
    pub fn byte_width(&self) -> usize {
        self.metadata.pixel_type.byte_width()
    }

    /// Read the hyperslab `[offset, offset + shape)` into `buf`.
    ///
    /// `buf` must be exactly `product(shape) * byte_width` bytes and receives
    /// the slab in row-major order over the array's native axis order, in
    /// big-endian byte order. Chunks absent from the store contribute zeroes.
    pub async fn read_into(
        &self,
        buf: &mut [u8],
        shape: &[u64],
        offset: &[u64],
    ) -> Result<(), FormatError> {
        let rank = self.metadata.shape.len();
        if shape.len() != rank || offset.len() != rank {
            return Err(FormatError::InvalidShape(format!(
                "request rank {} does not match array rank {}",
                shape.len(),
                rank
            )));
        }
        for dim in 0..rank {
            if shape[dim] == 0 {
                return Err(FormatError::InvalidShape(format!(
                    "zero-length request along dimension {}",
                    dim
                )));
            }
            let end = offset[dim].checked_add(shape[dim]).ok_or_else(|| {
                FormatError::InvalidShape(format!("request overflows dimension {}", dim))
            })?;
            if end > self.metadata.shape[dim] {
                return Err(FormatError::InvalidShape(format!(
                    "request [{}, {}) exceeds array extent {} along dimension {}",
                    offset[dim], end, self.metadata.shape[dim], dim
                )));
            }
        }

        let width = self.byte_width();
        let elements = checked_product(shape)?;
        let expected = (elements as usize)
            .checked_mul(width)
            .ok_or_else(|| FormatError::InvalidShape("request too large".to_string()))?;
        if buf.len() != expected {
            return Err(FormatError::InvalidShape(format!(
                "buffer of {} bytes does not match request of {} bytes",
                buf.len(),
                expected
            )));
        }

        // Absent chunks mean fill value, which is zero here.
        buf.fill(0);

        let chunks = &self.metadata.chunks;
        let first: Vec<u64> = (0..rank).map(|d| offset[d] / chunks[d]).collect();
        let last: Vec<u64> = (0..rank)
            .map(|d| (offset[d] + shape[d] - 1) / chunks[d])
            .collect();

        let out_strides = row_major_strides(shape);
        let chunk_strides = row_major_strides(chunks);
        let chunk_bytes = self.metadata.chunk_len() as usize * width;

        let mut idx = first.clone();
        'chunks: loop {
            if let Some(blob) = self.handle.get(&self.chunk_key(&idx)).await? {
                let decoded = self.decode_chunk(&blob)?;
                if decoded.len() != chunk_bytes {
                    return Err(FormatError::InvalidMetadata(format!(
                        "chunk {} at {} has {} bytes, expected {}",
                        self.chunk_key(&idx),
                        self.handle,
                        decoded.len(),
                        chunk_bytes
                    )));
                }
                copy_overlap(
                    buf,
                    &decoded,
                    &idx,
                    chunks,
                    shape,
                    offset,
                    &out_strides,
                    &chunk_strides,
                    width,
                );
            } else {
                trace!("Chunk {} absent at {}, zero filled", self.chunk_key(&idx), self.handle);
            }

            let mut dim = rank;
            while dim > 0 {
                dim -= 1;
                if idx[dim] < last[dim] {
                    idx[dim] += 1;
                    for reset in (dim + 1)..rank {
                        idx[reset] = first[reset];
                    }
                    continue 'chunks;
                }
            }
            break;
        }

        if width > 1 && self.metadata.endianness == Endianness::Little {
            swap_to_big_endian(buf, width);
        }
        Ok(())
    }

    fn chunk_key(&self, idx: &[u64]) -> String {
        let separator = self.metadata.dimension_separator.as_char();
        let mut key = String::new();
        for (i, value) in idx.iter().enumerate() {
            if i > 0 {
                key.push(separator);
            }
            key.push_str(&value.to_string());
        }
        key
    }

    fn decode_chunk(&self, blob: &[u8]) -> Result<Vec<u8>, FormatError> {
        match self.metadata.compressor {
            Compressor::Raw => Ok(blob.to_vec()),
            Compressor::Zlib => {
                let mut out = Vec::new();
                flate2::read::ZlibDecoder::new(blob)
                    .read_to_end(&mut out)
                    .map_err(|e| {
                        FormatError::InvalidMetadata(format!("zlib chunk decode: {}", e))
                    })?;
                Ok(out)
            }
            Compressor::Gzip => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(blob)
                    .read_to_end(&mut out)
                    .map_err(|e| {
                        FormatError::InvalidMetadata(format!("gzip chunk decode: {}", e))
                    })?;
                Ok(out)
            }
        }
    }
}

fn checked_product(shape: &[u64]) -> Result<u64, FormatError> {
    shape.iter().try_fold(1u64, |acc, &n| {
        acc.checked_mul(n)
            .ok_or_else(|| FormatError::InvalidShape("request too large".to_string()))
    })
}

/// Row-major element strides for a shape.
fn row_major_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }
    strides
}

/// Copy the part of `chunk` that overlaps the request window into `buf`.
///
/// The innermost dimension is contiguous in both layouts, so the copy moves
/// one run of `run_len * width` bytes per outer-dimension position.
#[allow(clippy::too_many_arguments)]
fn copy_overlap(
    buf: &mut [u8],
    chunk: &[u8],
    chunk_idx: &[u64],
    chunk_shape: &[u64],
    req_shape: &[u64],
    req_offset: &[u64],
    out_strides: &[u64],
    chunk_strides: &[u64],
    width: usize,
) {
    let rank = chunk_shape.len();
    let origin: Vec<u64> = (0..rank).map(|d| chunk_idx[d] * chunk_shape[d]).collect();
    let ov_start: Vec<u64> = (0..rank).map(|d| req_offset[d].max(origin[d])).collect();
    let ov_end: Vec<u64> = (0..rank)
        .map(|d| (req_offset[d] + req_shape[d]).min(origin[d] + chunk_shape[d]))
        .collect();

    let inner = rank - 1;
    let run_len = (ov_end[inner] - ov_start[inner]) as usize;
    let run_bytes = run_len * width;

    let mut pos = ov_start.clone();
    loop {
        let mut src_elem = 0u64;
        let mut dst_elem = 0u64;
        for dim in 0..rank {
            src_elem += (pos[dim] - origin[dim]) * chunk_strides[dim];
            dst_elem += (pos[dim] - req_offset[dim]) * out_strides[dim];
        }
        let src = src_elem as usize * width;
        let dst = dst_elem as usize * width;
        buf[dst..dst + run_bytes].copy_from_slice(&chunk[src..src + run_bytes]);

        // Advance over the outer dimensions only.
        let mut dim = inner;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            pos[dim] += 1;
            if pos[dim] < ov_end[dim] {
                break;
            }
            pos[dim] = ov_start[dim];
        }
    }
}

/// Byte-swap every `width`-byte element of `buf` in place.
fn swap_to_big_endian(buf: &mut [u8], width: usize) {
    debug_assert!(buf.len() % width == 0);
    for element in buf.chunks_exact_mut(width) {
        element.reverse();
    }
}
