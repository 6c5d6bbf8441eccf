//! Test utilities for integration tests.
//!
//! Provides an in-memory store with request tracking and a writer for
//! on-disk OME-NGFF Zarr v2 fixtures with deterministic pixel gradients.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use ngff_pixel_buffer::{IoError, ObjectStore, PixelsShape};

// =============================================================================
// Counting In-Memory Store
// =============================================================================

/// An in-memory object store that tracks every get by key.
///
/// Useful for verifying cache behavior (how many chunk reads a request
/// performed) and for simulating sparse datasets by removing chunk keys.
pub struct CountingStore {
    objects: RwLock<HashMap<String, Bytes>>,
    counts: RwLock<HashMap<String, usize>>,
    total: AtomicUsize,
    identifier: String,
}

impl CountingStore {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            counts: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
            identifier: identifier.into(),
        }
    }

    /// Load every file under `dir` as an object keyed by its relative path.
    pub fn from_dir(dir: &Path, identifier: impl Into<String>) -> Self {
        let store = Self::new(identifier);
        {
            let mut objects = store.objects.write().unwrap();
            load_tree(dir, dir, &mut objects);
        }
        store
    }

    /// Remove an object, simulating a sparse (absent) chunk.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.objects.write().unwrap().remove(key)
    }

    /// Number of gets issued for one key.
    pub fn request_count(&self, key: &str) -> usize {
        self.counts.read().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Number of gets issued across all keys.
    pub fn total_requests(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of gets issued for chunk keys (anything but Zarr metadata).
    pub fn chunk_requests(&self) -> usize {
        self.counts
            .read()
            .unwrap()
            .iter()
            .filter(|(key, _)| !key.ends_with(".zattrs") && !key.ends_with(".zarray") && !key.ends_with(".zgroup"))
            .map(|(_, count)| count)
            .sum()
    }
}

fn load_tree(base: &Path, dir: &Path, objects: &mut HashMap<String, Bytes>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            load_tree(base, &path, objects);
        } else {
            let key = path
                .strip_prefix(base)
                .unwrap()
                .iter()
                .map(|segment| segment.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            objects.insert(key, Bytes::from(std::fs::read(&path).unwrap()));
        }
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, IoError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.counts.write().unwrap().entry(key.to_string()).or_insert(0) += 1;
        Ok(self.objects.read().unwrap().get(key).cloned())
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Zarr v2 Fixture Writer
// =============================================================================

/// Description of an on-disk multiscale fixture.
pub struct ImageFixture<'a> {
    /// Axis names in on-disk order, e.g. `["t", "c", "z", "y", "x"]`.
    pub axes: &'a [&'a str],
    /// Array shape per resolution level, largest first, in axes order.
    pub shapes: &'a [&'a [u64]],
    /// Chunk shape per level; `None` stores each level as a single chunk.
    pub chunks: Option<&'a [&'a [u64]]>,
    /// Zarr v2 dtype string, e.g. `"<u2"`.
    pub dtype: &'a str,
    /// Compressor JSON, e.g. `Some(r#"{"id": "zlib", "level": 1}"#)`.
    pub compressor: Option<&'a str>,
}

/// The deterministic gradient written by [`write_image`]: the canonical
/// row-major index of `(t, c, z, y, x)` within that level's canonical sizes.
///
/// For a `T=2,C=3,Z=4,Y=5,X=6` level this is
/// `t*360 + c*120 + z*30 + y*6 + x`.
pub fn gradient_value(sizes: &PixelsShape, t: u64, c: u64, z: u64, y: u64, x: u64) -> u64 {
    let sx = u64::from(sizes.size_x);
    let sy = u64::from(sizes.size_y);
    let sz = u64::from(sizes.size_z);
    let sc = u64::from(sizes.size_c);
    x + y * sx + z * sx * sy + c * sx * sy * sz + t * sx * sy * sz * sc
}

/// Canonical sizes of one fixture level.
pub fn level_sizes(axes: &[&str], shape: &[u64]) -> PixelsShape {
    let size_of = |name: &str| -> u32 {
        axes.iter()
            .position(|a| *a == name)
            .map(|i| shape[i] as u32)
            .unwrap_or(1)
    };
    PixelsShape {
        size_x: size_of("x"),
        size_y: size_of("y"),
        size_z: size_of("z"),
        size_c: size_of("c"),
        size_t: size_of("t"),
    }
}

/// Write a multiscale image at `root` filled with the default gradient.
pub fn write_image(root: &Path, fixture: &ImageFixture) {
    write_image_with(root, fixture, |level, axes, shape, canonical| {
        let _ = level;
        let sizes = level_sizes(axes, shape);
        gradient_value(&sizes, canonical[0], canonical[1], canonical[2], canonical[3], canonical[4])
    });
}

/// Write a multiscale image at `root`, computing each sample with `value`.
///
/// `value` receives the level index, the axis names, the level shape, and the
/// canonical `[t, c, z, y, x]` coordinate of the sample.
pub fn write_image_with(
    root: &Path,
    fixture: &ImageFixture,
    value: impl Fn(usize, &[&str], &[u64], [u64; 5]) -> u64,
) {
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join(".zgroup"), r#"{"zarr_format": 2}"#).unwrap();
    write_multiscales_attrs(root, fixture.axes, fixture.shapes.len());

    for (level, shape) in fixture.shapes.iter().enumerate() {
        let chunks: Vec<u64> = match fixture.chunks {
            Some(chunks) => chunks[level].to_vec(),
            None => shape.to_vec(),
        };
        let level_dir = root.join(level.to_string());
        std::fs::create_dir_all(&level_dir).unwrap();
        write_zarray(&level_dir, shape, &chunks, fixture.dtype, fixture.compressor);
        write_chunks(
            &level_dir,
            fixture.axes,
            shape,
            &chunks,
            fixture.dtype,
            fixture.compressor,
            |canonical| value(level, fixture.axes, shape, canonical),
        );
    }
}

/// Write the `.zattrs` multiscales document for `levels` datasets.
pub fn write_multiscales_attrs(root: &Path, axes: &[&str], levels: usize) {
    let axes_json: Vec<String> = axes
        .iter()
        .map(|name| {
            let kind = match *name {
                "t" => "time",
                "c" => "channel",
                _ => "space",
            };
            format!(r#"{{"name": "{}", "type": "{}"}}"#, name, kind)
        })
        .collect();
    let datasets_json: Vec<String> = (0..levels)
        .map(|i| format!(r#"{{"path": "{}"}}"#, i))
        .collect();
    let attrs = format!(
        r#"{{"multiscales": [{{"version": "0.4", "axes": [{}], "datasets": [{}]}}]}}"#,
        axes_json.join(","),
        datasets_json.join(",")
    );
    std::fs::write(root.join(".zattrs"), attrs).unwrap();
}

/// Write a `.zarray` document.
pub fn write_zarray(dir: &Path, shape: &[u64], chunks: &[u64], dtype: &str, compressor: Option<&str>) {
    let doc = format!(
        r#"{{
            "zarr_format": 2,
            "shape": {:?},
            "chunks": {:?},
            "dtype": "{}",
            "compressor": {},
            "fill_value": 0,
            "order": "C",
            "filters": null
        }}"#,
        shape,
        chunks,
        dtype,
        compressor.unwrap_or("null")
    );
    std::fs::write(dir.join(".zarray"), doc).unwrap();
}

fn write_chunks(
    dir: &Path,
    axes: &[&str],
    shape: &[u64],
    chunks: &[u64],
    dtype: &str,
    compressor: Option<&str>,
    value: impl Fn([u64; 5]) -> u64,
) {
    let rank = shape.len();
    let grid: Vec<u64> = (0..rank).map(|d| shape[d].div_ceil(chunks[d])).collect();

    each_index(&grid, |chunk_idx| {
        let mut blob = Vec::new();
        each_index(chunks, |local| {
            let global: Vec<u64> = (0..rank)
                .map(|d| chunk_idx[d] * chunks[d] + local[d])
                .collect();
            let padded = (0..rank).any(|d| global[d] >= shape[d]);
            let sample = if padded {
                0
            } else {
                value(canonical_coordinate(axes, &global))
            };
            encode_value(dtype, sample, &mut blob);
        });

        let blob = match compressor {
            Some(json) if json.contains("zlib") => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&blob).unwrap();
                encoder.finish().unwrap()
            }
            Some(json) if json.contains("gzip") => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&blob).unwrap();
                encoder.finish().unwrap()
            }
            Some(other) => panic!("fixture writer cannot encode compressor {}", other),
            None => blob,
        };

        let name: Vec<String> = chunk_idx.iter().map(|i| i.to_string()).collect();
        std::fs::write(dir.join(name.join(".")), blob).unwrap();
    });
}

/// Canonical `[t, c, z, y, x]` coordinate of an on-disk index tuple.
fn canonical_coordinate(axes: &[&str], global: &[u64]) -> [u64; 5] {
    let mut canonical = [0u64; 5];
    for (i, name) in axes.iter().enumerate() {
        let slot = match *name {
            "t" => 0,
            "c" => 1,
            "z" => 2,
            "y" => 3,
            "x" => 4,
            other => panic!("unknown axis in fixture: {}", other),
        };
        canonical[slot] = global[i];
    }
    canonical
}

/// Encode one sample in the given dtype's on-disk byte order.
pub fn encode_value(dtype: &str, value: u64, out: &mut Vec<u8>) {
    let little = dtype.starts_with('<') || dtype.starts_with('|');
    match &dtype[1..] {
        "i1" | "u1" => out.push(value as u8),
        "i2" | "u2" => {
            let v = value as u16;
            out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() });
        }
        "i4" | "u4" => {
            let v = value as u32;
            out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() });
        }
        "f4" => {
            let v = value as f32;
            out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() });
        }
        "f8" => {
            let v = value as f64;
            out.extend_from_slice(&if little { v.to_le_bytes() } else { v.to_be_bytes() });
        }
        other => panic!("fixture writer cannot encode dtype {}", other),
    }
}

/// Encode one sample big-endian, as the engine emits it.
pub fn encode_big_endian(dtype: &str, value: u64, out: &mut Vec<u8>) {
    match &dtype[1..] {
        "i1" | "u1" => out.push(value as u8),
        "i2" | "u2" => out.extend_from_slice(&(value as u16).to_be_bytes()),
        "i4" | "u4" => out.extend_from_slice(&(value as u32).to_be_bytes()),
        "f4" => out.extend_from_slice(&(value as f32).to_be_bytes()),
        "f8" => out.extend_from_slice(&(value as f64).to_be_bytes()),
        other => panic!("cannot encode dtype {}", other),
    }
}

/// Iterate every index tuple of a grid in row-major order.
fn each_index(dims: &[u64], mut f: impl FnMut(&[u64])) {
    if dims.iter().any(|&d| d == 0) {
        return;
    }
    let mut idx = vec![0u64; dims.len()];
    loop {
        f(&idx);
        let mut d = dims.len();
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < dims[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

/// Shorthand for a [`PixelsShape`].
pub fn pixels(x: u32, y: u32, z: u32, c: u32, t: u32) -> PixelsShape {
    PixelsShape {
        size_x: x,
        size_y: y,
        size_z: z,
        size_c: c,
        size_t: t,
    }
}
