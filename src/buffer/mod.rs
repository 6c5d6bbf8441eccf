//! The pixel buffer: bounded region reads over one NGFF multiscale image.
//!
//! A [`ZarrPixelBuffer`] exposes a canonical (X,Y,Z,C,T) view of a possibly
//! permuted, possibly Z-downsampled Zarr pyramid. Callers select a public
//! resolution level (0 = largest), then read tiles, rows, columns, planes,
//! stacks, or timepoints as big-endian byte buffers.

use bytes::Bytes;
use futures::future::join_all;
use serde_json::Map;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::AsyncLruCache;
use crate::error::{BufferError, FormatError};
use crate::multiscale::{Axis, Multiscales};
use crate::store::StoreHandle;
use crate::zarr::{group, PixelType, ZarrArray};

/// Shared cache of root-group attribute maps, keyed by store identity.
pub type MetadataCache = AsyncLruCache<String, Arc<Map<String, serde_json::Value>>, FormatError>;

/// Shared cache of open arrays, keyed by store identity.
pub type ArrayCache = AsyncLruCache<String, Arc<ZarrArray>, FormatError>;

/// Caller-declared dimensions of the full-resolution image.
///
/// The engine trusts these for the synthetic resolution descriptions and
/// reports actual on-disk extents everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelsShape {
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
}

/// Key of one cached tile: public level plus the full request tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TileKey {
    level: u32,
    z: u32,
    c: u32,
    t: u32,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// A canonical 5-D request window: `(offset, span)` per axis.
#[derive(Debug, Clone, Copy)]
struct CanonicalRegion {
    t: (u64, u64),
    c: (u64, u64),
    z: (u64, u64),
    y: (u64, u64),
    x: (u64, u64),
}

/// Read-only pixel buffer over one open NGFF multiscale root.
///
/// Not safe for concurrent `set_resolution_level` on a shared instance; each
/// request owns its buffer. The metadata and array caches behind it are
/// shared process-wide.
pub struct ZarrPixelBuffer {
    pixels: PixelsShape,
    root: StoreHandle,
    root_attributes: Arc<Map<String, serde_json::Value>>,
    multiscales: Multiscales,
    resolution_levels: u32,
    /// Internal level, monotone with array size: 0 = smallest array.
    level: u32,
    array: Arc<ZarrArray>,
    /// Full-resolution Z index -> Z index in the current level's array.
    zmap: Vec<u64>,
    max_plane_width: u32,
    max_plane_height: u32,
    array_cache: Arc<ArrayCache>,
    tile_cache: AsyncLruCache<TileKey, Bytes, BufferError>,
}

impl fmt::Debug for ZarrPixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZarrPixelBuffer")
            .field("root", &self.root)
            .field("resolution_levels", &self.resolution_levels)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl ZarrPixelBuffer {
    /// Open a buffer over the multiscale group at `root`.
    ///
    /// The initial resolution level is the smallest one (public `L - 1`).
    pub async fn new(
        pixels: PixelsShape,
        root: StoreHandle,
        max_plane_width: u32,
        max_plane_height: u32,
        metadata_cache: &MetadataCache,
        array_cache: Arc<ArrayCache>,
    ) -> Result<Self, BufferError> {
        info!("Creating ZarrPixelBuffer for {}", root);
        let attributes = metadata_cache
            .get_with(root.identity(), || async {
                group::read_attributes(&root).await.map(Arc::new)
            })
            .await?;
        // NGFF-challenge data often nests the attributes under an "ome" key.
        let root_attributes = Arc::new(crate::multiscale::unwrap_ome(&attributes).clone());
        let multiscales = Multiscales::from_attributes(&root_attributes)?;
        let resolution_levels = multiscales.levels() as u32;

        let (array, zmap) = open_level(
            &root,
            &multiscales,
            &array_cache,
            resolution_levels - 1,
        )
        .await?;

        let size_c = multiscales
            .axes
            .get(Axis::C)
            .map(|i| array.shape()[i])
            .unwrap_or(1) as usize;
        let tile_cache = AsyncLruCache::new(size_c);

        Ok(Self {
            pixels,
            root,
            root_attributes,
            multiscales,
            resolution_levels,
            level: 0,
            array,
            zmap,
            max_plane_width,
            max_plane_height,
            array_cache,
            tile_cache,
        })
    }

    // =========================================================================
    // Resolution levels
    // =========================================================================

    /// Number of resolution levels in the pyramid.
    pub fn resolution_levels(&self) -> u32 {
        self.resolution_levels
    }

    /// The selected public resolution level (0 = largest).
    pub fn resolution_level(&self) -> u32 {
        // Internal numbering is monotone with array size; the public API
        // counts down from the largest dataset.
        self.resolution_levels - 1 - self.level
    }

    /// Select a public resolution level (0 = largest, `levels - 1` smallest).
    ///
    /// Rebuilds the Z remap table: full-resolution index `z` maps to
    /// `z * array_z / full_z` using floor integer division, so boundary
    /// planes resolve to the earlier of the two candidate planes.
    pub async fn set_resolution_level(&mut self, level: u32) -> Result<(), BufferError> {
        if level >= self.resolution_levels {
            return Err(BufferError::ResolutionOutOfRange {
                level,
                levels: self.resolution_levels,
            });
        }
        let (array, zmap) =
            open_level(&self.root, &self.multiscales, &self.array_cache, level).await?;
        self.array = array;
        self.zmap = zmap;
        self.level = self.resolution_levels - 1 - level;
        debug!(
            "Selected resolution level {} of {} at {}",
            level, self.resolution_levels, self.root
        );
        Ok(())
    }

    /// Synthetic resolution descriptions: `(x, y)` per public level, halving
    /// the *declared* full-resolution extent per level.
    ///
    /// Deliberately independent of the on-disk array shapes; callers rely on
    /// the power-of-two contract.
    pub fn resolution_descriptions(&self) -> Vec<(u32, u32)> {
        (0..self.resolution_levels)
            .map(|i| {
                let scale = 1u64 << i;
                (
                    (u64::from(self.pixels.size_x) / scale) as u32,
                    (u64::from(self.pixels.size_y) / scale) as u32,
                )
            })
            .collect()
    }

    /// Chunk (X, Y) extent of the current resolution level.
    pub fn tile_size(&self) -> (u32, u32) {
        let chunks = self.array.chunks();
        (
            chunks[self.multiscales.axes.x()] as u32,
            chunks[self.multiscales.axes.y()] as u32,
        )
    }

    /// Chunk shapes of every resolution level, largest level first.
    pub async fn chunk_shapes(&self) -> Result<Vec<Vec<u64>>, BufferError> {
        let mut shapes = Vec::with_capacity(self.multiscales.datasets.len());
        for dataset in &self.multiscales.datasets {
            let handle = self.root.resolve(&dataset.path);
            let array = self
                .array_cache
                .get_with(handle.identity(), || async {
                    group::open_array(&handle).await
                })
                .await?;
            shapes.push(array.chunks().to_vec());
        }
        Ok(shapes)
    }

    // =========================================================================
    // Dimensions and pixel type
    // =========================================================================

    /// X extent of the current resolution level.
    pub fn size_x(&self) -> u32 {
        self.array.shape()[self.multiscales.axes.x()] as u32
    }

    /// Y extent of the current resolution level.
    pub fn size_y(&self) -> u32 {
        self.array.shape()[self.multiscales.axes.y()] as u32
    }

    /// Z extent of the *full-resolution* level, whatever level is selected.
    pub fn size_z(&self) -> u32 {
        if self.multiscales.axes.contains(Axis::Z) {
            self.zmap.len() as u32
        } else {
            1
        }
    }

    /// C extent of the current resolution level.
    pub fn size_c(&self) -> u32 {
        self.axis_extent(Axis::C)
    }

    /// T extent of the current resolution level.
    pub fn size_t(&self) -> u32 {
        self.axis_extent(Axis::T)
    }

    fn axis_extent(&self, axis: Axis) -> u32 {
        self.multiscales
            .axes
            .get(axis)
            .map(|i| self.array.shape()[i] as u32)
            .unwrap_or(1)
    }

    /// Z extent of the current level's underlying array.
    fn true_size_z(&self) -> u32 {
        self.axis_extent(Axis::Z)
    }

    pub fn pixels_type(&self) -> PixelType {
        self.array.pixel_type()
    }

    pub fn byte_width(&self) -> usize {
        self.array.byte_width()
    }

    pub fn is_signed(&self) -> bool {
        self.array.pixel_type().is_signed()
    }

    pub fn is_float(&self) -> bool {
        self.array.pixel_type().is_float()
    }

    /// Bytes in one row of the current level.
    pub fn row_size(&self) -> usize {
        self.size_x() as usize * self.byte_width()
    }

    /// Bytes in one column of the current level.
    pub fn col_size(&self) -> usize {
        self.size_y() as usize * self.byte_width()
    }

    /// Bytes in one plane of the current level.
    pub fn plane_size(&self) -> u64 {
        self.row_size() as u64 * u64::from(self.size_y())
    }

    /// Bytes in one Z stack of the current level.
    pub fn stack_size(&self) -> u64 {
        self.plane_size() * u64::from(self.size_z())
    }

    /// Bytes in one timepoint of the current level.
    pub fn timepoint_size(&self) -> u64 {
        self.stack_size() * u64::from(self.size_c())
    }

    /// Bytes in the whole image at the current level.
    pub fn total_size(&self) -> u64 {
        self.timepoint_size() * u64::from(self.size_t())
    }

    /// The root this buffer reads from.
    pub fn path(&self) -> String {
        self.root.identity()
    }

    /// The root group attributes (with any `"ome"` wrapper removed).
    pub fn root_group_attributes(&self) -> &Map<String, serde_json::Value> {
        &self.root_attributes
    }

    /// The declared full-resolution dimensions.
    pub fn pixels(&self) -> &PixelsShape {
        &self.pixels
    }

    // =========================================================================
    // Bounds checking
    // =========================================================================

    /// Reject any coordinate at or beyond its axis extent.
    pub fn check_bounds(&self, x: u32, y: u32, z: u32, c: u32, t: u32) -> Result<(), BufferError> {
        let checks = [
            ("X", x, self.size_x()),
            ("Y", y, self.size_y()),
            ("Z", z, self.size_z()),
            ("C", c, self.size_c()),
            ("T", t, self.size_t()),
        ];
        for (name, value, size) in checks {
            if value >= size {
                return Err(BufferError::DimensionsOutOfBounds(format!(
                    "{} '{}' greater than size{} '{}'",
                    name, value, name, size
                )));
            }
        }
        Ok(())
    }

    /// Reject a tile's bottom-right corner when it falls outside the plane.
    fn check_far_corner(&self, far_x: u64, far_y: u64) -> Result<(), BufferError> {
        if far_x >= u64::from(self.size_x()) {
            return Err(BufferError::DimensionsOutOfBounds(format!(
                "X '{}' greater than sizeX '{}'",
                far_x,
                self.size_x()
            )));
        }
        if far_y >= u64::from(self.size_y()) {
            return Err(BufferError::DimensionsOutOfBounds(format!(
                "Y '{}' greater than sizeY '{}'",
                far_y,
                self.size_y()
            )));
        }
        Ok(())
    }

    /// Reject requests whose plane area exceeds the configured maximum.
    ///
    /// Runs before any output allocation so oversize requests cannot allocate.
    fn check_read_size(&self, width: u64, height: u64) -> Result<(), BufferError> {
        let max = u64::from(self.max_plane_width) * u64::from(self.max_plane_height);
        if width * height > max {
            return Err(BufferError::RequestTooLarge {
                shape: vec![width, height],
                max_width: self.max_plane_width,
                max_height: self.max_plane_height,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Region reads
    // =========================================================================

    /// Read a `w x h` tile at `(x, y)` of plane `(z, c, t)`.
    ///
    /// Results are cached per `(level, z, c, t, x, y, w, h)`. When the image
    /// has exactly three channels the request is treated as one of an RGB
    /// triplet: all three channels load as a batch, and a cold requested
    /// channel invalidates the cache first rather than trusting LRU order to
    /// expire the previous triplet.
    pub async fn get_tile(
        &self,
        z: u32,
        c: u32,
        t: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<Bytes, BufferError> {
        if w == 0 || h == 0 {
            return Err(BufferError::DimensionsOutOfBounds(format!(
                "empty tile {}x{}",
                w, h
            )));
        }
        self.check_bounds(x, y, z, c, t)?;
        self.check_far_corner(u64::from(x) + u64::from(w) - 1, u64::from(y) + u64::from(h) - 1)?;
        // Before the equivalent check inside the read path: a rejection here
        // must not reach the tile-cache loader and its allocation.
        self.check_read_size(u64::from(w), u64::from(h))?;

        let channels: Vec<u32> = if self.size_c() == 3 {
            // Assume an RGB triplet request pattern.
            vec![0, 1, 2]
        } else {
            vec![c]
        };
        let level = self.resolution_level();
        let key_for = |channel: u32| TileKey {
            level,
            z,
            c: channel,
            t,
            x,
            y,
            w,
            h,
        };

        let requested = key_for(c);
        if self.tile_cache.get_if_present(&requested).await.is_none() {
            // Cold requested channel: flush the previous triplet wholesale,
            // LRU expiry of a triplet is unreliable for this access pattern.
            self.tile_cache.invalidate_all().await;
        }

        let loads = channels.iter().map(|&channel| {
            let key = key_for(channel);
            self.tile_cache.get_with(key, move || {
                self.read_region(CanonicalRegion {
                    t: (u64::from(t), 1),
                    c: (u64::from(channel), 1),
                    z: (u64::from(z), 1),
                    y: (u64::from(y), u64::from(h)),
                    x: (u64::from(x), u64::from(w)),
                })
            })
        });
        let mut results = join_all(loads).await;
        let index = channels
            .iter()
            .position(|&channel| channel == c)
            .unwrap_or(0);
        results.swap_remove(index)
    }

    /// Read row `y` of plane `(z, c, t)`.
    pub async fn get_row(&self, y: u32, z: u32, c: u32, t: u32) -> Result<Bytes, BufferError> {
        self.get_tile(z, c, t, 0, y, self.size_x(), 1).await
    }

    /// Read column `x` of plane `(z, c, t)`.
    pub async fn get_col(&self, x: u32, z: u32, c: u32, t: u32) -> Result<Bytes, BufferError> {
        self.get_tile(z, c, t, x, 0, 1, self.size_y()).await
    }

    /// Read the whole plane `(z, c, t)`.
    pub async fn get_plane(&self, z: u32, c: u32, t: u32) -> Result<Bytes, BufferError> {
        self.get_tile(z, c, t, 0, 0, self.size_x(), self.size_y())
            .await
    }

    /// Read the Z stack of channel `c` at timepoint `t` in one request.
    ///
    /// Emits exactly `size_z()` planes even on Z-downsampled levels, where
    /// nearby full-resolution indexes remap to the same underlying plane.
    pub async fn get_stack(&self, c: u32, t: u32) -> Result<Bytes, BufferError> {
        let (w, h) = (self.size_x(), self.size_y());
        self.check_bounds(0, 0, 0, c, t)?;
        self.check_bounds(w - 1, h - 1, 0, c, t)?;
        self.read_region(CanonicalRegion {
            t: (u64::from(t), 1),
            c: (u64::from(c), 1),
            z: (0, u64::from(self.size_z())),
            y: (0, u64::from(h)),
            x: (0, u64::from(w)),
        })
        .await
    }

    /// Read every channel's Z stack at timepoint `t` in one request.
    pub async fn get_timepoint(&self, t: u32) -> Result<Bytes, BufferError> {
        let (w, h) = (self.size_x(), self.size_y());
        self.check_bounds(0, 0, 0, 0, t)?;
        self.check_bounds(w - 1, h - 1, 0, 0, t)?;
        self.read_region(CanonicalRegion {
            t: (u64::from(t), 1),
            c: (0, u64::from(self.size_c())),
            z: (0, u64::from(self.size_z())),
            y: (0, u64::from(h)),
            x: (0, u64::from(w)),
        })
        .await
    }

    /// Read a canonical region window into a fresh big-endian buffer.
    async fn read_region(&self, region: CanonicalRegion) -> Result<Bytes, BufferError> {
        self.check_read_size(region.x.1, region.y.1)?;

        let width = self.byte_width() as u64;
        let total = [region.t.1, region.c.1, region.z.1, region.y.1, region.x.1, width]
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n))
            .filter(|&total| total <= i32::MAX as u64)
            .ok_or_else(|| BufferError::RequestTooLarge {
                shape: vec![region.x.1, region.y.1],
                max_width: self.max_plane_width,
                max_height: self.max_plane_height,
            })?;
        let mut buf = vec![0u8; total as usize];

        let axes = &self.multiscales.axes;
        let downsampled_z =
            axes.contains(Axis::Z) && self.size_z() != self.true_size_z();
        if downsampled_z {
            // The requested Z indexes live in full-resolution coordinates;
            // split into single-plane reads remapped through the Z table, in
            // canonical (c-outer, z-inner) order so every issued native shape
            // has all non-Y/X extents equal to one.
            let plane_bytes = (region.y.1 * region.x.1 * width) as usize;
            let mut cursor = 0usize;
            for ci in 0..region.c.1 {
                for zi in 0..region.z.1 {
                    let plane = CanonicalRegion {
                        t: region.t,
                        c: (region.c.0 + ci, 1),
                        z: (self.zmap[(region.z.0 + zi) as usize], 1),
                        y: region.y,
                        x: region.x,
                    };
                    let (shape, offset) = self.native_request(&plane);
                    self.array
                        .read_into(&mut buf[cursor..cursor + plane_bytes], &shape, &offset)
                        .await?;
                    cursor += plane_bytes;
                }
            }
        } else {
            let (shape, offset) = self.native_request(&region);
            self.array.read_into(&mut buf, &shape, &offset).await?;
        }
        Ok(Bytes::from(buf))
    }

    /// Project a canonical window onto the array's native axis order.
    ///
    /// Axes the array does not have are dropped; their spans are one by
    /// construction.
    fn native_request(&self, region: &CanonicalRegion) -> (Vec<u64>, Vec<u64>) {
        let axes = &self.multiscales.axes;
        let rank = axes.len();
        let mut shape = vec![1u64; rank];
        let mut offset = vec![0u64; rank];
        let components = [
            (Axis::T, region.t),
            (Axis::C, region.c),
            (Axis::Z, region.z),
            (Axis::Y, region.y),
            (Axis::X, region.x),
        ];
        for (axis, (off, span)) in components {
            if let Some(index) = axes.get(axis) {
                offset[index] = off;
                shape[index] = span;
            }
        }
        (shape, offset)
    }

    // =========================================================================
    // Unsupported legacy surface
    // =========================================================================

    /// No-op; the storage clients behind the buffer are shared and outlive it.
    pub fn close(&self) {}

    pub fn get_region(&self, _size: u64, _offset: u64) -> Result<Bytes, BufferError> {
        Err(BufferError::Unsupported(
            "Zarr pixel buffer does not support region access",
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn get_plane_region(
        &self,
        _x: u32,
        _y: u32,
        _width: u32,
        _height: u32,
        _z: u32,
        _c: u32,
        _t: u32,
        _stride: u32,
    ) -> Result<Bytes, BufferError> {
        Err(BufferError::Unsupported(
            "Zarr pixel buffer does not support plane region access",
        ))
    }

    pub fn get_hypercube(
        &self,
        _offset: &[u32],
        _size: &[u32],
        _step: &[u32],
    ) -> Result<Bytes, BufferError> {
        Err(BufferError::Unsupported(
            "Zarr pixel buffer does not support hypercube access",
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_tile(
        &mut self,
        _buffer: &[u8],
        _z: u32,
        _c: u32,
        _t: u32,
        _x: u32,
        _y: u32,
        _w: u32,
        _h: u32,
    ) -> Result<(), BufferError> {
        Err(BufferError::Unsupported("cannot write to Zarr"))
    }

    pub fn set_region(&mut self, _size: u64, _offset: u64, _buffer: &[u8]) -> Result<(), BufferError> {
        Err(BufferError::Unsupported("cannot write to Zarr"))
    }

    pub fn set_row(
        &mut self,
        _buffer: &[u8],
        _y: u32,
        _z: u32,
        _c: u32,
        _t: u32,
    ) -> Result<(), BufferError> {
        Err(BufferError::Unsupported("cannot write to Zarr"))
    }

    pub fn set_plane(&mut self, _buffer: &[u8], _z: u32, _c: u32, _t: u32) -> Result<(), BufferError> {
        Err(BufferError::Unsupported("cannot write to Zarr"))
    }

    pub fn set_stack(&mut self, _buffer: &[u8], _c: u32, _t: u32) -> Result<(), BufferError> {
        Err(BufferError::Unsupported("cannot write to Zarr"))
    }

    pub fn set_timepoint(&mut self, _buffer: &[u8], _t: u32) -> Result<(), BufferError> {
        Err(BufferError::Unsupported("cannot write to Zarr"))
    }

    pub fn calculate_message_digest(&self) -> Result<Vec<u8>, BufferError> {
        Err(BufferError::Unsupported(
            "Zarr pixel buffer does not support message digest calculation",
        ))
    }
}

/// Open the array for a public level and build its Z remap table.
async fn open_level(
    root: &StoreHandle,
    multiscales: &Multiscales,
    array_cache: &ArrayCache,
    public_level: u32,
) -> Result<(Arc<ZarrArray>, Vec<u64>), BufferError> {
    // Datasets are in document order, largest first, so the public numbering
    // indexes them directly.
    let dataset = &multiscales.datasets[public_level as usize];
    let handle = root.resolve(&dataset.path);
    let array = array_cache
        .get_with(handle.identity(), || async {
            group::open_array(&handle).await
        })
        .await?;
    if array.shape().len() != multiscales.axes.len() {
        return Err(BufferError::Format(FormatError::InvalidMultiscales(format!(
            "array rank {} at {} does not match {} axes",
            array.shape().len(),
            handle,
            multiscales.axes.len()
        ))));
    }

    let zmap = if let Some(z_index) = multiscales.axes.get(Axis::Z) {
        let full_handle = root.resolve(&multiscales.datasets[0].path);
        let full = array_cache
            .get_with(full_handle.identity(), || async {
                group::open_array(&full_handle).await
            })
            .await?;
        let full_z = full.shape()[z_index];
        let array_z = array.shape()[z_index];
        (0..full_z).map(|z| z * array_z / full_z).collect()
    } else {
        Vec::new()
    };

    Ok((array, zmap))
}
