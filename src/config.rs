//! Engine configuration.
//!
//! The engine is embedded into a larger image server which owns the CLI and
//! environment handling; this crate only takes a small set of limits with
//! sensible defaults.

use crate::error::FormatError;

/// Default maximum plane width in pixels.
pub const DEFAULT_MAX_PLANE_WIDTH: u32 = 3192;

/// Default maximum plane height in pixels.
pub const DEFAULT_MAX_PLANE_HEIGHT: u32 = 3192;

/// Default number of entries in the shared metadata and array caches.
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// Limits and cache sizing for a [`crate::service::PixelBufferService`].
///
/// `max_plane_width * max_plane_height` bounds the area of any single region
/// read; oversize requests are rejected before any allocation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum width of a requested plane or tile.
    pub max_plane_width: u32,

    /// Maximum height of a requested plane or tile.
    pub max_plane_height: u32,

    /// Capacity of the shared group-metadata and array caches (entries).
    pub cache_capacity: usize,
}

impl EngineConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.max_plane_width == 0 || self.max_plane_height == 0 {
            return Err(FormatError::InvalidConfig(
                "max plane dimensions must be greater than 0".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(FormatError::InvalidConfig(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Maximum number of pixels a single region read may cover.
    pub fn max_plane_area(&self) -> u64 {
        u64::from(self.max_plane_width) * u64::from(self.max_plane_height)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_plane_width: DEFAULT_MAX_PLANE_WIDTH,
            max_plane_height: DEFAULT_MAX_PLANE_HEIGHT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}
