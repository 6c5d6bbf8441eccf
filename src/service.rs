//! Buffer factory owning the process-wide caches.

use std::sync::Arc;

use tracing::info;

use crate::buffer::{ArrayCache, MetadataCache, PixelsShape, ZarrPixelBuffer};
use crate::cache::AsyncLruCache;
use crate::config::EngineConfig;
use crate::error::BufferError;
use crate::store::parse_root_uri;

/// Opens [`ZarrPixelBuffer`]s and shares group-metadata and array caches
/// between them.
///
/// One service instance per process is the intended shape: buffers opened on
/// the same root then share parsed metadata, open arrays, and (behind the S3
/// store) clients, across threads.
pub struct PixelBufferService {
    config: EngineConfig,
    metadata_cache: Arc<MetadataCache>,
    array_cache: Arc<ArrayCache>,
}

impl PixelBufferService {
    /// Create a service with the given limits.
    pub fn new(config: EngineConfig) -> Result<Self, BufferError> {
        config.validate()?;
        info!(
            "Zarr metadata and array cache size: {}",
            config.cache_capacity
        );
        let metadata_cache = Arc::new(AsyncLruCache::new(config.cache_capacity));
        let array_cache = Arc::new(AsyncLruCache::new(config.cache_capacity));
        Ok(Self {
            config,
            metadata_cache,
            array_cache,
        })
    }

    /// The configured limits.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a pixel buffer over the NGFF multiscale root at `uri`.
    ///
    /// `pixels` carries the caller-declared full-resolution dimensions used
    /// for the synthetic resolution descriptions.
    pub async fn open(
        &self,
        pixels: PixelsShape,
        uri: &str,
    ) -> Result<ZarrPixelBuffer, BufferError> {
        let root = parse_root_uri(uri).await.map_err(BufferError::Format)?;
        ZarrPixelBuffer::new(
            pixels,
            root,
            self.config.max_plane_width,
            self.config.max_plane_height,
            &self.metadata_cache,
            self.array_cache.clone(),
        )
        .await
    }
}
