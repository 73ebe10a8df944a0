//! Preprocessing agent
//!
//! validate → download → verify → enhance, behind the fingerprint cache.
//! Nothing is returned unless every stage succeeded.

use crate::cache::{CacheStats, PreprocessCache};
use crate::downloader::ImageDownloader;
use crate::enhancer::{EnhancedImage, ImageEnhancer};
use crate::error::{EnhanceError, PreprocessError};
use crate::magic::validate_magic_bytes;
use crate::validator::{ImageValidator, Resolver, SystemResolver};
use chrono::Utc;
use dtx_core::{Fingerprint, ImageFormat, ImageId, PipelineConfig, ProcessedImage};
use std::sync::Arc;
use std::time::Instant;

/// Composes validator, downloader and enhancer into [`ProcessedImage`]s
#[derive(Debug, Clone)]
pub struct PreprocessingAgent {
    validator: Arc<ImageValidator>,
    downloader: ImageDownloader,
    enhancer: Arc<ImageEnhancer>,
    cache: PreprocessCache,
}

impl PreprocessingAgent {
    /// Create agent resolving hosts through the system resolver
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Create agent with a custom resolver
    #[must_use]
    pub fn with_resolver(config: &PipelineConfig, resolver: Arc<dyn Resolver>) -> Self {
        let validator = Arc::new(ImageValidator::with_resolver(config.validator.clone(), resolver));
        Self {
            downloader: ImageDownloader::new(config.download.clone(), validator.clone()),
            validator,
            enhancer: Arc::new(ImageEnhancer::new(config.enhance.clone())),
            cache: PreprocessCache::new(&config.cache),
        }
    }

    /// Turn a source reference into a processed image
    ///
    /// # Errors
    /// Returns a [`PreprocessError`] naming the failed stage.
    pub async fn process(&self, source: &str) -> Result<ProcessedImage, PreprocessError> {
        let fingerprint = Fingerprint::of_source(source);
        self.cache
            .get_or_try_insert_with(fingerprint, self.run_stages(source, fingerprint))
            .await
    }

    async fn run_stages(
        &self,
        source: &str,
        fingerprint: Fingerprint,
    ) -> Result<ProcessedImage, PreprocessError> {
        let started = Instant::now();
        tracing::info!(source, fingerprint = %fingerprint.short(), "preprocessing image");

        let target = self.validator.validate(source).await?;
        let downloaded = self.downloader.download(&target).await?;
        let format = validate_magic_bytes(&downloaded.bytes, Some(downloaded.declared))?;
        let enhanced = self.enhance(downloaded.bytes, format).await?;

        let image = ProcessedImage {
            id: ImageId::new(),
            source_url: source.to_string(),
            fingerprint,
            width: enhanced.width,
            height: enhanced.height,
            format: enhanced.format,
            byte_size: enhanced.data.len(),
            created_at: Utc::now(),
            data: Arc::from(enhanced.data),
        };
        tracing::info!(
            image_id = %image.id,
            width = image.width,
            height = image.height,
            bytes = image.byte_size,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "image preprocessed"
        );
        Ok(image)
    }

    /// Run the enhancer on a blocking thread
    ///
    /// # Errors
    /// Propagates [`EnhanceError`]; a panicked worker maps to
    /// [`EnhanceError::Worker`].
    pub async fn enhance(&self, bytes: Vec<u8>, format: ImageFormat) -> Result<EnhancedImage, EnhanceError> {
        let enhancer = self.enhancer.clone();
        tokio::task::spawn_blocking(move || enhancer.enhance(&bytes, format))
            .await
            .map_err(|e| EnhanceError::Worker(e.to_string()))?
    }

    /// Readiness probe: the pixel pipeline can encode and decode a 1x1 image
    ///
    /// # Errors
    /// Returns the enhancement error if the probe image fails.
    pub async fn health_check(&self) -> Result<(), PreprocessError> {
        let mut probe = Vec::new();
        image::DynamicImage::new_rgb8(1, 1)
            .write_to(&mut std::io::Cursor::new(&mut probe), image::ImageFormat::Png)
            .map_err(|e| EnhanceError::Encode(e.to_string()))?;
        self.enhance(probe, ImageFormat::Png).await?;
        Ok(())
    }

    /// Validator in use
    #[inline]
    #[must_use]
    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    /// Cache counters
    #[inline]
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
