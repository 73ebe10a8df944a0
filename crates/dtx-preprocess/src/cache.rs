//! Fingerprint-keyed cache of processed images using moka
//!
//! Concurrent requests for the same fingerprint join one in-flight
//! computation; failures are not cached.

use crate::error::PreprocessError;
use dtx_core::{CacheConfig, Fingerprint, ProcessedImage};
use moka::future::Cache;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held (approximate)
    pub entry_count: u64,
    /// Lookups served
    pub requests: u64,
    /// Lookups answered by a stored or in-flight entry
    pub hits: u64,
    /// Lookups that ran the pipeline
    pub computations: u64,
}

/// Processed-image cache
#[derive(Debug, Clone)]
pub struct PreprocessCache {
    inner: Cache<Fingerprint, ProcessedImage>,
    requests: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    computations: Arc<AtomicU64>,
}

impl PreprocessCache {
    /// Create cache from configuration
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.capacity)
                .time_to_live(config.ttl())
                .build(),
            requests: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
            computations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the cached image or run `compute` once for this fingerprint
    ///
    /// # Errors
    /// Returns the computation's error; every waiter sees the same error.
    pub async fn get_or_try_insert_with<F>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> Result<ProcessedImage, PreprocessError>
    where
        F: Future<Output = Result<ProcessedImage, PreprocessError>>,
    {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let computations = self.computations.clone();
        let entry = self
            .inner
            .entry(fingerprint)
            .or_try_insert_with(async move {
                computations.fetch_add(1, Ordering::Relaxed);
                compute.await
            })
            .await
            .map_err(|shared: Arc<PreprocessError>| (*shared).clone())?;
        if !entry.is_fresh() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fingerprint = %fingerprint.short(), "preprocess cache hit");
        }
        Ok(entry.into_value())
    }

    /// Cached image, if present
    #[inline]
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<ProcessedImage> {
        self.inner.get(fingerprint).await
    }

    /// Drop one entry
    #[inline]
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.invalidate(fingerprint).await;
    }

    /// Drop all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }
}
