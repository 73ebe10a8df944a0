//! Extraction agent
//!
//! One structured-output call per (image, category). Timeouts, rate limits
//! and 5xx answers are retried with backoff; schema violations are not.

use crate::client::HttpAnalysisClient;
use crate::error::{ExtractionError, ServiceError};
use crate::schema::{instructions, SchemaRegistry};
use crate::service::{AnalysisRequest, AnalysisService};
use dtx_core::{ExtractionConfig, ProcessedImage, TokenCandidate, TokenCategory};
use std::sync::Arc;
use std::time::Instant;

/// Turns processed images into token candidates
#[derive(Clone)]
pub struct ExtractionAgent {
    service: Arc<dyn AnalysisService>,
    schemas: Arc<SchemaRegistry>,
    config: ExtractionConfig,
}

impl std::fmt::Debug for ExtractionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionAgent")
            .field("service", &self.service.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExtractionAgent {
    /// Create agent backed by the HTTP client
    ///
    /// # Errors
    /// Fails if the client or the schemas cannot be built.
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        let client = HttpAnalysisClient::new(config.clone())
            .map_err(|e| ExtractionError::from_service(e, config.timeout()))?;
        Self::with_service(config, Arc::new(client))
    }

    /// Create agent backed by any analysis service
    ///
    /// # Errors
    /// Fails if the schemas cannot be compiled.
    pub fn with_service(
        config: ExtractionConfig,
        service: Arc<dyn AnalysisService>,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            service,
            schemas: Arc::new(SchemaRegistry::new()?),
            config,
        })
    }

    /// Extract candidates of one category from one image
    ///
    /// # Errors
    /// Returns the final [`ExtractionError`] once retries are exhausted or
    /// the failure is permanent.
    pub async fn extract(
        &self,
        image: &ProcessedImage,
        category: TokenCategory,
    ) -> Result<Vec<TokenCandidate>, ExtractionError> {
        let schema = self
            .schemas
            .document(category)
            .cloned()
            .ok_or_else(|| ExtractionError::SchemaInvalid(format!("no schema for {category}")))?;
        let timeout = self.config.timeout();
        let started = Instant::now();

        let response = self
            .config
            .retry
            .run("extract", |attempt| {
                let request = AnalysisRequest {
                    image: image.clone(),
                    category,
                    schema: schema.clone(),
                    instructions: instructions(category).to_string(),
                };
                let service = self.service.clone();
                async move {
                    tracing::debug!(%category, image_id = %request.image.id, attempt, "extraction attempt");
                    match tokio::time::timeout(timeout, service.analyze(request)).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => Err(ExtractionError::from_service(err, timeout)),
                        Err(_) => Err(ExtractionError::Timeout(timeout)),
                    }
                }
            })
            .await?;

        let candidates = self.schemas.parse(category, response, image.id)?;
        tracing::info!(
            %category,
            image_id = %image.id,
            candidates = candidates.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "extraction complete"
        );
        Ok(candidates)
    }

    /// Delegate readiness to the analysis service
    ///
    /// # Errors
    /// Returns the service's readiness failure.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        self.service.health_check().await
    }

    /// Name of the backing service
    #[inline]
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.service.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MockAnalysisService;
    use chrono::Utc;
    use dtx_core::{Fingerprint, ImageFormat, ImageId, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;

    fn image() -> ProcessedImage {
        ProcessedImage {
            id: ImageId::new(),
            source_url: "https://example.com/a.png".into(),
            fingerprint: Fingerprint::of_source("https://example.com/a.png"),
            width: 1,
            height: 1,
            format: ImageFormat::Png,
            byte_size: 1,
            created_at: Utc::now(),
            data: Arc::from(vec![0u8]),
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            timeout_secs: 5,
            retry: RetryPolicy::default()
                .with_max_attempts(4)
                .with_base_delay(Duration::from_millis(10))
                .with_jitter(0.0),
            ..ExtractionConfig::default()
        }
    }

    fn agent(mock: MockAnalysisService) -> ExtractionAgent {
        ExtractionAgent::with_service(config(), Arc::new(mock)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_succeeds() {
        let mut mock = MockAnalysisService::new();
        mock.expect_name().return_const("mock".to_string());
        let mut seq = mockall::Sequence::new();
        mock.expect_analyze()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(ServiceError::RateLimited { retry_after: None }));
        mock.expect_analyze()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(json!({"colors": [{"name": "primary", "hex": "#FF0000", "confidence": 0.9}]}))
            });

        let image = image();
        let candidates = agent(mock).extract(&image, TokenCategory::Color).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_image, image.id);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_waits_for_server_delay() {
        let mut mock = MockAnalysisService::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_analyze()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(ServiceError::Unavailable {
                    status: 503,
                    retry_after: Some(Duration::from_secs(7)),
                })
            });
        mock.expect_analyze()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json!({"spacing": []})));

        let started = tokio::time::Instant::now();
        agent(mock).extract(&image(), TokenCategory::Spacing).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut mock = MockAnalysisService::new();
        mock.expect_analyze()
            .times(4)
            .returning(|_| Err(ServiceError::Unavailable { status: 503, retry_after: None }));

        let err = agent(mock).extract(&image(), TokenCategory::Color).await.unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn schema_violation_is_not_retried() {
        let mut mock = MockAnalysisService::new();
        mock.expect_analyze()
            .times(1)
            .returning(|_| Ok(json!({"colors": "red"})));

        let err = agent(mock).extract(&image(), TokenCategory::Color).await.unwrap_err();
        assert!(matches!(err, ExtractionError::SchemaInvalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_is_not_retried() {
        let mut mock = MockAnalysisService::new();
        mock.expect_analyze().times(1).returning(|_| {
            Err(ServiceError::Rejected {
                status: 400,
                message: "bad".into(),
            })
        });

        let err = agent(mock).extract(&image(), TokenCategory::Spacing).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Rejected(_)));
    }

    #[tokio::test]
    async fn request_carries_category_schema() {
        let mut mock = MockAnalysisService::new();
        mock.expect_analyze()
            .withf(|request| {
                request.category == TokenCategory::Spacing
                    && request.schema["properties"].get("spacing").is_some()
            })
            .times(1)
            .returning(|_| Ok(json!({"spacing": []})));

        let candidates = agent(mock).extract(&image(), TokenCategory::Spacing).await.unwrap();
        assert!(candidates.is_empty());
    }
}
