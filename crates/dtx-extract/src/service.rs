//! Analysis service seam
//!
//! The extraction agent never talks HTTP directly; it hands an
//! [`AnalysisRequest`] to an [`AnalysisService`] and gets raw JSON back.

use crate::error::ServiceError;
use async_trait::async_trait;
use dtx_core::{ProcessedImage, TokenCategory};
use serde_json::Value;

/// One structured-output request
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Image to analyze
    pub image: ProcessedImage,
    /// Category being extracted
    pub category: TokenCategory,
    /// JSON Schema the response must satisfy
    pub schema: Value,
    /// Category instructions
    pub instructions: String,
}

/// External vision analysis service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Service name for logs and health reports
    fn name(&self) -> &str;

    /// Analyze one image for one category, returning the raw JSON answer
    async fn analyze(&self, request: AnalysisRequest) -> Result<Value, ServiceError>;

    /// Cheap readiness probe
    async fn health_check(&self) -> Result<(), ServiceError>;
}
