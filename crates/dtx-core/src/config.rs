//! Pipeline configuration
//!
//! [`PipelineConfig`] aggregates one section per component. Every section
//! has defaults so a bare `PipelineConfig::default()` is usable; files are
//! TOML and `DTX_*` environment variables override individual values.
//!
//! ```toml
//! [pool]
//! global_limit = 10
//!
//! [pool.extract]
//! max_concurrency = 5
//! timeout_secs = 360
//!
//! [breaker]
//! failure_threshold = 5
//! recovery_timeout_secs = 30
//! ```

use crate::error::CoreError;
use crate::failure::FailureKind;
use crate::retry::RetryPolicy;
use crate::types::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// URL admission rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Accepted URL schemes
    pub allowed_schemes: Vec<String>,
    /// Hosts exempt from the private-address check (internal CDNs)
    pub allowed_hosts: Vec<String>,
    /// Longest accepted URL
    pub max_url_length: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".into(), "https".into()],
            allowed_hosts: Vec::new(),
            max_url_length: 2048,
        }
    }
}

impl ValidatorConfig {
    /// With an additional allowlisted host
    #[inline]
    #[must_use]
    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into().to_ascii_lowercase());
        self
    }

    /// Whether `host` is allowlisted
    #[must_use]
    pub fn is_allowed_host(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }
}

/// Image download limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Hard cap on response body size
    pub max_bytes: u64,
    /// Redirect hops followed (each re-validated)
    pub max_redirects: usize,
    /// `User-Agent` header
    pub user_agent: String,
    /// Retry policy for 5xx and network errors
    pub retry: RetryPolicy,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 10 * 1024 * 1024,
            max_redirects: 3,
            user_agent: format!("dtx/{}", crate::VERSION),
            retry: RetryPolicy::default(),
        }
    }
}

impl DownloadConfig {
    /// Request timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// With size cap
    #[inline]
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Pixel normalization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Bounding box width
    pub max_width: u32,
    /// Bounding box height
    pub max_height: u32,
    /// Apply local contrast enhancement
    pub contrast: bool,
    /// CLAHE tiles per axis
    pub clahe_tiles: u32,
    /// CLAHE clip limit (multiple of the mean bin height)
    pub clahe_clip_limit: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            max_width: 2048,
            max_height: 2048,
            contrast: true,
            clahe_tiles: 8,
            clahe_clip_limit: 2.0,
        }
    }
}

/// Preprocessing cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries
    pub capacity: u64,
    /// Time to live
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// Entry time to live
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// External analysis service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Chat-completions endpoint
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Response token budget
    pub max_tokens: u32,
    /// Retry policy for timeouts, 429 and 5xx
    pub retry: RetryPolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 60,
            max_tokens: 4096,
            retry: RetryPolicy::default().with_max_attempts(4),
        }
    }
}

impl ExtractionConfig {
    /// Per-call timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// With endpoint
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Deduplication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Merge threshold in CIEDE2000 units
    pub jnd_threshold: f64,
    /// Rounding step when comparing non-color values
    pub value_precision: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            jnd_threshold: 2.0,
            value_precision: 0.01,
        }
    }
}

/// What happens to structurally invalid tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Invalid tokens are dropped
    Strict,
    /// Invalid tokens are kept with their errors
    #[default]
    Lenient,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::Strict => f.write_str("strict"),
            ValidationMode::Lenient => f.write_str("lenient"),
        }
    }
}

impl FromStr for ValidationMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ValidationMode::Strict),
            "lenient" => Ok(ValidationMode::Lenient),
            other => Err(CoreError::UnknownValidationMode(other.to_string())),
        }
    }
}

/// Validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: ValidationMode,
    /// Confidence below this raises a warning
    pub low_confidence_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Lenient,
            low_confidence_threshold: 0.5,
        }
    }
}

/// Concurrency limit and timeout for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Simultaneously running units of this stage
    pub max_concurrency: usize,
    /// Per-unit timeout
    pub timeout_secs: u64,
}

impl StageSettings {
    #[inline]
    #[must_use]
    pub const fn new(max_concurrency: usize, timeout_secs: u64) -> Self {
        Self {
            max_concurrency,
            timeout_secs,
        }
    }

    /// Per-unit timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Agent pool limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound across all stages
    pub global_limit: usize,
    pub preprocess: StageSettings,
    pub extract: StageSettings,
    pub aggregate: StageSettings,
    pub validate: StageSettings,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            global_limit: 10,
            preprocess: StageSettings::new(4, 180),
            extract: StageSettings::new(5, 360),
            aggregate: StageSettings::new(2, 30),
            validate: StageSettings::new(2, 30),
        }
    }
}

impl PoolConfig {
    /// Settings for a stage
    #[inline]
    #[must_use]
    pub fn stage(&self, stage: PipelineStage) -> StageSettings {
        match stage {
            PipelineStage::Preprocess => self.preprocess,
            PipelineStage::Extract => self.extract,
            PipelineStage::Aggregate => self.aggregate,
            PipelineStage::Validate => self.validate,
        }
    }

    /// With global limit
    #[inline]
    #[must_use]
    pub fn with_global_limit(mut self, limit: usize) -> Self {
        self.global_limit = limit;
        self
    }

    /// With settings for one stage
    #[inline]
    #[must_use]
    pub fn with_stage(mut self, stage: PipelineStage, settings: StageSettings) -> Self {
        match stage {
            PipelineStage::Preprocess => self.preprocess = settings,
            PipelineStage::Extract => self.extract = settings,
            PipelineStage::Aggregate => self.aggregate = settings,
            PipelineStage::Validate => self.validate = settings,
        }
        self
    }
}

/// Circuit breaker settings (one breaker per dependency)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Guard dependency calls at all
    pub enabled: bool,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before a trial call
    pub recovery_timeout_secs: u64,
    /// Half-open successes that close the circuit
    pub success_threshold: u32,
    /// Failure kinds that never count against the dependency
    pub excluded_kinds: Vec<FailureKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            success_threshold: 1,
            excluded_kinds: vec![FailureKind::Cancelled, FailureKind::Rejected],
        }
    }
}

impl BreakerConfig {
    /// Recovery timeout
    #[inline]
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// With failure threshold
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// With recovery timeout
    #[inline]
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout_secs = timeout.as_secs();
        self
    }

    /// Whether failures of this kind count
    #[inline]
    #[must_use]
    pub fn counts(&self, kind: FailureKind) -> bool {
        !self.excluded_kinds.contains(&kind)
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validator: ValidatorConfig,
    pub download: DownloadConfig,
    pub enhance: EnhanceConfig,
    pub cache: CacheConfig,
    pub extraction: ExtractionConfig,
    pub aggregation: AggregationConfig,
    pub validation: ValidationConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
}

impl PipelineConfig {
    /// Parse from TOML
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigParse`] on malformed TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns [`CoreError::Io`] if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| CoreError::io_error(path, e))?;
        Self::from_toml_str(&content)
    }

    /// File (if any) + process environment + validation
    ///
    /// # Errors
    /// Fails on unreadable files, bad overrides or out-of-range values.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DTX_*` overrides from `lookup`
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidEnv`] when a value does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_value(&lookup, "DTX_GLOBAL_CONCURRENCY")? {
            self.pool.global_limit = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_BREAKER_FAILURE_THRESHOLD")? {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_BREAKER_RECOVERY_SECS")? {
            self.breaker.recovery_timeout_secs = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_DOWNLOAD_TIMEOUT_SECS")? {
            self.download.timeout_secs = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_DOWNLOAD_MAX_BYTES")? {
            self.download.max_bytes = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_JND_THRESHOLD")? {
            self.aggregation.jnd_threshold = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_VALIDATION_MODE")? {
            self.validation.mode = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_ANALYSIS_ENDPOINT")? {
            self.extraction.endpoint = v;
        }
        if let Some(v) = env_value(&lookup, "DTX_ANALYSIS_MODEL")? {
            self.extraction.model = v;
        }
        Ok(())
    }

    /// Check limits and thresholds
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pool.global_limit == 0 {
            return Err(invalid("pool.global_limit must be > 0"));
        }
        for stage in PipelineStage::ALL {
            let settings = self.pool.stage(stage);
            if settings.max_concurrency == 0 {
                return Err(invalid(format!("pool.{stage}.max_concurrency must be > 0")));
            }
            if settings.timeout_secs == 0 {
                return Err(invalid(format!("pool.{stage}.timeout_secs must be > 0")));
            }
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(invalid("breaker thresholds must be > 0"));
        }
        if self.download.max_bytes == 0 || self.download.timeout_secs == 0 {
            return Err(invalid("download limits must be > 0"));
        }
        if self.download.retry.max_attempts == 0 || self.extraction.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be > 0"));
        }
        let budgets = [
            (PipelineStage::Preprocess, "download", self.download.retry.worst_case(self.download.timeout())),
            (PipelineStage::Extract, "extraction", self.extraction.retry.worst_case(self.extraction.timeout())),
        ];
        for (stage, section, budget) in budgets {
            let stage_timeout = self.pool.stage(stage).timeout();
            if stage_timeout < budget {
                return Err(invalid(format!(
                    "pool.{stage}.timeout_secs ({}s) is shorter than the {section} retry budget ({}s)",
                    stage_timeout.as_secs(),
                    budget.as_secs_f64().ceil()
                )));
            }
        }
        if !(self.aggregation.jnd_threshold > 0.0 && self.aggregation.jnd_threshold.is_finite()) {
            return Err(invalid("aggregation.jnd_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.validation.low_confidence_threshold) {
            return Err(invalid("validation.low_confidence_threshold must be in [0, 1]"));
        }
        if self.enhance.max_width == 0 || self.enhance.max_height == 0 {
            return Err(invalid("enhance bounding box must be non-empty"));
        }
        if self.extraction.endpoint.trim().is_empty() {
            return Err(invalid("extraction.endpoint must be set"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::InvalidConfig(message.into())
}

fn env_value<T, F>(lookup: &F, var: &str) -> Result<Option<T>, CoreError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::InvalidEnv {
                var: var.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.validation.mode, ValidationMode::Lenient);
        assert_eq!(config.download.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.extraction.retry.max_attempts, 4);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [pool]
            global_limit = 3

            [pool.extract]
            max_concurrency = 2
            timeout_secs = 5

            [validation]
            mode = "strict"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.global_limit, 3);
        assert_eq!(config.pool.extract, StageSettings::new(2, 5));
        assert_eq!(config.pool.preprocess, PoolConfig::default().preprocess);
        assert_eq!(config.validation.mode, ValidationMode::Strict);
        assert_eq!(config.breaker, BreakerConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("DTX_GLOBAL_CONCURRENCY", "7"),
            ("DTX_JND_THRESHOLD", "3.5"),
            ("DTX_VALIDATION_MODE", "STRICT"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env(|var| env.get(var).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.pool.global_limit, 7);
        assert!((config.aggregation.jnd_threshold - 3.5).abs() < f64::EPSILON);
        assert_eq!(config.validation.mode, ValidationMode::Strict);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|var| (var == "DTX_DOWNLOAD_MAX_BYTES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DTX_DOWNLOAD_MAX_BYTES"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = PipelineConfig::default();
        config.pool.validate.max_concurrency = 0;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.aggregation.jnd_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stage_timeout_must_cover_retry_budget() {
        let config = PipelineConfig::default();
        assert!(
            config.pool.extract.timeout()
                >= config.extraction.retry.worst_case(config.extraction.timeout())
        );
        assert!(
            config.pool.preprocess.timeout()
                >= config.download.retry.worst_case(config.download.timeout())
        );

        let mut config = PipelineConfig::default();
        config.pool.extract.timeout_secs = 120;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool.extract.timeout_secs"), "{err}");

        let mut config = PipelineConfig::default();
        config.download.timeout_secs = 90;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("download retry budget"), "{err}");

        let mut config = PipelineConfig::default();
        config.extraction.retry = RetryPolicy::no_retry();
        config.pool.extract.timeout_secs = 60;
        config.validate().unwrap();
    }

    #[test]
    fn breaker_excludes_cancellation() {
        let breaker = BreakerConfig::default();
        assert!(!breaker.counts(FailureKind::Cancelled));
        assert!(breaker.counts(FailureKind::Timeout));
    }

    #[test]
    fn allowlist_is_case_insensitive() {
        let validator = ValidatorConfig::default().with_allowed_host("CDN.internal");
        assert!(validator.is_allowed_host("cdn.INTERNAL"));
        assert!(!validator.is_allowed_host("other.internal"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nglobal_limit = 3\n\n[validation]\nmode = \"strict\"").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pool.global_limit, 3);
        assert_eq!(config.validation.mode, ValidationMode::Strict);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = PipelineConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
