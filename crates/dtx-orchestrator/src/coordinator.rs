//! Pipeline coordinator
//!
//! Runs tasks through Preprocess → Extract → Aggregate → Validate:
//! - Every stage call takes a slot in the shared [`AgentPool`]
//! - Downloads and analysis calls sit behind per-dependency circuit breakers,
//!   outside the pool, so a refused call never occupies a slot
//! - Categories are extracted concurrently; a failed category is recorded on
//!   the result and the task continues with the rest
//! - A task fails as a whole only when preprocessing fails or no category
//!   could be extracted

use crate::agent_pool::{AgentPool, PoolStats};
use crate::circuit_breaker::{BreakerRegistry, BreakerSnapshot, Transition, TransitionCallback};
use crate::error::{BreakerError, CategoryFailure, PipelineError, TaskError, TaskFailure};
use dtx_aggregate::AggregationAgent;
use dtx_core::{
    PipelineConfig, PipelineStage, ProcessedImage, SessionId, Task, TaskId, TokenCandidate,
    TokenCategory, ValidatedToken,
};
use dtx_extract::ExtractionAgent;
use dtx_preprocess::{CacheStats, PreprocessingAgent};
use dtx_validate::ValidationAgent;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::Instrument;

/// Upper bound for a single readiness probe
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Output of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub image: ProcessedImage,
    pub tokens: Vec<ValidatedToken>,
    /// Categories that produced nothing; empty on full success
    pub category_errors: Vec<CategoryFailure>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    /// Whether some requested category failed
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.category_errors.is_empty()
    }
}

/// Output of a session: all images aggregated and validated together
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub tokens: Vec<ValidatedToken>,
    pub images: Vec<ProcessedImage>,
    pub category_errors: IndexMap<TaskId, Vec<CategoryFailure>>,
    pub failed_tasks: IndexMap<TaskId, TaskFailure>,
    pub elapsed_ms: u64,
}

/// Readiness of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }

    fn from_probe<E: Display>(probe: Result<Result<(), E>, tokio::time::error::Elapsed>) -> Self {
        match probe {
            Ok(Ok(())) => Self::ok(),
            Ok(Err(err)) => Self::failed(err.to_string()),
            Err(_) => Self::failed(format!("probe timed out after {HEALTH_PROBE_TIMEOUT:?}")),
        }
    }
}

/// Health of every attached agent plus pool and breaker state
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: BTreeMap<&'static str, ComponentHealth>,
    pub open_breakers: Vec<String>,
    pub pool: PoolStats,
}

struct Collected {
    image: ProcessedImage,
    candidates: Vec<TokenCandidate>,
    failures: Vec<CategoryFailure>,
}

/// Runs tasks, sessions and batches through the pipeline
#[derive(Debug)]
pub struct PipelineCoordinator {
    config: PipelineConfig,
    preprocess: PreprocessingAgent,
    extract: ExtractionAgent,
    aggregate: AggregationAgent,
    validate: ValidationAgent,
    pool: AgentPool,
    breakers: BreakerRegistry,
}

impl PipelineCoordinator {
    /// Build every agent from configuration
    ///
    /// # Errors
    /// Fails on invalid configuration or when the analysis client cannot be
    /// built.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let preprocess = PreprocessingAgent::new(&config);
        let extract = ExtractionAgent::new(config.extraction.clone())?;
        Self::with_agents(config, preprocess, extract)
    }

    /// Build around existing preprocessing and extraction agents
    ///
    /// # Errors
    /// Fails on invalid configuration.
    pub fn with_agents(
        config: PipelineConfig,
        preprocess: PreprocessingAgent,
        extract: ExtractionAgent,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            aggregate: AggregationAgent::new(config.aggregation.clone()),
            validate: ValidationAgent::new(config.validation.clone()),
            pool: AgentPool::new(&config.pool),
            breakers: BreakerRegistry::new(config.breaker.clone()),
            preprocess,
            extract,
            config,
        })
    }

    /// With a callback for every breaker transition
    #[must_use]
    pub fn with_transition_callback(mut self, callback: TransitionCallback) -> Self {
        self.breakers = BreakerRegistry::new(self.config.breaker.clone()).with_callback(callback);
        self
    }

    /// Run one task
    ///
    /// # Errors
    /// Returns a [`TaskError`] when preprocessing fails, when every requested
    /// category fails, or when aggregation or validation fails.
    pub async fn execute_task(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let span = tracing::info_span!("task", task_id = %task.id, priority = ?task.priority);
        self.run_task(task).instrument(span).await
    }

    async fn run_task(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let started = Instant::now();
        tracing::info!(source = %task.image_url, categories = ?task.categories, "task started");

        let outcome = async {
            let collected = self.collect(task).await?;
            let tokens = self.finish(collected.candidates).await?;
            Ok::<_, TaskError>((collected.image, tokens, collected.failures))
        }
        .await;

        match outcome {
            Ok((image, tokens, category_errors)) => {
                let elapsed_ms = elapsed_ms(started);
                tracing::info!(
                    tokens = tokens.len(),
                    failed_categories = category_errors.len(),
                    elapsed_ms,
                    "task complete"
                );
                Ok(TaskResult {
                    task_id: task.id,
                    image,
                    tokens,
                    category_errors,
                    elapsed_ms,
                })
            }
            Err(err) => {
                tracing::error!(error = %err, kind = %err.kind(), "task failed");
                Err(err)
            }
        }
    }

    /// Run a session: every task is preprocessed and extracted, then all
    /// candidates are aggregated and validated together
    ///
    /// # Errors
    /// [`PipelineError::EmptySession`] without tasks,
    /// [`PipelineError::SessionFailed`] when no task got past extraction, and
    /// [`PipelineError::Task`] when the shared aggregation or validation fails.
    pub async fn execute_session(
        &self,
        session_id: SessionId,
        tasks: &[Task],
    ) -> Result<SessionResult, PipelineError> {
        if tasks.is_empty() {
            return Err(PipelineError::EmptySession);
        }
        let span = tracing::info_span!("session", %session_id, tasks = tasks.len());
        self.run_session(session_id, tasks).instrument(span).await
    }

    async fn run_session(
        &self,
        session_id: SessionId,
        tasks: &[Task],
    ) -> Result<SessionResult, PipelineError> {
        let started = Instant::now();
        let mut collected: Vec<(usize, TaskId, Result<Collected, TaskError>)> =
            stream::iter(tasks.iter().enumerate())
                .map(|(index, task)| async move {
                    let span = tracing::info_span!("task", task_id = %task.id);
                    (index, task.id, self.collect(task).instrument(span).await)
                })
                .buffer_unordered(self.pool.global_limit().max(1))
                .collect()
                .await;
        collected.sort_by_key(|(index, ..)| *index);

        let mut candidates = Vec::new();
        let mut images = Vec::new();
        let mut category_errors = IndexMap::new();
        let mut failed_tasks = IndexMap::new();
        let mut errors = Vec::new();
        for (_, task_id, outcome) in collected {
            match outcome {
                Ok(found) => {
                    candidates.extend(found.candidates);
                    images.push(found.image);
                    if !found.failures.is_empty() {
                        category_errors.insert(task_id, found.failures);
                    }
                }
                Err(err) => {
                    tracing::warn!(%task_id, error = %err, "session task failed");
                    failed_tasks.insert(task_id, TaskFailure::from(&err));
                    errors.push(err);
                }
            }
        }
        if images.is_empty() {
            tracing::error!(failed = errors.len(), "every session task failed");
            return Err(PipelineError::SessionFailed(errors));
        }

        let tokens = self.finish(candidates).await?;
        let elapsed_ms = elapsed_ms(started);
        tracing::info!(
            tokens = tokens.len(),
            images = images.len(),
            failed_tasks = failed_tasks.len(),
            elapsed_ms,
            "session complete"
        );
        Ok(SessionResult {
            session_id,
            tokens,
            images,
            category_errors,
            failed_tasks,
            elapsed_ms,
        })
    }

    /// Run independent tasks, higher priority first, at most `max_parallel`
    /// at a time; results keep submission order
    pub async fn execute_batch(
        &self,
        tasks: Vec<Task>,
        max_parallel: usize,
    ) -> IndexMap<TaskId, Result<TaskResult, TaskError>> {
        let parallel = max_parallel.clamp(1, self.pool.global_limit().max(1));
        let mut queue: Vec<(usize, Task)> = tasks.into_iter().enumerate().collect();
        // Stable: equal priorities keep submission order.
        queue.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
        tracing::info!(tasks = queue.len(), parallel, "batch started");

        let mut finished: Vec<(usize, TaskId, Result<TaskResult, TaskError>)> = stream::iter(queue)
            .map(|(index, task)| async move {
                let result = self.execute_task(&task).await;
                (index, task.id, result)
            })
            .buffer_unordered(parallel)
            .collect()
            .await;
        finished.sort_by_key(|(index, ..)| *index);
        finished.into_iter().map(|(_, id, result)| (id, result)).collect()
    }

    async fn collect(&self, task: &Task) -> Result<Collected, TaskError> {
        let categories = task.unique_categories();
        if categories.is_empty() {
            return Err(TaskError::NoCategories);
        }

        let image = self.preprocess_image(&task.image_url).await?;
        let outcomes = join_all(
            categories
                .iter()
                .map(|category| self.extract_category(&image, *category)),
        )
        .await;

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(found) => candidates.extend(found),
                Err(failure) => failures.push(failure),
            }
        }
        if failures.len() == categories.len() {
            return Err(TaskError::AllCategoriesFailed(failures));
        }
        Ok(Collected {
            image,
            candidates,
            failures,
        })
    }

    async fn preprocess_image(&self, source: &str) -> Result<ProcessedImage, TaskError> {
        let work = || self.pool.run(PipelineStage::Preprocess, self.preprocess.process(source));
        let result = match download_dependency(source) {
            Some(dependency) => self.breakers.get(&dependency).call(work).await,
            // Unparsable sources are rejected by the validator.
            None => work().await.map_err(BreakerError::Inner),
        };
        result.map_err(TaskError::from_preprocess)
    }

    async fn extract_category(
        &self,
        image: &ProcessedImage,
        category: TokenCategory,
    ) -> Result<Vec<TokenCandidate>, CategoryFailure> {
        let breaker = self.breakers.get(&self.extraction_dependency(category));
        breaker
            .call(|| self.pool.run(PipelineStage::Extract, self.extract.extract(image, category)))
            .await
            .map_err(|err| {
                let failure = CategoryFailure::from_extraction(category, &err);
                tracing::warn!(
                    %category,
                    attempted = failure.attempted,
                    kind = %failure.kind,
                    error = %failure.message,
                    "category extraction failed"
                );
                failure
            })
    }

    async fn finish(&self, candidates: Vec<TokenCandidate>) -> Result<Vec<ValidatedToken>, TaskError> {
        let merged = self
            .pool
            .run(PipelineStage::Aggregate, async move { self.aggregate.aggregate(candidates) })
            .await?;
        let validated = self
            .pool
            .run(PipelineStage::Validate, async move { self.validate.validate(merged) })
            .await?;
        Ok(validated)
    }

    fn extraction_dependency(&self, category: TokenCategory) -> String {
        format!("{}/{}", self.extract.service_name(), category)
    }

    /// Probe every agent concurrently, each bounded by a short timeout
    pub async fn health_check(&self) -> HealthReport {
        let (preprocess, extract) = tokio::join!(
            tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.preprocess.health_check()),
            tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.extract.health_check()),
        );

        let mut components = BTreeMap::new();
        components.insert("preprocess", ComponentHealth::from_probe(preprocess));
        components.insert("extract", ComponentHealth::from_probe(extract));
        components.insert("aggregate", ComponentHealth::ok());
        components.insert("validate", ComponentHealth::ok());
        if self.pool.is_closed() {
            components.insert("pool", ComponentHealth::failed("agent pool closed"));
        } else {
            components.insert("pool", ComponentHealth::ok());
        }

        let healthy = components.values().all(|c| c.healthy);
        if !healthy {
            tracing::warn!(?components, "health check failed");
        }
        HealthReport {
            healthy,
            components,
            open_breakers: self.breakers.open_dependencies(),
            pool: self.pool.stats(),
        }
    }

    /// Stop admitting stage work
    pub fn shutdown(&self) {
        tracing::info!("coordinator shutting down");
        self.pool.close();
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pool counters
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// State of every breaker used so far
    #[must_use]
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Breaker transitions from now on
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.breakers.subscribe()
    }

    /// Preprocessing cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.preprocess.cache_stats()
    }
}

fn download_dependency(source: &str) -> Option<String> {
    let url = url::Url::parse(source).ok()?;
    url.host_str().map(|host| format!("download/{}", host.to_ascii_lowercase()))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
