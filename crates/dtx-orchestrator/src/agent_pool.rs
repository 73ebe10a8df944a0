//! Agent pool for bounded stage execution
//!
//! Every unit of work takes its stage permit, then a global permit, and is
//! tracked through pending → running → completed | failed | timed-out:
//! - Stage limits and the global limit are counting semaphores
//! - Each unit carries the stage timeout; expiry abandons the work
//! - Permits and counters are released on every exit path, including a
//!   caller dropping the future
//!
//! The stage permit is taken first so that work queued behind a saturated
//! stage never sits on a global slot.

use crate::error::{PoolError, StageError};
use dashmap::DashMap;
use dtx_core::{PipelineStage, PoolConfig, StageSettings};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Lifecycle state of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Waiting for permits
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// Unit of work currently held by the pool
#[derive(Debug, Clone, Serialize)]
pub struct WorkRecord {
    pub id: u64,
    pub stage: PipelineStage,
    pub state: WorkState,
    #[serde(skip)]
    pub admitted_at: Instant,
}

/// Per-stage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub limit: usize,
    pub active: usize,
    /// Highest simultaneous active count observed
    pub peak: usize,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub global_limit: usize,
    pub pending: usize,
    pub active: usize,
    pub peak: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub stages: BTreeMap<PipelineStage, StageStats>,
}

#[derive(Debug)]
struct StageSlot {
    settings: StageSettings,
    permits: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl StageSlot {
    fn new(settings: StageSettings) -> Self {
        Self {
            settings,
            permits: Semaphore::new(settings.max_concurrency.max(1)),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn stats(&self) -> StageStats {
        StageStats {
            limit: self.settings.max_concurrency,
            active: self.active.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    global_limit: usize,
    global: Semaphore,
    preprocess: StageSlot,
    extract: StageSlot,
    aggregate: StageSlot,
    validate: StageSlot,
    records: DashMap<u64, WorkRecord>,
    next_id: AtomicU64,
    pending: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    timed_out: AtomicUsize,
}

impl PoolInner {
    fn slot(&self, stage: PipelineStage) -> &StageSlot {
        match stage {
            PipelineStage::Preprocess => &self.preprocess,
            PipelineStage::Extract => &self.extract,
            PipelineStage::Aggregate => &self.aggregate,
            PipelineStage::Validate => &self.validate,
        }
    }
}

/// Accounting handle for one unit of work
///
/// Dropping an unfinished ticket counts the work as failed.
struct Ticket<'a> {
    pool: &'a PoolInner,
    id: u64,
    stage: PipelineStage,
    state: WorkState,
}

impl<'a> Ticket<'a> {
    fn admit(pool: &'a PoolInner, stage: PipelineStage) -> Self {
        let id = pool.next_id.fetch_add(1, Ordering::Relaxed);
        pool.records.insert(
            id,
            WorkRecord {
                id,
                stage,
                state: WorkState::Pending,
                admitted_at: Instant::now(),
            },
        );
        pool.pending.fetch_add(1, Ordering::SeqCst);
        Self {
            pool,
            id,
            stage,
            state: WorkState::Pending,
        }
    }

    fn start(&mut self) {
        let pool = self.pool;
        let slot = pool.slot(self.stage);
        pool.pending.fetch_sub(1, Ordering::SeqCst);
        let active = pool.active.fetch_add(1, Ordering::SeqCst) + 1;
        pool.peak.fetch_max(active, Ordering::SeqCst);
        let stage_active = slot.active.fetch_add(1, Ordering::SeqCst) + 1;
        slot.peak.fetch_max(stage_active, Ordering::SeqCst);
        if let Some(mut record) = pool.records.get_mut(&self.id) {
            record.state = WorkState::Running;
        }
        self.state = WorkState::Running;
    }

    fn finish(&mut self, outcome: WorkState) {
        let pool = self.pool;
        match self.state {
            WorkState::Pending => {
                pool.pending.fetch_sub(1, Ordering::SeqCst);
            }
            WorkState::Running => {
                pool.active.fetch_sub(1, Ordering::SeqCst);
                pool.slot(self.stage).active.fetch_sub(1, Ordering::SeqCst);
                let counter = match outcome {
                    WorkState::Completed => &pool.completed,
                    WorkState::TimedOut => &pool.timed_out,
                    _ => &pool.failed,
                };
                counter.fetch_add(1, Ordering::SeqCst);
            }
            WorkState::Completed | WorkState::Failed | WorkState::TimedOut => return,
        }
        pool.records.remove(&self.id);
        self.state = outcome;
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if matches!(self.state, WorkState::Pending | WorkState::Running) {
            tracing::debug!(stage = %self.stage, work_id = self.id, "work dropped before completion");
            self.finish(WorkState::Failed);
        }
    }
}

/// Bounded-concurrency gate shared by every task of a coordinator
#[derive(Debug, Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

impl AgentPool {
    /// Create pool with the given limits
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                global_limit: config.global_limit,
                global: Semaphore::new(config.global_limit.max(1)),
                preprocess: StageSlot::new(config.preprocess),
                extract: StageSlot::new(config.extract),
                aggregate: StageSlot::new(config.aggregate),
                validate: StageSlot::new(config.validate),
                records: DashMap::new(),
                next_id: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                timed_out: AtomicUsize::new(0),
            }),
        }
    }

    /// Run `work` under the stage's limit and timeout
    ///
    /// # Errors
    /// [`StageError::Pool`] when the pool is closed or the stage timeout
    /// expires; [`StageError::Work`] when the work itself fails.
    pub async fn run<T, E, Fut>(&self, stage: PipelineStage, work: Fut) -> Result<T, StageError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let timeout = self.inner.slot(stage).settings.timeout();
        self.run_with_timeout(stage, timeout, work).await
    }

    /// Run `work` under the stage's limit with an explicit timeout
    ///
    /// # Errors
    /// See [`AgentPool::run`].
    pub async fn run_with_timeout<T, E, Fut>(
        &self,
        stage: PipelineStage,
        timeout: Duration,
        work: Fut,
    ) -> Result<T, StageError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let pool = &*self.inner;
        let mut ticket = Ticket::admit(pool, stage);
        let _stage_permit = pool
            .slot(stage)
            .permits
            .acquire()
            .await
            .map_err(|_| PoolError::Closed)?;
        let _global_permit = pool.global.acquire().await.map_err(|_| PoolError::Closed)?;
        ticket.start();

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(value)) => {
                ticket.finish(WorkState::Completed);
                Ok(value)
            }
            Ok(Err(err)) => {
                ticket.finish(WorkState::Failed);
                Err(StageError::Work(err))
            }
            Err(_) => {
                tracing::warn!(%stage, work_id = ticket.id, ?timeout, "stage work timed out");
                ticket.finish(WorkState::TimedOut);
                Err(PoolError::Timeout { stage, after: timeout }.into())
            }
        }
    }

    /// Stop admitting work; queued and future callers get [`PoolError::Closed`]
    pub fn close(&self) {
        let pool = &*self.inner;
        pool.global.close();
        for stage in PipelineStage::ALL {
            pool.slot(stage).permits.close();
        }
    }

    /// Whether [`AgentPool::close`] was called
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.global.is_closed()
    }

    /// Work currently pending or running, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<WorkRecord> {
        let mut records: Vec<WorkRecord> = self.inner.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Snapshot of counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let pool = &*self.inner;
        PoolStats {
            global_limit: pool.global_limit,
            pending: pool.pending.load(Ordering::SeqCst),
            active: pool.active.load(Ordering::SeqCst),
            peak: pool.peak.load(Ordering::SeqCst),
            completed: pool.completed.load(Ordering::SeqCst),
            failed: pool.failed.load(Ordering::SeqCst),
            timed_out: pool.timed_out.load(Ordering::SeqCst),
            stages: PipelineStage::ALL
                .into_iter()
                .map(|stage| (stage, pool.slot(stage).stats()))
                .collect(),
        }
    }

    /// Global limit
    #[inline]
    #[must_use]
    pub fn global_limit(&self) -> usize {
        self.inner.global_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn pool(global: usize, extract: usize) -> AgentPool {
        AgentPool::new(
            &PoolConfig::default()
                .with_global_limit(global)
                .with_stage(PipelineStage::Extract, StageSettings::new(extract, 5)),
        )
    }

    async fn nap(ms: u64) -> Result<(), Infallible> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stage_peak_never_exceeds_limit() {
        let pool = pool(10, 2);
        let results = join_all((0..7).map(|_| pool.run(PipelineStage::Extract, nap(50)))).await;
        assert!(results.iter().all(Result::is_ok));

        let stats = pool.stats();
        assert_eq!(stats.stages[&PipelineStage::Extract].peak, 2);
        assert_eq!(stats.completed, 7);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn global_limit_caps_all_stages() {
        let config = PoolConfig::default()
            .with_global_limit(3)
            .with_stage(PipelineStage::Preprocess, StageSettings::new(4, 5))
            .with_stage(PipelineStage::Extract, StageSettings::new(4, 5));
        let pool = AgentPool::new(&config);

        let work = (0..8).map(|i| {
            let stage = if i % 2 == 0 { PipelineStage::Preprocess } else { PipelineStage::Extract };
            pool.run(stage, nap(20))
        });
        join_all(work).await;

        let stats = pool.stats();
        assert_eq!(stats.peak, 3);
        assert_eq!(stats.completed, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_slot() {
        let pool = pool(1, 1);
        let hung = pool
            .run_with_timeout(PipelineStage::Extract, Duration::from_secs(1), async {
                std::future::pending::<Result<(), Infallible>>().await
            })
            .await;
        assert!(matches!(
            hung,
            Err(StageError::Pool(PoolError::Timeout { stage: PipelineStage::Extract, .. }))
        ));

        // The single slot is free again.
        let next = pool.run(PipelineStage::Extract, nap(1)).await;
        assert!(next.is_ok());

        let stats = pool.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn work_failure_is_counted() {
        let pool = pool(2, 2);
        let result: Result<(), StageError<&str>> =
            pool.run(PipelineStage::Validate, async { Err("bad token") }).await;
        assert_eq!(result, Err(StageError::Work("bad token")));
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_work_releases_slot() {
        let pool = pool(1, 1);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            pool.run(PipelineStage::Extract, nap(10_000)),
        )
        .await;
        assert!(abandoned.is_err());

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.failed, 1);
        assert!(pool.records().is_empty());
        assert!(pool.run(PipelineStage::Extract, nap(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn records_track_pending_and_running() {
        let pool = pool(1, 1);
        let first = pool.run(PipelineStage::Extract, nap(100));
        let second = pool.run(PipelineStage::Extract, nap(100));
        let observer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let states: Vec<WorkState> = pool.records().iter().map(|r| r.state).collect();
            assert_eq!(states, vec![WorkState::Running, WorkState::Pending]);
            assert_eq!(pool.stats().pending, 1);
            Ok::<(), Infallible>(())
        };
        let (a, b, c) = tokio::join!(first, second, observer);
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
    }

    #[tokio::test]
    async fn closed_pool_refuses_work() {
        let pool = pool(2, 2);
        pool.close();
        assert!(pool.is_closed());
        let result = pool.run(PipelineStage::Extract, nap(1)).await;
        assert!(matches!(result, Err(StageError::Pool(PoolError::Closed))));
        assert_eq!(pool.stats().pending, 0);
    }
}
