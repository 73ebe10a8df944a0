//! Circuit breakers for external dependencies
//!
//! One breaker per named dependency. Closed counts consecutive failures and
//! opens at the threshold; open refuses calls until the recovery timeout has
//! elapsed; half-open lets exactly one trial call through at a time, closing
//! after enough successes and reopening on any failure. Failure kinds listed
//! in [`BreakerConfig::excluded_kinds`] never count.
//!
//! Transitions are reported to an optional callback and published on a
//! broadcast channel.

use crate::error::BreakerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dtx_core::{BreakerConfig, Classify};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        })
    }
}

/// State change of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub dependency: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Calls refused without reaching the dependency
    pub rejected_calls: u64,
    pub last_transition: Option<DateTime<Utc>>,
}

/// Transition callback
pub type TransitionCallback = Arc<dyn Fn(&Transition) + Send + Sync>;

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
    last_transition: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            trial_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
            last_transition: None,
        }
    }

    fn move_to(&mut self, name: &str, to: BreakerState) -> Transition {
        let from = self.state;
        let at = Utc::now();
        self.state = to;
        self.last_transition = Some(at);
        match to {
            BreakerState::Open => {
                self.opened_at = Some(Instant::now());
                self.half_open_successes = 0;
            }
            BreakerState::HalfOpen => self.half_open_successes = 0,
            BreakerState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
                self.half_open_successes = 0;
            }
        }
        self.trial_in_flight = false;
        Transition {
            dependency: name.to_string(),
            from,
            to,
            at,
        }
    }
}

/// Admission granted by [`CircuitBreaker::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the call never reports back
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            if inner.state == BreakerState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }
}

/// Failure-isolation state machine for one dependency
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: broadcast::Sender<Transition>,
    callback: Option<TransitionCallback>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            events,
            callback: None,
        }
    }

    /// With transition callback
    #[must_use]
    pub fn with_callback(mut self, callback: TransitionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    fn with_events(mut self, events: broadcast::Sender<Transition>) -> Self {
        self.events = events;
        self
    }

    /// Dependency name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Receive future transitions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    /// Snapshot of state and counters
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            last_transition: inner.last_transition,
        }
    }

    /// Run `call` unless the circuit refuses it
    ///
    /// # Errors
    /// [`BreakerError::Open`] when refused, [`BreakerError::Inner`] when the
    /// call failed.
    pub async fn call<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        E: Classify,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return call().await.map_err(BreakerError::Inner);
        }

        let admission = self.admit().ok_or_else(|| BreakerError::Open {
            dependency: self.name.clone(),
        })?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = call().await;
        guard.armed = false;
        match &result {
            Ok(_) => self.on_success(),
            Err(err) => {
                let kind = err.failure_kind();
                if self.config.counts(kind) {
                    self.on_failure();
                } else {
                    tracing::debug!(dependency = %self.name, %kind, "failure excluded from breaker");
                    self.on_neutral();
                }
            }
        }
        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> Option<Admission> {
        let mut transition = None;
        let admission = {
            let mut inner = self.inner.lock();
            let admission = match inner.state {
                BreakerState::Closed => Some(Admission::Normal),
                BreakerState::Open => {
                    let recovered = inner
                        .opened_at
                        .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout());
                    if recovered {
                        transition = Some(inner.move_to(&self.name, BreakerState::HalfOpen));
                        inner.trial_in_flight = true;
                        Some(Admission::Trial)
                    } else {
                        None
                    }
                }
                BreakerState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
                BreakerState::HalfOpen => None,
            };
            match admission {
                Some(_) => inner.total_calls += 1,
                None => inner.rejected_calls += 1,
            }
            admission
        };
        self.publish(transition);
        admission
    }

    fn on_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                BreakerState::HalfOpen => {
                    inner.half_open_successes += 1;
                    inner.trial_in_flight = false;
                    (inner.half_open_successes >= self.config.success_threshold)
                        .then(|| inner.move_to(&self.name, BreakerState::Closed))
                }
                // Late answer from a call admitted before the circuit opened.
                BreakerState::Open => None,
            }
        };
        self.publish(transition);
    }

    fn on_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.total_failures += 1;
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures += 1;
                    (inner.consecutive_failures >= self.config.failure_threshold)
                        .then(|| inner.move_to(&self.name, BreakerState::Open))
                }
                BreakerState::HalfOpen => Some(inner.move_to(&self.name, BreakerState::Open)),
                BreakerState::Open => None,
            }
        };
        self.publish(transition);
    }

    fn on_neutral(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn publish(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        tracing::warn!(
            dependency = %transition.dependency,
            from = %transition.from,
            to = %transition.to,
            "circuit breaker transition"
        );
        if let Some(callback) = &self.callback {
            callback(&transition);
        }
        // No subscribers is fine.
        let _ = self.events.send(transition);
    }
}

/// Breakers keyed by dependency name, created on first use
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    events: broadcast::Sender<Transition>,
    callback: Option<TransitionCallback>,
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl BreakerRegistry {
    /// Create empty registry; every breaker shares `config`
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            breakers: DashMap::new(),
            events,
            callback: None,
        }
    }

    /// With callback applied to every breaker created afterwards
    #[must_use]
    pub fn with_callback(mut self, callback: TransitionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Breaker for `dependency`
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(dependency) {
            return breaker.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(dependency, self.config.clone())
                    .with_events(self.events.clone());
                breaker.callback = self.callback.clone();
                Arc::new(breaker)
            })
            .clone()
    }

    /// Transitions of every breaker in this registry
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    /// Snapshots sorted by name
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Names of breakers currently open
    #[must_use]
    pub fn open_dependencies(&self) -> Vec<String> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.state == BreakerState::Open)
            .map(|s| s.name)
            .collect()
    }
}
