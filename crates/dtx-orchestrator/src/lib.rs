//! DTX Orchestrator - runs the token extraction pipeline under load and failure
//!
//! - [`AgentPool`]: global and per-stage concurrency limits with per-unit timeouts
//! - [`CircuitBreaker`] / [`BreakerRegistry`]: failure isolation per dependency
//! - [`PipelineCoordinator`]: task, session and batch execution plus health checks
//!
//! # Example
//!
//! ```rust,ignore
//! use dtx_core::{PipelineConfig, Task, TokenCategory};
//! use dtx_orchestrator::PipelineCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = PipelineCoordinator::new(PipelineConfig::load(None)?)?;
//! let task = Task::new("https://example.com/hero.png", vec![TokenCategory::Color]);
//! let result = coordinator.execute_task(&task).await?;
//!
//! println!("{} tokens", result.tokens.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agent_pool;
pub mod circuit_breaker;
pub mod coordinator;
pub mod error;

pub use agent_pool::{AgentPool, PoolStats, StageStats, WorkRecord, WorkState};
pub use circuit_breaker::{
    BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker, Transition, TransitionCallback,
};
pub use coordinator::{ComponentHealth, HealthReport, PipelineCoordinator, SessionResult, TaskResult};
pub use error::{
    BreakerError, CategoryFailure, PipelineError, PoolError, StageError, TaskError, TaskFailure,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
