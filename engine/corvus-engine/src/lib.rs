//! # Corvus Engine
//!
//! Query execution core of the Corvus SPARQL engine: the physical plan as
//! a tree of operators over columnar id tables, UNDEF-aware sorted-merge
//! join kernels, a pinned fingerprint-keyed result cache, cooperative
//! cancellation with deadlines and a watchdog, and the worker pools that
//! run it all.
//!
//! The on-disk index, the SPARQL parser and the HTTP transport are
//! deliberately outside: the engine consumes an already-parsed
//! [`QueryPattern`](planner::QueryPattern) and reaches the index only
//! through the [`PermutationScanner`](index::PermutationScanner) trait.

pub mod cache;
pub mod cancellation;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod index;
pub mod join;
pub mod operation;
pub mod ops;
pub mod planner;
pub mod result;
pub mod scheduler;
pub mod sort_estimator;
pub mod tree;
pub mod variable;

pub use cache::{CacheConfig, CacheStatistics, CacheStatus, QueryResultCache};
pub use cancellation::{
    cancel_after_deadline, CancellationHandle, DeadlineGuard, SharedCancellationHandle, Watchdog,
    WatchdogConfig,
};
pub use context::{PinMode, QueryExecutionContext, SharedExecutionContext};
pub use engine::{EngineConfig, ExecuteOptions, QueryEngine, QueryOutcome};
pub use error::{compose_error_response, CancellationReason, QueryError};
pub use expr::Expression;
pub use index::{MemoryIndex, Permutation, PermutationScanner};
pub use operation::{Operation, RuntimeInformation};
pub use planner::{QueryPattern, QueryPlanner, TermPattern};
pub use result::{QueryResult, SharedResult};
pub use scheduler::{QueryScheduler, SchedulerConfig, TaskHandle, TimerExecutor, WorkerPool};
pub use sort_estimator::SortPerformanceEstimator;
pub use tree::{QueryExecutionTree, SharedTree};
pub use variable::{ColumnIndex, Variable, VariableColumnMap};
