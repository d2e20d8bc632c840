//! The engine facade: what a server wraps around the execution core.
//!
//! Owns the long-lived pieces (scheduler, result cache, watchdog) and runs
//! one query end to end: set up the cancellation handle and its deadline,
//! plan on a query-pool worker, execute the root, and hand back the result
//! together with the runtime information tree. Updates go through the
//! single-threaded update lane and are therefore totally ordered.

use std::sync::Arc;
use std::time::Duration;

use corvus_core::TrackedAllocator;
use serde::Serialize;

use crate::cache::{CacheConfig, CacheStatistics, QueryResultCache};
use crate::cancellation::{
    cancel_after_deadline, CancellationHandle, Watchdog, WatchdogConfig,
};
use crate::context::{PinMode, QueryExecutionContext};
use crate::error::QueryError;
use crate::index::PermutationScanner;
use crate::operation::RuntimeInformation;
use crate::planner::{QueryPattern, QueryPlanner};
use crate::result::SharedResult;
use crate::scheduler::{QueryScheduler, SchedulerConfig};

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub watchdog: WatchdogConfig,
    /// Applied when a request does not carry its own limit.
    pub default_time_limit: Duration,
    /// Memory ceiling per query, enforced by the allocator.
    pub memory_budget_per_query: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            watchdog: WatchdogConfig::default(),
            default_time_limit: Duration::from_secs(30),
            memory_budget_per_query: 4 << 30,
        }
    }
}

/// Per-request knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub time_limit: Option<Duration>,
    pub pin_result: bool,
    pub pin_subtrees: bool,
}

/// A completed query: the shared result plus its execution record.
pub struct QueryOutcome {
    pub result: SharedResult,
    pub runtime: RuntimeInformation,
}

pub struct QueryEngine {
    index: Arc<dyn PermutationScanner>,
    cache: Arc<QueryResultCache>,
    scheduler: QueryScheduler,
    watchdog: Watchdog,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(index: Arc<dyn PermutationScanner>, config: EngineConfig) -> Self {
        Self {
            index,
            cache: Arc::new(QueryResultCache::new(config.cache.clone())),
            scheduler: QueryScheduler::new(config.scheduler.clone()),
            watchdog: Watchdog::new(config.watchdog.clone()),
            config,
        }
    }

    /// Plan and execute `pattern` on the query pool, bounded by the time
    /// limit and the per-query memory budget.
    pub fn execute(
        &self,
        pattern: QueryPattern,
        options: ExecuteOptions,
    ) -> Result<QueryOutcome, QueryError> {
        let time_limit = options.time_limit.unwrap_or(self.config.default_time_limit);
        let handle = CancellationHandle::new();
        self.watchdog.register(&handle);
        // The guard disarms the deadline once we are done, error or not.
        let _deadline = cancel_after_deadline(self.scheduler.timer(), &handle, time_limit);

        let ctx = QueryExecutionContext::new(
            self.index.clone(),
            self.cache.clone(),
            TrackedAllocator::with_limit(self.config.memory_budget_per_query),
            handle.clone(),
            time_limit,
            PinMode {
                pin_result: options.pin_result,
                pin_subtrees: options.pin_subtrees,
            },
        );

        let task = self.scheduler.run_query(handle.clone(), move || {
            let tree = QueryPlanner::new(ctx).plan(&pattern)?;
            let result = tree.get_result(true)?;
            Ok(QueryOutcome {
                runtime: tree.runtime_information(),
                result,
            })
        });
        task.join()
    }

    /// Run a write operation on the serialized update lane. The closure has
    /// exclusive access to whatever update state the caller guards with it.
    pub fn execute_update<T, F>(&self, update: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, QueryError> + Send + 'static,
    {
        let handle = CancellationHandle::new();
        self.scheduler.run_update(handle, update).join()
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn clear_unpinned_cache(&self) {
        self.cache.clear_unpinned();
    }

    pub fn cache(&self) -> &Arc<QueryResultCache> {
        &self.cache
    }
}
