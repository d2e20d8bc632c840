//! Per-query execution context.
//!
//! Everything an operator needs at runtime travels in one shared context:
//! the budgeted allocator, the result cache, the cancellation handle, the
//! time budget and the pinning request. Contexts are cheap to share and
//! live exactly as long as the query.

use std::sync::Arc;
use std::time::Duration;

use corvus_core::TrackedAllocator;

use crate::cache::QueryResultCache;
use crate::cancellation::{CancellationHandle, SharedCancellationHandle};
use crate::error::QueryError;
use crate::index::PermutationScanner;
use crate::sort_estimator::SortPerformanceEstimator;

/// What the client asked to pin.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinMode {
    /// Pin the root result.
    pub pin_result: bool,
    /// Pin every subtree result along the way.
    pub pin_subtrees: bool,
}

/// Shared state for one query execution.
pub struct QueryExecutionContext {
    allocator: TrackedAllocator,
    cache: Arc<QueryResultCache>,
    cancellation: SharedCancellationHandle,
    time_limit: Duration,
    pin: PinMode,
    index: Arc<dyn PermutationScanner>,
    sort_estimator: SortPerformanceEstimator,
}

/// Operators hold the context by `Arc`; plans form a DAG over it.
pub type SharedExecutionContext = Arc<QueryExecutionContext>;

impl QueryExecutionContext {
    pub fn new(
        index: Arc<dyn PermutationScanner>,
        cache: Arc<QueryResultCache>,
        allocator: TrackedAllocator,
        cancellation: SharedCancellationHandle,
        time_limit: Duration,
        pin: PinMode,
    ) -> SharedExecutionContext {
        Arc::new(Self {
            allocator,
            cache,
            cancellation,
            time_limit,
            pin,
            index,
            sort_estimator: SortPerformanceEstimator,
        })
    }

    /// Context with defaults for tests and embedded use: unlimited memory,
    /// fresh cache, no deadline enforcement beyond the handle.
    pub fn for_tests(index: Arc<dyn PermutationScanner>) -> SharedExecutionContext {
        Self::new(
            index,
            Arc::new(QueryResultCache::default()),
            TrackedAllocator::unlimited(),
            CancellationHandle::new(),
            Duration::from_secs(60),
            PinMode::default(),
        )
    }

    pub fn allocator(&self) -> &TrackedAllocator {
        &self.allocator
    }

    pub fn cache(&self) -> &QueryResultCache {
        &self.cache
    }

    pub fn cancellation(&self) -> &SharedCancellationHandle {
        &self.cancellation
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn pin(&self) -> PinMode {
        self.pin
    }

    pub fn index(&self) -> &dyn PermutationScanner {
        self.index.as_ref()
    }

    pub fn sort_estimator(&self) -> &SortPerformanceEstimator {
        &self.sort_estimator
    }

    /// Probe shorthand used on every child dispatch and loop boundary.
    #[inline]
    pub fn check_cancellation(&self) -> Result<(), QueryError> {
        self.cancellation.throw_if_cancelled()
    }
}
