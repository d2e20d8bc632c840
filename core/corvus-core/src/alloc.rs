//! Memory-budgeted allocation tracking for query intermediates.
//!
//! Every `IdTable` routes its growth through a [`TrackedAllocator`]. The
//! allocator does not own memory itself; it accounts bytes against a budget
//! shared between all clones, so a single per-query ceiling covers every
//! intermediate result of that query. Exceeding the budget is an ordinary
//! error that unwinds the current operator, never a process abort.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Raised when a reservation would push usage past the budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("memory budget exceeded: requested {requested} bytes, {available} of {limit} available")]
pub struct AllocationError {
    pub requested: usize,
    pub available: usize,
    pub limit: usize,
}

#[derive(Debug)]
struct Budget {
    limit: usize,
    used: AtomicUsize,
}

/// Byte-accounting allocator with a shared upper limit.
///
/// Clones share the same budget. `try_reserve` and `release` are lock-free;
/// concurrent reservations may transiently overshoot by at most the size of
/// a single failed request, which is then backed out.
#[derive(Debug, Clone)]
pub struct TrackedAllocator {
    budget: Arc<Budget>,
}

impl TrackedAllocator {
    /// An allocator with a byte ceiling.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            budget: Arc::new(Budget {
                limit,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// An allocator that never fails. Used by tests and by callers that
    /// enforce their budget elsewhere.
    pub fn unlimited() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Account `bytes` against the budget.
    pub fn try_reserve(&self, bytes: usize) -> Result<(), AllocationError> {
        let previous = self.budget.used.fetch_add(bytes, Ordering::Relaxed);
        if previous.saturating_add(bytes) > self.budget.limit {
            self.budget.used.fetch_sub(bytes, Ordering::Relaxed);
            return Err(AllocationError {
                requested: bytes,
                available: self.budget.limit.saturating_sub(previous),
                limit: self.budget.limit,
            });
        }
        Ok(())
    }

    /// Return `bytes` to the budget. Callers must release exactly what they
    /// reserved.
    pub fn release(&self, bytes: usize) {
        let previous = self.budget.used.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(previous >= bytes, "released more bytes than reserved");
    }

    /// Bytes currently accounted.
    pub fn used(&self) -> usize {
        self.budget.used.load(Ordering::Relaxed)
    }

    /// The byte ceiling.
    pub fn limit(&self) -> usize {
        self.budget.limit
    }
}

impl Default for TrackedAllocator {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_within_limit() {
        let alloc = TrackedAllocator::with_limit(1024);
        alloc.try_reserve(512).unwrap();
        alloc.try_reserve(512).unwrap();
        assert_eq!(alloc.used(), 1024);
    }

    #[test]
    fn reserve_past_limit_fails_and_backs_out() {
        let alloc = TrackedAllocator::with_limit(1024);
        alloc.try_reserve(1000).unwrap();
        let err = alloc.try_reserve(100).unwrap_err();
        assert_eq!(err.requested, 100);
        assert_eq!(err.available, 24);
        // The failed reservation must not stay accounted.
        assert_eq!(alloc.used(), 1000);
    }

    #[test]
    fn clones_share_the_budget() {
        let alloc = TrackedAllocator::with_limit(100);
        let other = alloc.clone();
        alloc.try_reserve(60).unwrap();
        assert!(other.try_reserve(60).is_err());
        alloc.release(60);
        other.try_reserve(60).unwrap();
    }
}
