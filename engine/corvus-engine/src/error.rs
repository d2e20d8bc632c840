//! Error taxonomy of the execution core.
//!
//! Operators never recover from errors, they propagate them. The top-level
//! query handler turns a [`QueryError`] into a JSON error body with message,
//! metadata and timing; everything below it just uses `?`.

use std::time::Duration;

use corvus_core::AllocationError;
use serde::Serialize;

/// Why a query was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancellationReason {
    /// Explicit cancel request, e.g. the client went away.
    Manual,
    /// The per-query time limit expired.
    Timeout,
    /// The watchdog saw no check-in for longer than the stall threshold.
    WatchdogStall,
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationReason::Manual => write!(f, "manual cancellation"),
            CancellationReason::Timeout => write!(f, "time limit exceeded"),
            CancellationReason::WatchdogStall => write!(f, "watchdog detected a stall"),
        }
    }
}

/// All failures the execution core produces.
///
/// `Clone` is deliberate: a result cache waiter observing a producer's
/// failure re-throws an equivalent error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// Malformed SPARQL, reported with the byte offset of the offender.
    #[error("parse error at offset {offset}: {message}")]
    Parse { message: String, offset: usize },

    /// The planner found no viable execution plan.
    #[error("no viable query plan: {0}")]
    Plan(String),

    /// The per-query memory ceiling was exceeded.
    #[error(transparent)]
    OutOfBudget(#[from] AllocationError),

    /// The query was cancelled cooperatively.
    #[error("query cancelled: {0}")]
    Cancelled(CancellationReason),

    /// The result cannot be admitted to the cache and the caller did not
    /// request pinning.
    #[error("result cache full: {0}")]
    CacheFull(String),

    /// Unexpected state reported by the external index.
    #[error("index error: {0}")]
    Index(String),

    /// Internal invariant violation. Fatal to the operator, not the process.
    #[error("internal error: {0}")]
    Bug(String),
}

impl QueryError {
    /// Stable machine-readable tag for the JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Parse { .. } => "parse",
            QueryError::Plan(_) => "plan",
            QueryError::OutOfBudget(_) => "out-of-budget",
            QueryError::Cancelled(_) => "cancelled",
            QueryError::CacheFull(_) => "cache-full",
            QueryError::Index(_) => "index",
            QueryError::Bug(_) => "bug",
        }
    }
}

/// Compose the JSON error body sent to clients: message, metadata, timing.
pub fn compose_error_response(
    query: &str,
    error: &QueryError,
    elapsed: Duration,
) -> serde_json::Value {
    serde_json::json!({
        "query": query,
        "status": "ERROR",
        "exception": error.to_string(),
        "metadata": { "kind": error.kind() },
        "time": { "total_ms": elapsed.as_millis() as u64 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_kind_and_timing() {
        let error = QueryError::Cancelled(CancellationReason::Timeout);
        let body = compose_error_response("SELECT * WHERE { ?s ?p ?o }", &error, Duration::from_millis(17));
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["metadata"]["kind"], "cancelled");
        assert_eq!(body["time"]["total_ms"], 17);
    }

    #[test]
    fn allocation_errors_convert() {
        let alloc = corvus_core::TrackedAllocator::with_limit(8);
        let err: QueryError = alloc.try_reserve(64).unwrap_err().into();
        assert_eq!(err.kind(), "out-of-budget");
    }
}
