//! Cooperative cancellation: shared handles, deadline timers, watchdog.
//!
//! Every potentially long loop in the engine calls
//! [`CancellationHandle::throw_if_cancelled`] at constant-work intervals.
//! The handle's state transitions exactly once from `Active` to a
//! cancelled state; the next probe after the transition raises
//! [`QueryError::Cancelled`] with the reason. Deadlines are enforced by a
//! timer task that flips the handle after the time limit; the watchdog
//! flips handles that have not checked in for longer than the stall
//! threshold, so even a non-cooperative code path terminates eventually.
//!
//! Feature selection: `cancellation` + `watchdog` (default) is the full
//! machinery, `cancellation` alone drops stall detection, and with neither
//! feature all probes compile to no-ops.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{CancellationReason, QueryError};
use crate::scheduler::{TimerExecutor, TimerId};

const STATE_ACTIVE: u8 = 0;
const STATE_MANUAL: u8 = 1;
const STATE_TIMEOUT: u8 = 2;
const STATE_STALL: u8 = 3;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

fn now_millis() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// Shared cancellation state for one query.
#[derive(Debug)]
pub struct CancellationHandle {
    state: AtomicU8,
    /// Millis-since-epoch of the last probe, read by the watchdog.
    last_check_in: AtomicU64,
}

/// The form in which handles travel through the engine.
pub type SharedCancellationHandle = Arc<CancellationHandle>;

impl CancellationHandle {
    pub fn new() -> SharedCancellationHandle {
        Arc::new(CancellationHandle {
            state: AtomicU8::new(STATE_ACTIVE),
            last_check_in: AtomicU64::new(now_millis()),
        })
    }

    /// Fast probe: one relaxed load on the happy path. Compiles to a no-op
    /// without the `cancellation` feature.
    #[inline]
    pub fn throw_if_cancelled(&self) -> Result<(), QueryError> {
        if !cfg!(feature = "cancellation") {
            return Ok(());
        }
        match self.state.load(Ordering::Relaxed) {
            STATE_ACTIVE => {
                #[cfg(feature = "watchdog")]
                self.last_check_in.store(now_millis(), Ordering::Relaxed);
                Ok(())
            }
            state => Err(QueryError::Cancelled(Self::reason_of(state))),
        }
    }

    /// Request cancellation. Only the first transition wins; returns whether
    /// this call was it.
    pub fn cancel(&self, reason: CancellationReason) -> bool {
        let target = match reason {
            CancellationReason::Manual => STATE_MANUAL,
            CancellationReason::Timeout => STATE_TIMEOUT,
            CancellationReason::WatchdogStall => STATE_STALL,
        };
        self.state
            .compare_exchange(STATE_ACTIVE, target, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Relaxed) != STATE_ACTIVE
    }

    fn reason_of(state: u8) -> CancellationReason {
        match state {
            STATE_MANUAL => CancellationReason::Manual,
            STATE_TIMEOUT => CancellationReason::Timeout,
            _ => CancellationReason::WatchdogStall,
        }
    }

    fn millis_since_check_in(&self) -> u64 {
        now_millis().saturating_sub(self.last_check_in.load(Ordering::Relaxed))
    }
}

/// Cancels the pending deadline timer when computation finishes first.
#[must_use = "dropping the guard immediately would disarm the deadline"]
pub struct DeadlineGuard {
    timer: TimerExecutor,
    id: TimerId,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.timer.cancel(self.id);
    }
}

/// Schedule `cancel(Timeout)` on `handle` after `time_limit`. The returned
/// guard disarms the timer; keep it alive for the duration of the
/// computation and drop it on completion.
pub fn cancel_after_deadline(
    timer: &TimerExecutor,
    handle: &SharedCancellationHandle,
    time_limit: Duration,
) -> DeadlineGuard {
    let weak: Weak<CancellationHandle> = Arc::downgrade(handle);
    let id = timer.schedule(time_limit, move || {
        if let Some(handle) = weak.upgrade() {
            if handle.cancel(CancellationReason::Timeout) {
                tracing::debug!(?time_limit, "query hit its time limit");
            }
        }
    });
    DeadlineGuard {
        timer: timer.clone(),
        id,
    }
}

/// Stall detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// How often the watchdog wakes up.
    pub check_interval: Duration,
    /// A handle with no check-in for this long is considered stalled.
    pub stall_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(100),
            stall_threshold: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Default)]
struct WatchdogState {
    handles: parking_lot::Mutex<Vec<Weak<CancellationHandle>>>,
    shutdown: parking_lot::Mutex<bool>,
    wake: parking_lot::Condvar,
}

/// Periodically verifies that every active handle has checked in recently
/// and cancels the ones that have not.
pub struct Watchdog {
    state: Arc<WatchdogState>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        let state = Arc::new(WatchdogState::default());
        let thread = Self::spawn(config, state.clone());
        Self { state, thread }
    }

    /// Track `handle`. Dead weak references are pruned on every sweep.
    pub fn register(&self, handle: &SharedCancellationHandle) {
        self.state.handles.lock().push(Arc::downgrade(handle));
    }

    #[cfg(feature = "watchdog")]
    fn spawn(
        config: WatchdogConfig,
        state: Arc<WatchdogState>,
    ) -> Option<std::thread::JoinHandle<()>> {
        let thread = std::thread::Builder::new()
            .name("corvus-watchdog".into())
            .spawn(move || {
                let stall_millis = config.stall_threshold.as_millis() as u64;
                loop {
                    {
                        let mut shutdown = state.shutdown.lock();
                        if *shutdown {
                            return;
                        }
                        state.wake.wait_for(&mut shutdown, config.check_interval);
                        if *shutdown {
                            return;
                        }
                    }
                    let mut handles = state.handles.lock();
                    handles.retain(|weak| match weak.upgrade() {
                        None => false,
                        Some(handle) => {
                            if !handle.is_cancelled()
                                && handle.millis_since_check_in() > stall_millis
                                && handle.cancel(CancellationReason::WatchdogStall)
                            {
                                tracing::warn!(
                                    stalled_for_ms = handle.millis_since_check_in(),
                                    "watchdog cancelled a stalled query"
                                );
                            }
                            true
                        }
                    });
                }
            })
            .expect("failed to spawn watchdog thread");
        Some(thread)
    }

    #[cfg(not(feature = "watchdog"))]
    fn spawn(
        _config: WatchdogConfig,
        _state: Arc<WatchdogState>,
    ) -> Option<std::thread::JoinHandle<()>> {
        None
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        *self.state.shutdown.lock() = true;
        self.state.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TimerExecutor;

    #[test]
    fn first_cancel_wins() {
        let handle = CancellationHandle::new();
        assert!(handle.throw_if_cancelled().is_ok());
        assert!(handle.cancel(CancellationReason::Manual));
        assert!(!handle.cancel(CancellationReason::Timeout));
        match handle.throw_if_cancelled() {
            Err(QueryError::Cancelled(CancellationReason::Manual)) => {}
            other => panic!("unexpected probe result: {other:?}"),
        }
    }

    #[test]
    fn deadline_fires_without_a_guard_drop() {
        let timer = TimerExecutor::new();
        let handle = CancellationHandle::new();
        let guard = cancel_after_deadline(&timer, &handle, Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(120));
        assert!(handle.is_cancelled());
        drop(guard);
    }

    #[test]
    fn dropping_the_guard_disarms_the_deadline() {
        let timer = TimerExecutor::new();
        let handle = CancellationHandle::new();
        let guard = cancel_after_deadline(&timer, &handle, Duration::from_millis(40));
        drop(guard);
        std::thread::sleep(Duration::from_millis(120));
        assert!(!handle.is_cancelled());
    }

    #[cfg(feature = "watchdog")]
    #[test]
    fn watchdog_cancels_a_stalled_handle() {
        let watchdog = Watchdog::new(WatchdogConfig {
            check_interval: Duration::from_millis(10),
            stall_threshold: Duration::from_millis(30),
        });
        let handle = CancellationHandle::new();
        watchdog.register(&handle);
        // No check-ins happen while we sleep, which is exactly a stall.
        std::thread::sleep(Duration::from_millis(200));
        match handle.throw_if_cancelled() {
            Err(QueryError::Cancelled(CancellationReason::WatchdogStall)) => {}
            other => panic!("unexpected probe result: {other:?}"),
        }
    }
}
