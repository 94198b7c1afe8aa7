//! Shutdown Waiter
//!
//! Tracks the deferred operations left behind by shutdown callbacks and
//! stops the loop exactly once, either when everything has drained or
//! when the deadline passes.
//!
//! ```text
//! Draining ──(pending == 0 and loop idle)──▶ Stopping ──▶ Stopped
//!    │  ▲                                        ▲
//!    └──┘ poll tick every poll_interval          │
//!    └──────────────(deadline reached)───────────┘
//! ```
//!
//! The waiter's own bookkeeping (one watcher per deferred handle and the
//! poll timer) runs as plain tokio tasks, so it never counts as
//! outstanding loop work.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;

use super::{Completion, DeferredHandle};
use crate::metrics;
use crate::runtime::LoopHandle;

const DRAINING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Where the waiter is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    /// Waiting for deferred operations and loop work
    Draining,
    /// The terminal action is firing
    Stopping,
    /// The loop has been told to stop
    Stopped,
}

/// Why the terminal action fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing was left to wait for
    Drained,
    /// The deadline passed with work still outstanding
    DeadlineExceeded,
}

struct WaiterInner {
    event_loop: LoopHandle,
    pending: AtomicUsize,
    started_at: Instant,
    deadline: Instant,
    poll_interval: Duration,
    state: AtomicU8,
    stop_reason: OnceLock<StopReason>,
    tick_scheduled: AtomicBool,
}

/// Waits out deferred shutdown work against a deadline.
///
/// One waiter is created per shutdown and discarded after it has stopped
/// the loop. Clones share state.
#[derive(Clone)]
pub struct ShutdownWaiter {
    inner: Arc<WaiterInner>,
}

impl ShutdownWaiter {
    /// Create a waiter whose deadline is `shutdown_limit` from now
    pub fn new(event_loop: &LoopHandle, shutdown_limit: Duration, poll_interval: Duration) -> Self {
        let started_at = event_loop.now();
        Self {
            inner: Arc::new(WaiterInner {
                event_loop: event_loop.clone(),
                pending: AtomicUsize::new(0),
                started_at,
                deadline: started_at + shutdown_limit,
                poll_interval,
                state: AtomicU8::new(DRAINING),
                stop_reason: OnceLock::new(),
                tick_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Start watching a deferred operation.
    ///
    /// Spawns a watcher task, so this must be called within a tokio runtime.
    pub fn register(&self, callback: &str, handle: DeferredHandle) {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);

        let waiter = self.clone();
        let callback = callback.to_string();
        let stop_token = self.inner.event_loop.stop_token();
        tokio::spawn(async move {
            tokio::select! {
                completion = handle.completion() => {
                    match completion {
                        Completion::Succeeded(value) => tracing::debug!(
                            callback = %callback,
                            result = %value,
                            "Shutdown operation completed"
                        ),
                        Completion::Failed(error) => {
                            metrics::emit_callback_failure("shutdown");
                            tracing::warn!(
                                callback = %callback,
                                error = %error,
                                "Shutdown operation failed"
                            );
                        }
                    }
                    waiter.on_complete();
                }
                _ = stop_token.cancelled() => {
                    tracing::debug!(callback = %callback, "Loop stopped before shutdown operation completed");
                }
            }
        });
    }

    /// Begin draining once every shutdown callback has been invoked.
    ///
    /// With nothing pending this checks the loop right away, which stops it
    /// synchronously when it is idle.
    pub fn begin(&self) {
        tracing::info!(
            pending = self.pending(),
            limit_secs = (self.inner.deadline - self.inner.started_at).as_secs_f64(),
            "Stopping event loop once shutdown work drains"
        );
        if self.pending() == 0 {
            self.poll_tick();
        } else {
            self.schedule_tick();
        }
    }

    /// Record that one deferred operation reached a terminal state
    pub fn on_complete(&self) {
        let previous = self
            .inner
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);
        tracing::debug!(pending = remaining, "Shutdown operation finished");

        if remaining == 0 {
            self.poll_tick();
        }
    }

    /// Stop the loop if the deadline passed or nothing is left to wait for;
    /// otherwise check again after the poll interval.
    pub fn poll_tick(&self) {
        if self.state() != WaiterState::Draining {
            return;
        }

        let now = self.inner.event_loop.now();
        let busy = self.pending() > 0 || self.inner.event_loop.has_outstanding_work();
        if now < self.inner.deadline && busy {
            self.schedule_tick();
        } else if busy {
            self.fire(StopReason::DeadlineExceeded);
        } else {
            self.fire(StopReason::Drained);
        }
    }

    fn schedule_tick(&self) {
        if self.inner.tick_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let waiter = self.clone();
        let stop_token = self.inner.event_loop.stop_token();
        let wake_at = (self.inner.event_loop.now() + self.inner.poll_interval).min(self.inner.deadline);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {
                    waiter.inner.tick_scheduled.store(false, Ordering::SeqCst);
                    waiter.poll_tick();
                }
                _ = stop_token.cancelled() => {}
            }
        });
    }

    /// The terminal action; only the first call has any effect.
    fn fire(&self, reason: StopReason) {
        if self
            .inner
            .state
            .compare_exchange(DRAINING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let _ = self.inner.stop_reason.set(reason);
        self.inner.event_loop.stop();
        self.inner.state.store(STOPPED, Ordering::SeqCst);

        let elapsed = self.inner.event_loop.now() - self.inner.started_at;
        match reason {
            StopReason::Drained => {
                metrics::emit_shutdown_completed(true);
                tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "Stopped event loop");
            }
            StopReason::DeadlineExceeded => {
                metrics::emit_shutdown_completed(false);
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    pending = self.pending(),
                    outstanding_tasks = self.inner.event_loop.outstanding_tasks(),
                    "Shutdown deadline reached with work outstanding, stopped event loop without a complete drain"
                );
            }
        }
    }

    /// Deferred operations still outstanding
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Absolute time after which the loop is stopped regardless
    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// Current state
    pub fn state(&self) -> WaiterState {
        match self.inner.state.load(Ordering::SeqCst) {
            DRAINING => WaiterState::Draining,
            STOPPING => WaiterState::Stopping,
            _ => WaiterState::Stopped,
        }
    }

    /// Why the loop was stopped, once it has been
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.stop_reason.get().copied()
    }

    /// Whether the terminal action has fired
    pub fn is_stopped(&self) -> bool {
        self.state() != WaiterState::Draining
    }

    /// Resolves once the loop has been stopped
    pub async fn wait(&self) {
        self.inner.event_loop.stopped().await
    }
}
