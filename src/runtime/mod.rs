//! Event Loop
//!
//! The single scheduler every lifecycle phase runs against. It owns three
//! things:
//!
//! ```text
//! callback queue  ── add_callback() from any thread / signal listener
//! task tracker    ── spawn() for post-start work, deferred shutdown work, connections
//! stop token      ── stop(), the one authoritative way to end run()
//! ```
//!
//! Work spawned through [`LoopHandle::spawn`] counts as outstanding work
//! until it completes. The shutdown waiter polls that count to decide
//! whether the service has drained.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// A unit of work queued onto the loop.
pub type LoopCallback = Box<dyn FnOnce() + Send + 'static>;

struct LoopInner {
    tracker: TaskTracker,
    stop_token: CancellationToken,
    queue: mpsc::UnboundedSender<LoopCallback>,
    queued: AtomicUsize,
}

/// Cloneable handle to an [`EventLoop`].
///
/// Everything that needs to schedule work, enqueue callbacks, or stop the
/// loop holds one of these. Handles stay valid after the loop has stopped;
/// enqueued callbacks are then dropped.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Arc<LoopInner>,
}

/// The loop itself. Created before the runtime starts, driven by [`EventLoop::run`].
pub struct EventLoop {
    handle: LoopHandle,
    queue_rx: mpsc::UnboundedReceiver<LoopCallback>,
}

impl EventLoop {
    /// Create a new loop. Does not need a running tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: LoopHandle {
                inner: Arc::new(LoopInner {
                    tracker: TaskTracker::new(),
                    stop_token: CancellationToken::new(),
                    queue: tx,
                    queued: AtomicUsize::new(0),
                }),
            },
            queue_rx: rx,
        }
    }

    /// Get a handle to this loop
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Execute queued callbacks until the loop is stopped.
    ///
    /// Callbacks run one at a time in the order they were enqueued. Tasks
    /// still tracked when the loop stops are left running detached.
    pub async fn run(mut self) {
        let stop_token = self.handle.inner.stop_token.clone();
        tracing::debug!("Event loop running");

        loop {
            tokio::select! {
                biased;
                _ = stop_token.cancelled() => break,
                callback = self.queue_rx.recv() => match callback {
                    Some(callback) => {
                        self.handle.inner.queued.fetch_sub(1, Ordering::SeqCst);
                        callback();
                    }
                    // Unreachable while `self.handle` holds a sender.
                    None => break,
                },
            }
        }

        self.handle.inner.tracker.close();
        tracing::debug!(
            outstanding_tasks = self.handle.inner.tracker.len(),
            "Event loop stopped"
        );
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopHandle {
    /// Schedule a future as tracked loop work.
    ///
    /// The future runs inside the caller's current span. Must be called from
    /// within a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.tracker.spawn(future.in_current_span())
    }

    /// Enqueue a callback to run on the loop.
    ///
    /// Safe to call from any thread, including the signal listener. The
    /// callback is silently dropped if the loop has already stopped.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_stopped() {
            tracing::debug!("Loop stopped, dropping callback");
            return;
        }
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if self.inner.queue.send(Box::new(callback)).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("Loop gone, dropping callback");
        }
    }

    /// Stop the loop. Idempotent.
    pub fn stop(&self) {
        self.inner.stop_token.cancel();
    }

    /// Whether [`LoopHandle::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.stop_token.is_cancelled()
    }

    /// Resolves once the loop has been told to stop.
    pub async fn stopped(&self) {
        self.inner.stop_token.cancelled().await
    }

    /// Loop time. Follows tokio's clock, so paused-time tests see it advance.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Number of tracked tasks that have not completed yet
    pub fn outstanding_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Number of callbacks enqueued but not yet executed
    pub fn queued_callbacks(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Whether the loop still has scheduled work: tracked tasks or queued callbacks.
    pub fn has_outstanding_work(&self) -> bool {
        self.outstanding_tasks() > 0 || self.queued_callbacks() > 0
    }

    /// Token cancelled when the loop stops; for tasks that must exit with it.
    pub fn stop_token(&self) -> CancellationToken {
        self.inner.stop_token.clone()
    }
}
