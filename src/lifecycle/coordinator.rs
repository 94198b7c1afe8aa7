//! Lifecycle Coordinator
//!
//! Drives the start and stop sequences of one application run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Application, CallbackRegistry, LifecycleError, Result, ShutdownResult, ShutdownWaiter};
use crate::config::ReadinessMode;
use crate::metrics;
use crate::runtime::LoopHandle;

/// Runs the registered callbacks against one application.
///
/// The coordinator owns the registry for the whole run; nothing can be
/// registered once it has been built.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = LifecycleCoordinator::new(app, registry);
///
/// coordinator.start(&event_loop.handle())?;
/// // ... loop runs ...
/// let waiter = coordinator.stop(&handle, Duration::from_secs(5), Duration::from_secs(1));
/// waiter.wait().await;
/// ```
pub struct LifecycleCoordinator {
    app: Application,
    registry: Arc<CallbackRegistry>,
    stopping: Arc<AtomicBool>,
    waiter: OnceLock<ShutdownWaiter>,
}

impl LifecycleCoordinator {
    pub fn new(app: Application, registry: CallbackRegistry) -> Self {
        Self {
            app,
            registry: Arc::new(registry),
            stopping: Arc::new(AtomicBool::new(false)),
            waiter: OnceLock::new(),
        }
    }

    pub fn application(&self) -> &Application {
        &self.app
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Run the pre-start callbacks, then schedule the post-start callbacks.
    ///
    /// Returns once every post-start callback has been scheduled, not once
    /// they have finished.
    ///
    /// # Errors
    ///
    /// The first failing pre-start callback cancels the start: later
    /// pre-start callbacks are skipped, [`stop`](Self::stop) runs with the
    /// configured limits and [`LifecycleError::StartCancelled`] is returned.
    /// A caller that owns a listener should use [`run_pre_start`](Self::run_pre_start)
    /// and stop accepting before it calls `stop` itself.
    pub fn start(&self, event_loop: &LoopHandle) -> Result<()> {
        if let Err(error) = self.run_pre_start(event_loop) {
            metrics::emit_shutdown_initiated("start_cancelled");
            let settings = self.app.settings();
            self.stop(event_loop, settings.shutdown_limit, settings.poll_interval);
            return Err(error);
        }
        self.schedule_post_start(event_loop);
        Ok(())
    }

    /// Run the pre-start callbacks in order, stopping at the first failure.
    ///
    /// Does not run the shutdown sequence on failure.
    pub fn run_pre_start(&self, event_loop: &LoopHandle) -> Result<()> {
        self.app.attach_loop(event_loop);
        tracing::info!(
            callbacks = self.registry.len(super::Phase::PreStart),
            "Calling pre-start callbacks..."
        );

        for hook in self.registry.pre_start() {
            tracing::debug!(callback = %hook.name(), "Running pre-start callback");
            if let Err(error) = hook.callback().before_run(&self.app, event_loop) {
                tracing::error!(
                    callback = %hook.name(),
                    error = %error,
                    "Pre-start callback failed, cancelling start"
                );
                metrics::emit_callback_failure("pre_start");
                return Err(LifecycleError::start_cancelled(hook.name(), error));
            }
        }
        Ok(())
    }

    /// Schedule the post-start callbacks as loop work and arm the readiness gate.
    ///
    /// The gate stays closed if shutdown has already begun.
    pub fn schedule_post_start(&self, event_loop: &LoopHandle) {
        let mut scheduled = Vec::with_capacity(self.registry.len(super::Phase::PostStart));
        for hook in self.registry.post_start() {
            tracing::debug!(callback = %hook.name(), "Scheduling post-start callback");
            let callback = Arc::clone(hook.callback());
            let app = self.app.clone();
            let handle = event_loop.clone();
            scheduled.push((
                hook.name().to_string(),
                event_loop.spawn(async move { callback.on_start(app, handle).await }),
            ));
        }
        tracing::info!(callbacks = scheduled.len(), "Post-start callbacks scheduled");

        let gate = self.app.readiness().clone();
        let stopping = Arc::clone(&self.stopping);
        match self.app.settings().readiness {
            ReadinessMode::Scheduled => {
                if !stopping.load(Ordering::SeqCst) {
                    gate.set();
                }
            }
            ReadinessMode::Completed if scheduled.is_empty() => {
                if !stopping.load(Ordering::SeqCst) {
                    gate.set();
                }
            }
            ReadinessMode::Completed => {
                event_loop.spawn(async move {
                    for (name, task) in scheduled {
                        if let Err(e) = task.await {
                            metrics::emit_callback_failure("post_start");
                            tracing::warn!(callback = %name, error = %e, "Post-start callback did not complete");
                        }
                    }
                    // Shutdown may have begun while post-start work was running.
                    if !stopping.load(Ordering::SeqCst) {
                        gate.set();
                    }
                });
            }
        }
    }

    /// Run the shutdown callbacks and hand their deferred work to a waiter.
    ///
    /// Never fails and never blocks: callback errors and panics are logged
    /// and the next callback runs. The returned waiter stops the loop once
    /// the deferred work has drained or `shutdown_limit` has passed.
    ///
    /// Only the first call runs the callbacks; later calls, including one
    /// made from inside a shutdown callback, return the same waiter.
    pub fn stop(
        &self,
        event_loop: &LoopHandle,
        shutdown_limit: Duration,
        poll_interval: Duration,
    ) -> ShutdownWaiter {
        let mut first = false;
        let waiter = self
            .waiter
            .get_or_init(|| {
                first = true;
                ShutdownWaiter::new(event_loop, shutdown_limit, poll_interval)
            })
            .clone();
        if !first {
            tracing::debug!("Shutdown already in progress, not calling shutdown callbacks again");
            return waiter;
        }

        self.stopping.store(true, Ordering::SeqCst);
        self.app.readiness().clear();
        self.app.attach_loop(event_loop);

        tracing::info!(
            callbacks = self.registry.len(super::Phase::Shutdown),
            "Calling shutdown callbacks..."
        );

        for hook in self.registry.shutdown() {
            tracing::debug!(callback = %hook.name(), "Running shutdown callback");
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.callback().on_shutdown(&self.app)));
            match outcome {
                Ok(Ok(ShutdownResult::Immediate)) => {}
                Ok(Ok(ShutdownResult::Deferred(handle))) => {
                    tracing::debug!(callback = %hook.name(), "Waiting on deferred shutdown work");
                    waiter.register(hook.name(), handle);
                }
                Ok(Err(error)) => {
                    metrics::emit_callback_failure("shutdown");
                    tracing::warn!(callback = %hook.name(), error = %error, "Shutdown callback failed");
                }
                Err(_) => {
                    metrics::emit_callback_failure("shutdown");
                    tracing::warn!(callback = %hook.name(), "Shutdown callback panicked");
                }
            }
        }

        waiter.begin();
        waiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::lifecycle::{BoxError, DeferredHandle, StopReason};
    use crate::runtime::EventLoop;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    const LIMIT: Duration = Duration::from_secs(5);
    const POLL: Duration = Duration::from_millis(50);

    fn application(settings: Settings) -> Application {
        let (app, _) = Application::builder().settings(settings).build().unwrap();
        app
    }

    fn recorder(calls: &Arc<Mutex<Vec<String>>>, name: &str) -> impl Fn() + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        let name = name.to_string();
        move || calls.lock().unwrap().push(name.clone())
    }

    #[tokio::test]
    async fn test_no_shutdown_callbacks_stops_synchronously() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let coordinator =
            LifecycleCoordinator::new(application(Settings::default()), CallbackRegistry::new());

        let waiter = coordinator.stop(&handle, LIMIT, POLL);

        assert!(handle.is_stopped());
        assert_eq!(waiter.pending(), 0);
        assert_eq!(waiter.stop_reason(), Some(StopReason::Drained));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_handle_ends_shutdown_early() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let start = tokio::time::Instant::now();

        let mut registry = CallbackRegistry::new();
        registry.on_shutdown("plain", |_: &Application| Ok::<_, BoxError>(ShutdownResult::Immediate));
        let spawner = handle.clone();
        registry.on_shutdown("flush", move |_: &Application| {
            let handle = DeferredHandle::spawn(&spawner, async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, BoxError>("flushed")
            });
            Ok::<_, BoxError>(handle.into())
        });
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);

        let waiter = coordinator.stop(&handle, LIMIT, POLL);
        assert_eq!(waiter.pending(), 1);
        waiter.wait().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "stopped early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "stopped late: {elapsed:?}");
        assert_eq!(waiter.stop_reason(), Some(StopReason::Drained));
    }

    #[tokio::test]
    async fn test_failing_shutdown_callback_is_isolated() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut registry = CallbackRegistry::new();
        let first = recorder(&calls, "first");
        registry.on_shutdown("first", move |_: &Application| {
            first();
            Err::<ShutdownResult, BoxError>("connection reset".into())
        });
        registry.on_shutdown("second", |_: &Application| -> std::result::Result<ShutdownResult, BoxError> {
            panic!("bad shutdown callback")
        });
        let third = recorder(&calls, "third");
        registry.on_shutdown("third", move |_: &Application| {
            third();
            Ok::<_, BoxError>(ShutdownResult::Immediate)
        });
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);

        let waiter = coordinator.stop(&handle, LIMIT, POLL);

        assert_eq!(*calls.lock().unwrap(), vec!["first", "third"]);
        assert_eq!(waiter.pending(), 0);
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_pending_count_matches_deferred_results() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let mut senders = Vec::new();

        let mut registry = CallbackRegistry::new();
        for i in 0..6 {
            let (tx, rx) = oneshot::channel::<std::result::Result<(), BoxError>>();
            senders.push(tx);
            let receiver = Mutex::new(Some(rx));
            registry.on_shutdown(format!("cb-{i}"), move |_: &Application| match i % 3 {
                0 => Err::<ShutdownResult, BoxError>("failed".into()),
                1 => Ok(ShutdownResult::Immediate),
                _ => {
                    let rx = receiver.lock().unwrap().take().ok_or("called twice")?;
                    Ok(DeferredHandle::from_receiver(rx).into())
                }
            });
        }
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);

        let waiter = coordinator.stop(&handle, LIMIT, POLL);
        assert_eq!(waiter.pending(), 2);
        assert!(!handle.is_stopped());

        for tx in senders {
            let _ = tx.send(Ok(()));
        }
        waiter.wait().await;
        assert_eq!(waiter.pending(), 0);
    }

    #[tokio::test]
    async fn test_second_stop_returns_same_waiter() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut registry = CallbackRegistry::new();
        let on_stop = recorder(&calls, "shutdown");
        registry.on_shutdown("shutdown", move |_: &Application| {
            on_stop();
            Ok::<_, BoxError>(ShutdownResult::Immediate)
        });
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);

        let first = coordinator.stop(&handle, LIMIT, POLL);
        let second = coordinator.stop(&handle, Duration::ZERO, POLL);

        assert_eq!(*calls.lock().unwrap(), vec!["shutdown"]);
        assert_eq!(first.deadline(), second.deadline());
        assert_eq!(second.stop_reason(), Some(StopReason::Drained));
    }

    #[tokio::test]
    async fn test_shutdown_callbacks_reach_the_loop() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (tx, rx) = oneshot::channel::<()>();
        let rx = Mutex::new(Some(rx));

        let mut registry = CallbackRegistry::new();
        registry.on_shutdown("drain", move |app: &Application| -> std::result::Result<ShutdownResult, BoxError> {
            let event_loop = app.event_loop().ok_or("no loop attached")?;
            let rx = rx.lock().unwrap().take().ok_or("called twice")?;
            let handle = DeferredHandle::spawn(event_loop, async move {
                rx.await.map_err(|e| Box::new(e) as BoxError)
            });
            Ok(handle.into())
        });
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);
        assert!(coordinator.application().event_loop().is_none());

        coordinator.start(&handle).unwrap();
        assert!(coordinator.application().event_loop().is_some());

        let waiter = coordinator.stop(&handle, LIMIT, POLL);
        assert_eq!(waiter.pending(), 1);
        tx.send(()).unwrap();
        waiter.wait().await;
        assert_eq!(waiter.stop_reason(), Some(StopReason::Drained));
    }

    #[tokio::test]
    async fn test_failing_pre_start_cancels_start() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut registry = CallbackRegistry::new();
        let first = recorder(&calls, "first");
        registry.before_run("first", move |_: &Application, _: &LoopHandle| {
            first();
            Ok::<(), BoxError>(())
        });
        let second = recorder(&calls, "second");
        registry.before_run("second", move |_: &Application, _: &LoopHandle| {
            second();
            Err::<(), BoxError>("database unreachable".into())
        });
        let third = recorder(&calls, "third");
        registry.before_run("third", move |_: &Application, _: &LoopHandle| {
            third();
            Ok::<(), BoxError>(())
        });
        let on_stop = recorder(&calls, "shutdown");
        registry.on_shutdown("shutdown", move |_: &Application| {
            on_stop();
            Ok::<_, BoxError>(ShutdownResult::Immediate)
        });
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);

        let err = coordinator.start(&handle).unwrap_err();

        assert!(err.is_start_cancelled());
        assert!(matches!(err, LifecycleError::StartCancelled { ref callback, .. } if callback == "second"));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "shutdown"]);
        assert!(handle.is_stopped());
        assert!(!coordinator.application().readiness().is_ready());
    }

    #[tokio::test]
    async fn test_readiness_set_once_post_start_is_scheduled() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (release, wait) = oneshot::channel::<()>();
        let wait = Mutex::new(Some(wait));

        let mut registry = CallbackRegistry::new();
        registry.on_start("slow", move |_app: Application, _loop: LoopHandle| {
            let wait = wait.lock().unwrap().take();
            async move {
                if let Some(wait) = wait {
                    let _ = wait.await;
                }
            }
        });
        let coordinator = LifecycleCoordinator::new(application(Settings::default()), registry);

        coordinator.start(&handle).unwrap();
        assert!(coordinator.application().readiness().is_ready());
        assert_eq!(handle.outstanding_tasks(), 1);
        release.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_completed_readiness_waits_for_post_start() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (release, wait) = oneshot::channel::<()>();
        let wait = Mutex::new(Some(wait));

        let mut registry = CallbackRegistry::new();
        registry.on_start("slow", move |_app: Application, _loop: LoopHandle| {
            let wait = wait.lock().unwrap().take();
            async move {
                if let Some(wait) = wait {
                    let _ = wait.await;
                }
            }
        });
        let settings = Settings {
            readiness: ReadinessMode::Completed,
            ..Settings::default()
        };
        let coordinator = LifecycleCoordinator::new(application(settings), registry);
        let gate = coordinator.application().readiness().clone();

        coordinator.start(&handle).unwrap();
        assert!(!gate.is_ready());

        release.send(()).unwrap();
        while handle.has_outstanding_work() {
            tokio::task::yield_now().await;
        }
        assert!(gate.is_ready());
    }
}
