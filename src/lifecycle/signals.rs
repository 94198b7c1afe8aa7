//! Signal Bridge
//!
//! Turns OS termination signals into a single shutdown request on the loop.
//! The OS-level handler installed by tokio only writes to a self-pipe; the
//! bridge's listener reads from it and enqueues the shutdown action as a
//! loop callback, so no application code ever runs in signal context.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Result;
#[cfg(unix)]
use super::LifecycleError;
use crate::runtime::LoopHandle;

/// Termination signals the bridge reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// The action a signal schedules onto the loop
pub type ShutdownAction = Arc<dyn Fn(Signal) + Send + Sync>;

/// Listens for termination signals on behalf of one supervisor.
///
/// The first signal enqueues the shutdown action; later signals are logged
/// and ignored. Nothing is registered process-wide beyond tokio's own
/// signal driver, so several bridges (for example in tests) can coexist.
/// Listening stops on [`dispose`](Self::dispose) or drop.
pub struct SignalBridge {
    listener: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl SignalBridge {
    /// Listen for SIGINT and SIGTERM.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::SignalInstall`] if the OS handlers cannot be registered.
    pub fn install<F>(event_loop: &LoopHandle, action: F) -> Result<Self>
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut interrupt =
                signal(SignalKind::interrupt()).map_err(LifecycleError::SignalInstall)?;
            let mut terminate =
                signal(SignalKind::terminate()).map_err(LifecycleError::SignalInstall)?;
            let token = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = token.cancelled() => break,
                        Some(()) = interrupt.recv() => Signal::Interrupt,
                        Some(()) = terminate.recv() => Signal::Terminate,
                        else => break,
                    };
                    if tx.send(received).is_err() {
                        break;
                    }
                }
            });
        }

        #[cfg(not(unix))]
        {
            let token = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        result = tokio::signal::ctrl_c() => match result {
                            Ok(()) => {
                                if tx.send(Signal::Interrupt).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                                break;
                            }
                        },
                    }
                }
            });
        }

        tracing::debug!("Signal handlers installed");
        Ok(Self::listen(event_loop, rx, Arc::new(action), shutdown))
    }

    /// Take signals from a channel instead of the OS.
    ///
    /// Must be called within a tokio runtime.
    pub fn from_source<F>(
        event_loop: &LoopHandle,
        source: mpsc::UnboundedReceiver<Signal>,
        action: F,
    ) -> Self
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        Self::listen(event_loop, source, Arc::new(action), CancellationToken::new())
    }

    fn listen(
        event_loop: &LoopHandle,
        mut source: mpsc::UnboundedReceiver<Signal>,
        action: ShutdownAction,
        shutdown: CancellationToken,
    ) -> Self {
        let event_loop = event_loop.clone();
        let token = shutdown.clone();

        // Not loop work: the listener must never hold up a drain.
        let listener = tokio::spawn(async move {
            let loop_stopped = event_loop.stop_token();
            let mut requested = false;
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    _ = loop_stopped.cancelled() => break,
                    received = source.recv() => match received {
                        Some(received) => received,
                        None => break,
                    },
                };

                if requested {
                    tracing::info!(signal = %received, "Shutdown already in progress, ignoring signal");
                    continue;
                }
                requested = true;
                tracing::info!(signal = %received, "Received signal, scheduling shutdown");

                let action = Arc::clone(&action);
                event_loop.add_callback(move || action(received));
            }
        });

        Self {
            listener: Some(listener),
            shutdown,
        }
    }

    /// Whether the bridge is still listening
    pub fn is_active(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }

    /// Stop listening
    pub fn dispose(mut self) {
        self.stop_listening();
        tracing::debug!("Signal bridge disposed");
    }

    fn stop_listening(&mut self) {
        self.shutdown.cancel();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recorded() -> (Arc<Mutex<Vec<Signal>>>, impl Fn(Signal) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |signal| sink.lock().unwrap().push(signal))
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_runs_on_the_loop() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (seen, action) = recorded();
        let (tx, rx) = mpsc::unbounded_channel();
        let _bridge = SignalBridge::from_source(&handle, rx, action);

        tx.send(Signal::Terminate).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Queued, not executed, until the loop runs.
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(handle.queued_callbacks(), 1);

        let stopper = handle.clone();
        handle.add_callback(move || stopper.stop());
        event_loop.run().await;
        assert_eq!(*seen.lock().unwrap(), vec![Signal::Terminate]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_signals_are_ignored() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (seen, action) = recorded();
        let (tx, rx) = mpsc::unbounded_channel();
        let _bridge = SignalBridge::from_source(&handle, rx, action);

        tx.send(Signal::Interrupt).unwrap();
        tx.send(Signal::Terminate).unwrap();
        tx.send(Signal::Interrupt).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.queued_callbacks(), 1);

        let stopper = handle.clone();
        handle.add_callback(move || stopper.stop());
        event_loop.run().await;
        assert_eq!(*seen.lock().unwrap(), vec![Signal::Interrupt]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_bridge_stops_listening() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (seen, action) = recorded();
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = SignalBridge::from_source(&handle, rx, action);
        assert!(bridge.is_active());

        bridge.dispose();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = tx.send(Signal::Terminate);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(handle.queued_callbacks(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }
}
