//! Supervisor
//!
//! Composes the transport, the lifecycle coordinator and the signal
//! bridge into one run, and owns the run's shutdown entry point.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{HttpTransport, Transport, TransportOptions};
use crate::error::Result;
use crate::lifecycle::{Application, CallbackRegistry, LifecycleCoordinator, Signal, SignalBridge};
use crate::metrics;
use crate::runtime::{EventLoop, LoopHandle};

struct Shared {
    coordinator: LifecycleCoordinator,
    transport: Arc<dyn Transport>,
    event_loop: LoopHandle,
    shutting_down: AtomicBool,
}

impl Shared {
    fn shutdown(&self, trigger: &str) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!(trigger, "Shutdown already in progress, ignoring request");
            return;
        }

        tracing::info!(trigger, "Starting graceful shutdown...");
        metrics::emit_shutdown_initiated(trigger);
        self.transport.stop();

        let settings = self.coordinator.application().settings();
        self.coordinator
            .stop(&self.event_loop, settings.shutdown_limit, settings.poll_interval);
    }

    async fn start_server(&self, port: u16, worker_count: usize) -> io::Result<()> {
        if self.coordinator.application().settings().debug {
            self.transport.listen(port).await
        } else {
            self.transport.bind(port).await?;
            self.transport.start(worker_count)
        }
    }
}

/// Cloneable trigger for a supervisor's shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Stop accepting and run the shutdown sequence. Only the first call acts.
    pub fn shutdown(&self) {
        self.shared.shutdown("request");
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }
}

/// Runs one application from listening socket to stopped loop.
///
/// # Example
///
/// ```rust,ignore
/// let (app, registry) = Application::builder().router(routes()).build()?;
/// let supervisor = Supervisor::new(app, registry);
/// supervisor.run(8000, 0).await?;
/// ```
pub struct Supervisor {
    event_loop: EventLoop,
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Supervisor serving `app` over HTTP
    pub fn new(app: Application, registry: CallbackRegistry) -> Self {
        Self::with_transport(app, registry, |app, event_loop| {
            let options = TransportOptions::from_settings(app.settings());
            HttpTransport::new(app, options, event_loop)
        })
    }

    /// Supervisor using the transport built by `create`
    pub fn with_transport<T, F>(app: Application, registry: CallbackRegistry, create: F) -> Self
    where
        T: Transport,
        F: FnOnce(&Application, &LoopHandle) -> T,
    {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let transport: Arc<dyn Transport> = Arc::new(create(&app, &handle));

        Self {
            event_loop,
            shared: Arc::new(Shared {
                coordinator: LifecycleCoordinator::new(app, registry),
                transport,
                event_loop: handle,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn application(&self) -> &Application {
        self.shared.coordinator.application()
    }

    pub fn loop_handle(&self) -> LoopHandle {
        self.shared.event_loop.clone()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop accepting and run the shutdown sequence. Only the first call acts.
    pub fn shutdown(&self) {
        self.shared.shutdown("request");
    }

    /// Open the listener.
    ///
    /// Debug mode listens on a single accept loop; otherwise the socket is
    /// bound and `worker_count` accept loops are started on it.
    pub async fn start_server(&self, port: u16, worker_count: usize) -> io::Result<()> {
        self.shared.start_server(port, worker_count).await
    }

    /// Serve until the shutdown sequence stops the loop.
    ///
    /// # Errors
    ///
    /// Fails if signal handlers cannot be installed, the listener cannot be
    /// opened, or a pre-start callback cancels the start. In the last case
    /// the shutdown callbacks have already run and had their drain window.
    pub async fn run(self, port: u16, worker_count: usize) -> Result<()> {
        let Self { event_loop, shared } = self;
        let handle = shared.event_loop.clone();

        let signals = if shared.coordinator.application().settings().trap_signals {
            let target = Arc::clone(&shared);
            Some(SignalBridge::install(&handle, move |signal: Signal| {
                let trigger = match signal {
                    Signal::Interrupt => "sigint",
                    Signal::Terminate => "sigterm",
                };
                target.shutdown(trigger);
            })?)
        } else {
            None
        };

        if let Err(e) = shared.start_server(port, worker_count).await {
            tracing::error!(port, error = %e, "Failed to start server");
            return Err(e.into());
        }

        if let Err(e) = shared.coordinator.run_pre_start(&handle) {
            // Stop accepting before the shutdown callbacks run, then give
            // their deferred work its window.
            shared.shutdown("start_cancelled");
            event_loop.run().await;
            return Err(e.into());
        }
        shared.coordinator.schedule_post_start(&handle);

        event_loop.run().await;
        if let Some(signals) = signals {
            signals.dispose();
        }
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
