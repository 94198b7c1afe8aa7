//! Test harness
//!
//! [`TestApplication`] runs an application's lifecycle on a fresh loop
//! without opening a socket. Requests go straight into the same middleware
//! stack the transport would use.
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_status_endpoint() {
//!     let app = TestApplication::new(Application::builder().router(routes())).unwrap();
//!     app.start().unwrap();
//!
//!     let response = app.request(Request::get("/status/204").body(Body::empty()).unwrap()).await;
//!     assert_eq!(response.status(), StatusCode::NO_CONTENT);
//!
//!     app.stop().await;
//! }
//! ```

use std::time::Duration;

use axum::{Router, body::Body, http::Request, response::Response};
use tokio::task::JoinHandle;
use tower::ServiceExt;

use crate::error::Result;
use crate::lifecycle::{
    Application, ApplicationBuilder, LifecycleCoordinator, LifecycleError, StopReason,
};
use crate::runtime::{EventLoop, LoopHandle};
use crate::server::{TransportOptions, service_stack};

/// An application under test
pub struct TestApplication {
    coordinator: LifecycleCoordinator,
    event_loop: LoopHandle,
    runner: Option<JoinHandle<()>>,
    service: Router,
    shutdown_limit: Duration,
    poll_interval: Duration,
}

impl TestApplication {
    /// Shutdown limit used by [`stop`](Self::stop)
    pub const SHUTDOWN_LIMIT: Duration = Duration::from_millis(250);
    /// Poll interval used by [`stop`](Self::stop)
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Build the application and start its loop.
    ///
    /// Must be called within a tokio runtime. Callbacks do not run until
    /// [`start`](Self::start).
    pub fn new(builder: ApplicationBuilder) -> Result<Self> {
        let (app, registry) = builder.build()?;
        let service = service_stack(&app, &TransportOptions::from_settings(app.settings()));

        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let runner = tokio::spawn(event_loop.run());

        Ok(Self {
            coordinator: LifecycleCoordinator::new(app, registry),
            event_loop: handle,
            runner: Some(runner),
            service,
            shutdown_limit: Self::SHUTDOWN_LIMIT,
            poll_interval: Self::POLL_INTERVAL,
        })
    }

    /// Override the limits [`stop`](Self::stop) uses
    pub fn with_shutdown_limits(mut self, shutdown_limit: Duration, poll_interval: Duration) -> Self {
        self.shutdown_limit = shutdown_limit;
        self.poll_interval = poll_interval;
        self
    }

    /// Run the pre-start callbacks and schedule the post-start ones
    pub fn start(&self) -> std::result::Result<(), LifecycleError> {
        self.coordinator.start(&self.event_loop)
    }

    pub fn application(&self) -> &Application {
        self.coordinator.application()
    }

    pub fn loop_handle(&self) -> LoopHandle {
        self.event_loop.clone()
    }

    /// The full middleware stack around the application routes
    pub fn service(&self) -> Router {
        self.service.clone()
    }

    /// Send one request through the middleware stack
    pub async fn request(&self, request: Request<Body>) -> Response {
        match self.service.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Run the shutdown sequence and wait for the loop to stop
    pub async fn stop(mut self) -> Option<StopReason> {
        let waiter = self
            .coordinator
            .stop(&self.event_loop, self.shutdown_limit, self.poll_interval);
        waiter.wait().await;
        if let Some(runner) = self.runner.take() {
            if let Err(e) = runner.await {
                tracing::warn!(error = %e, "Test loop did not exit cleanly");
            }
        }
        waiter.stop_reason()
    }
}

impl Drop for TestApplication {
    fn drop(&mut self) {
        self.event_loop.stop();
    }
}
