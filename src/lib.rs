//! # Runway
//!
//! A lifecycle runner for long-running HTTP services.
//!
//! Runway sequences an application's startup callbacks, keeps traffic away
//! from the routes until startup work has been scheduled, and drives a
//! time-bounded graceful shutdown that waits for in-flight work before the
//! process exits.
//!
//! ## Features
//!
//! - **Ordered callbacks**: pre-start (fatal on error), post-start (scheduled, not awaited)
//!   and shutdown (failures isolated) phases, each run in registration order
//! - **Readiness gate**: requests get an empty 503 until the application is ready
//! - **Bounded drain**: deferred shutdown work and in-flight requests are waited on
//!   until they finish or the shutdown limit passes, whichever comes first
//! - **Signal bridge**: SIGINT/SIGTERM become a single shutdown request on the loop
//! - **Error pipeline**: logging and JSON error bodies selected by settings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runway::prelude::*;
//!
//! async fn hello() -> &'static str {
//!     "hello"
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     Application::builder()
//!         .router(Router::new().route("/", get(hello)))
//!         .before_run("config-check", |app: &Application, _: &LoopHandle| {
//!             tracing::info!(port = app.settings().port, "Configuration checked");
//!             Ok::<(), BoxError>(())
//!         })
//!         .on_shutdown("goodbye", |_: &Application| {
//!             tracing::info!("Shutting down");
//!             Ok::<ShutdownResult, BoxError>(ShutdownResult::Immediate)
//!         })
//!         .run()
//! }
//! ```

pub mod config;
pub mod error;
pub mod exception;
pub mod guard;
pub mod interceptor;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod server;
pub mod testing;

// Re-export core types
pub use config::{ConfigService, Settings};
pub use error::{Error, Result};
pub use lifecycle::{Application, ApplicationBuilder};
pub use server::run;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use runway::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, ReadinessMode, Settings};
    pub use crate::error::{Error, Result};
    pub use crate::exception::{ErrorPipeline, ErrorStage, HttpError};
    pub use crate::guard::{Guard, GuardError, GuardResult, ReadinessGate};
    pub use crate::interceptor::{Interceptor, InterceptorResult, Next};
    pub use crate::lifecycle::{
        Application, ApplicationBuilder, BeforeRun, BoxError, Callback, CallbackRegistry,
        DeferredHandle, LifecycleCoordinator, LifecycleError, OnShutdown, OnStart, Phase,
        ShutdownResult, ShutdownWaiter,
    };
    pub use crate::runtime::{EventLoop, LoopHandle};
    pub use crate::server::{Supervisor, run};
    pub use async_trait::async_trait;
    pub use axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{delete, get, patch, post, put},
    };
    pub use std::sync::Arc;
}
