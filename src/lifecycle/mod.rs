//! Lifecycle Module
//!
//! Sequences the callbacks of one application run and drives its
//! time-bounded graceful shutdown.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Settings + logging
//!    ↓
//! 2. Signal bridge installed
//!    ↓
//! 3. Transport listening (readiness gate closed → 503)
//!    ↓
//! 4. Pre-start callbacks (in order)    ← BeforeRun, failure exits with 70
//!    ↓
//! 5. Post-start callbacks scheduled    ← OnStart, not awaited
//!    ↓
//! 6. Readiness gate set
//!    ↓
//! [Running...]
//!    ↓
//! 7. Shutdown signal (SIGTERM/SIGINT)
//!    ↓
//! 8. Transport stops accepting, gate cleared
//!    ↓
//! 9. Shutdown callbacks (in order)     ← OnShutdown, failures logged
//!    ↓
//! 10. ShutdownWaiter drains deferred work until done or deadline
//!    ↓
//! 11. Loop stops
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use runway::lifecycle::{Application, BoxError, DeferredHandle, ShutdownResult};
//! use runway::runtime::LoopHandle;
//!
//! Application::builder()
//!     .before_run("config-check", |app: &Application, _: &LoopHandle| {
//!         app.config().get("DATABASE_URL").ok_or("DATABASE_URL is not set")?;
//!         Ok::<(), BoxError>(())
//!     })
//!     .on_shutdown("flush", move |_: &Application| {
//!         let handle = DeferredHandle::spawn(&event_loop, flush_events());
//!         Ok::<ShutdownResult, BoxError>(handle.into())
//!     })
//!     .run();
//! ```

mod application;
mod coordinator;
mod deferred;
mod error;
mod registry;
mod signals;
mod traits;
mod waiter;

pub use application::{Application, ApplicationBuilder};
pub use coordinator::LifecycleCoordinator;
pub use deferred::{Completion, DeferredHandle};
pub use error::{BoxError, EXIT_START_CANCELLED, LifecycleError, Result};
pub use registry::{Callback, CallbackRegistry, Hook, Phase};
pub use signals::{ShutdownAction, Signal, SignalBridge};
pub use traits::{BeforeRun, OnShutdown, OnStart, ShutdownResult};
pub use waiter::{ShutdownWaiter, StopReason, WaiterState};
