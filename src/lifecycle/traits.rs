//! Lifecycle callback traits
//!
//! These traits define the contract for code that participates in the
//! three callback phases of a run. Closures with the matching signature
//! implement them directly, so most callers never name the traits.

use std::future::Future;

use async_trait::async_trait;

use super::{Application, BoxError, DeferredHandle};
use crate::runtime::LoopHandle;

/// Called synchronously, in registration order, before traffic is served
///
/// Use this hook to:
/// - Validate configuration that cannot be checked statically
/// - Open connection pools
/// - Spawn long-running work onto the loop
///
/// Returning an error cancels the start sequence: no later pre-start
/// callback runs, shutdown callbacks run best-effort, and the process
/// exits with status 70.
///
/// # Example
///
/// ```rust,ignore
/// use runway::lifecycle::{Application, BeforeRun, BoxError};
/// use runway::runtime::LoopHandle;
///
/// struct Migrations;
///
/// impl BeforeRun for Migrations {
///     fn before_run(&self, app: &Application, _loop: &LoopHandle) -> Result<(), BoxError> {
///         if app.config().get("DATABASE_URL").is_none() {
///             return Err("DATABASE_URL is not set".into());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BeforeRun: Send + Sync + 'static {
    /// Run the callback; an error is fatal to the start sequence
    fn before_run(&self, app: &Application, event_loop: &LoopHandle) -> Result<(), BoxError>;
}

impl<F> BeforeRun for F
where
    F: Fn(&Application, &LoopHandle) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn before_run(&self, app: &Application, event_loop: &LoopHandle) -> Result<(), BoxError> {
        self(app, event_loop)
    }
}

/// Scheduled onto the loop once the pre-start callbacks have succeeded
///
/// The start sequence does not wait for these to finish. Anything they
/// need to report must be logged by the callback itself.
#[async_trait]
pub trait OnStart: Send + Sync + 'static {
    /// Run the callback as loop work
    async fn on_start(&self, app: Application, event_loop: LoopHandle);
}

#[async_trait]
impl<F, Fut> OnStart for F
where
    F: Fn(Application, LoopHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_start(&self, app: Application, event_loop: LoopHandle) {
        self(app, event_loop).await
    }
}

/// What a shutdown callback left behind.
#[derive(Debug)]
pub enum ShutdownResult {
    /// Nothing to wait for
    Immediate,
    /// Work still in flight that shutdown should wait for
    Deferred(DeferredHandle),
}

impl From<()> for ShutdownResult {
    fn from(_: ()) -> Self {
        Self::Immediate
    }
}

impl From<DeferredHandle> for ShutdownResult {
    fn from(handle: DeferredHandle) -> Self {
        Self::Deferred(handle)
    }
}

/// Called synchronously, in registration order, once the transport has stopped accepting
///
/// Use this hook to:
/// - Flush buffers
/// - Close connection pools
/// - Hand back a [`DeferredHandle`] for cleanup that needs the loop
///
/// Errors are logged and ignored; the remaining callbacks still run.
///
/// # Example
///
/// ```rust,ignore
/// use runway::lifecycle::{Application, BoxError, DeferredHandle, OnShutdown, ShutdownResult};
///
/// struct Flusher {
///     event_loop: runway::runtime::LoopHandle,
/// }
///
/// impl OnShutdown for Flusher {
///     fn on_shutdown(&self, _app: &Application) -> Result<ShutdownResult, BoxError> {
///         let handle = DeferredHandle::spawn(&self.event_loop, async {
///             flush_pending_events().await
///         });
///         Ok(handle.into())
///     }
/// }
/// ```
pub trait OnShutdown: Send + Sync + 'static {
    /// Run the callback
    fn on_shutdown(&self, app: &Application) -> Result<ShutdownResult, BoxError>;
}

impl<F> OnShutdown for F
where
    F: Fn(&Application) -> Result<ShutdownResult, BoxError> + Send + Sync + 'static,
{
    fn on_shutdown(&self, app: &Application) -> Result<ShutdownResult, BoxError> {
        self(app)
    }
}
