//! Interceptors
//!
//! Per-request middleware that can inspect the request before it reaches
//! the routes and the response on its way out. The runner installs three:
//! the access log, the `Server` header, and the error pipeline.

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use std::future::Future;
use std::pin::Pin;

mod errors;
mod layer;
mod logging;
mod server_header;

pub use errors::ErrorInterceptor;
pub use layer::{InterceptorLayer, InterceptorMiddleware};
pub use logging::{AccessLogInterceptor, AccessRecord};
pub use server_header::ServerHeaderInterceptor;

/// standard return type for Interceptors
pub type InterceptorResult = Result<Response, InterceptorError>;

/// A type-erased error for interceptors
pub type InterceptorError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by the rest of the chain
pub type NextFuture = Pin<Box<dyn Future<Output = InterceptorResult> + Send>>;

/// Represents the next handler in the chain
pub struct Next {
    run: Box<dyn FnOnce(Request<Body>) -> NextFuture + Send>,
}

impl Next {
    /// Create a new Next handler
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Request<Body>) -> NextFuture + Send + 'static,
    {
        Self { run: Box::new(f) }
    }

    /// Execute the next handler
    pub async fn run(self, request: Request<Body>) -> InterceptorResult {
        (self.run)(request).await
    }
}

/// The Interceptor trait
///
/// Interceptors can inspect/modify the request before it reaches the handler,
/// and inspect/modify the response after the handler returns. Returning an
/// error answers the request with a bare 500.
///
/// # Example
/// ```rust,ignore
/// struct TimingInterceptor;
///
/// #[async_trait]
/// impl Interceptor for TimingInterceptor {
///     async fn intercept(&self, req: Request<Body>, next: Next) -> InterceptorResult {
///         let start = Instant::now();
///         let res = next.run(req).await?;
///         tracing::debug!(elapsed = ?start.elapsed(), "Request handled");
///         Ok(res)
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult;
}
