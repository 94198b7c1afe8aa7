//! Request guards
//!
//! A guard decides whether a request may reach the application routes at
//! all. The only built-in guard is the [`ReadinessGate`], which keeps
//! traffic out until startup work has been scheduled and again once
//! shutdown has begun.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

mod layer;

pub use layer::{GuardLayer, GuardMiddleware};

/// Standard Result type for Guard
/// Ok(()) means allowed
/// Err(GuardError) means denied
pub type GuardResult = Result<(), GuardError>;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The service is starting up or shutting down
    #[error("Service unavailable")]
    Unavailable,
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        match self {
            // Fixed response: status only, empty body.
            GuardError::Unavailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }
}

/// The Guard trait
/// Implement this to keep requests away from the routes
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    async fn can_activate(&self, request: &Request<Body>) -> GuardResult;
}

/// Latch that is open while the application accepts traffic.
///
/// Closed on creation, opened by the lifecycle coordinator once post-start
/// callbacks are scheduled (or finished, depending on the readiness mode),
/// and closed again when shutdown begins. Clones share the latch.
#[derive(Clone, Debug, Default)]
pub struct ReadinessGate {
    ready: Arc<AtomicBool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let traffic through
    pub fn set(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            tracing::debug!("Readiness gate opened");
        }
    }

    /// Turn traffic away
    pub fn clear(&self) {
        if self.ready.swap(false, Ordering::SeqCst) {
            tracing::debug!("Readiness gate closed");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Guard for ReadinessGate {
    async fn can_activate(&self, _request: &Request<Body>) -> GuardResult {
        if self.is_ready() {
            Ok(())
        } else {
            Err(GuardError::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_transitions() {
        let gate = ReadinessGate::new();
        let request = Request::new(Body::empty());
        assert!(gate.can_activate(&request).await.is_err());

        let shared = gate.clone();
        shared.set();
        assert!(gate.is_ready());
        assert!(gate.can_activate(&request).await.is_ok());

        gate.clear();
        assert!(!shared.is_ready());
    }
}
