//! Error handling pipeline
//!
//! Handlers report failures by returning an [`HttpError`]. The error is
//! carried out of the handler inside the response extensions, and the
//! error interceptor runs it through an [`ErrorPipeline`]: a list of
//! [`ErrorStage`]s chosen from settings, for example logging the failure
//! and then writing a JSON error document.

use axum::{
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::fmt;
use std::sync::Arc;

use crate::config::Settings;

pub mod http;

pub use http::{ErrorLogger, ErrorWriter};

/// The underlying error an [`HttpError`] was built from
#[derive(Debug, Clone)]
pub struct ErrorCause {
    /// Short type name of the error
    pub kind: String,
    /// `Display` output of the error
    pub message: String,
    /// `Display` output of the error and each of its sources
    pub chain: Vec<String>,
}

/// An error response produced by a handler.
///
/// # Example
///
/// ```rust,ignore
/// async fn get_order(Path(id): Path<u64>) -> Result<Json<Order>, HttpError> {
///     let order = repo.find(id).await.map_err(HttpError::internal)?;
///     order.map(Json).ok_or_else(|| HttpError::new(StatusCode::NOT_FOUND).with_reason("No such order"))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    reason: Option<String>,
    log_message: Option<String>,
    cause: Option<ErrorCause>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            log_message: None,
            cause: None,
        }
    }

    /// Error response for an arbitrary error value
    pub fn from_error<E>(status: StatusCode, error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let full_name = std::any::type_name::<E>();
        let kind = full_name
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(full_name)
            .to_string();

        let mut chain = vec![error.to_string()];
        let mut source = error.source();
        while let Some(inner) = source {
            chain.push(inner.to_string());
            source = inner.source();
        }

        Self {
            status,
            reason: None,
            log_message: None,
            cause: Some(ErrorCause {
                kind,
                message: error.to_string(),
                chain,
            }),
        }
    }

    /// 500 response for an unexpected error
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::from_error(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Reason phrase to report instead of the standard one
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Message for the log only, never sent to the client
    pub fn with_log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = Some(message.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Custom reason, else the standard phrase, else `Unknown`
    pub fn reason(&self) -> String {
        match &self.reason {
            Some(reason) => reason.clone(),
            None => self
                .status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
        }
    }

    pub fn log_message(&self) -> Option<&str> {
        self.log_message.as_deref()
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.reason())
    }
}

impl std::error::Error for HttpError {}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = self.status.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// What an [`ErrorStage`] gets to look at
pub struct ErrorContext<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub error: &'a HttpError,
}

/// One step of error handling, e.g. logging or writing a body
pub trait ErrorStage: Send + Sync + 'static {
    /// Inspect the error and return the (possibly rewritten) response
    fn handle(&self, ctx: &ErrorContext<'_>, response: Response) -> Response;
}

/// Ordered list of [`ErrorStage`]s
#[derive(Clone, Default)]
pub struct ErrorPipeline {
    stages: Vec<Arc<dyn ErrorStage>>,
}

impl ErrorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: impl ErrorStage) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Stages selected by `log_errors`, `write_error_bodies` and `serve_traceback`
    pub fn from_settings(settings: &Settings) -> Self {
        let mut pipeline = Self::new();
        if settings.log_errors {
            pipeline = pipeline.with_stage(ErrorLogger);
        }
        if settings.write_error_bodies {
            pipeline = pipeline.with_stage(ErrorWriter::new(settings.serve_traceback));
        }
        pipeline
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order
    pub fn run(&self, ctx: &ErrorContext<'_>, response: Response) -> Response {
        self.stages
            .iter()
            .fold(response, |response, stage| stage.handle(ctx, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("pool exhausted")]
    struct PoolError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_reason_fallbacks() {
        assert_eq!(HttpError::new(StatusCode::NOT_FOUND).reason(), "Not Found");
        assert_eq!(
            HttpError::new(StatusCode::NOT_FOUND).with_reason("No such order").reason(),
            "No such order"
        );
        let odd = StatusCode::from_u16(599).unwrap();
        assert_eq!(HttpError::new(odd).reason(), "Unknown");
    }

    #[test]
    fn test_from_error_captures_chain() {
        let error = HttpError::internal(PoolError {
            source: std::io::Error::other("connection refused"),
        });
        let cause = error.cause().unwrap();
        assert_eq!(cause.kind, "PoolError");
        assert_eq!(cause.message, "pool exhausted");
        assert_eq!(cause.chain, vec!["pool exhausted", "connection refused"]);
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_into_response_carries_error() {
        let response = HttpError::new(StatusCode::CONFLICT).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.extensions().get::<HttpError>().is_some());
    }

    #[test]
    fn test_pipeline_from_settings() {
        let settings = Settings::default();
        assert!(!ErrorPipeline::from_settings(&settings).is_empty());

        let quiet = Settings {
            log_errors: false,
            write_error_bodies: false,
            ..Settings::default()
        };
        assert!(ErrorPipeline::from_settings(&quiet).is_empty());
    }
}
