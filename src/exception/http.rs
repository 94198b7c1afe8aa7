use crate::exception::{ErrorContext, ErrorStage};
use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::Response,
};
use serde::Serialize;

/// Logs every error response: 4xx at warn, everything else at error
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorLogger;

impl ErrorStage for ErrorLogger {
    fn handle(&self, ctx: &ErrorContext<'_>, response: Response) -> Response {
        let status = ctx.error.status();
        let detail = ctx
            .error
            .log_message()
            .map(str::to_string)
            .unwrap_or_else(|| ctx.error.reason());

        if status.is_client_error() {
            tracing::warn!(
                "{} {} failed with {}: {}",
                ctx.method,
                ctx.uri,
                status.as_u16(),
                detail
            );
        } else {
            tracing::error!(
                "{} {} failed with {}: {}",
                ctx.method,
                ctx.uri,
                status.as_u16(),
                detail
            );
        }
        response
    }
}

/// Machine-readable error document
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Type of the underlying error, if there was one
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: String,
    /// Error and its sources, only when tracebacks are served
    pub traceback: Option<Vec<String>>,
}

/// Replaces the response body with a JSON [`ErrorBody`]
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorWriter {
    serve_traceback: bool,
}

impl ErrorWriter {
    pub fn new(serve_traceback: bool) -> Self {
        Self { serve_traceback }
    }

    pub fn body(&self, ctx: &ErrorContext<'_>) -> ErrorBody {
        match ctx.error.cause() {
            Some(cause) => ErrorBody {
                kind: Some(cause.kind.clone()),
                message: cause.message.clone(),
                traceback: self.serve_traceback.then(|| cause.chain.clone()),
            },
            None => ErrorBody {
                kind: None,
                message: ctx.error.reason(),
                traceback: None,
            },
        }
    }
}

impl ErrorStage for ErrorWriter {
    fn handle(&self, ctx: &ErrorContext<'_>, response: Response) -> Response {
        let bytes = match serde_json::to_vec(&self.body(ctx)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize error body");
                return response;
            }
        };

        let (mut parts, _) = response.into_parts();
        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        parts.headers.remove(header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::HttpError;
    use axum::http::{Method, StatusCode, Uri};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    async fn write(writer: ErrorWriter, error: HttpError) -> (Response, serde_json::Value) {
        let method = Method::GET;
        let uri: Uri = "/status/500".parse().unwrap();
        let ctx = ErrorContext {
            method: &method,
            uri: &uri,
            error: &error,
        };
        let response = writer.handle(&ctx, error.clone().into_response());
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap();
        (Response::from_parts(parts, Body::empty()), json)
    }

    #[tokio::test]
    async fn test_body_without_cause_uses_reason() {
        let error = HttpError::new(StatusCode::IM_A_TEAPOT).with_reason("Short and stout");
        let (response, json) = write(ErrorWriter::new(true), error).await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        assert_eq!(
            json,
            serde_json::json!({"type": null, "message": "Short and stout", "traceback": null})
        );
    }

    #[tokio::test]
    async fn test_traceback_only_when_enabled() {
        let io = std::io::Error::other("disk on fire");
        let (_, hidden) = write(ErrorWriter::new(false), HttpError::internal(io)).await;
        assert_eq!(hidden["type"], "Error");
        assert_eq!(hidden["message"], "disk on fire");
        assert!(hidden["traceback"].is_null());

        let io = std::io::Error::other("disk on fire");
        let (_, shown) = write(ErrorWriter::new(true), HttpError::internal(io)).await;
        assert_eq!(shown["traceback"], serde_json::json!(["disk on fire"]));
    }
}
