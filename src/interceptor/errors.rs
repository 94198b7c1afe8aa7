use crate::exception::{ErrorContext, ErrorPipeline, HttpError};
use crate::interceptor::{Interceptor, InterceptorResult, Next};
use async_trait::async_trait;
use axum::{body::Body, http::Request};

/// Runs responses that carry an [`HttpError`] through the error pipeline
#[derive(Clone, Default)]
pub struct ErrorInterceptor {
    pipeline: ErrorPipeline,
}

impl ErrorInterceptor {
    pub fn new(pipeline: ErrorPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Interceptor for ErrorInterceptor {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = next.run(request).await?;
        let Some(error) = response.extensions().get::<HttpError>().cloned() else {
            return Ok(response);
        };

        let ctx = ErrorContext {
            method: &method,
            uri: &uri,
            error: &error,
        };
        Ok(self.pipeline.run(&ctx, response))
    }
}
