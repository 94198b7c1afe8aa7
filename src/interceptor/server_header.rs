use crate::interceptor::{Interceptor, InterceptorResult, Next};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request, header},
};

/// Sets the `Server` response header, or strips it when there is no value
#[derive(Clone, Debug, Default)]
pub struct ServerHeaderInterceptor {
    value: Option<HeaderValue>,
}

impl ServerHeaderInterceptor {
    /// `None` (or a value that is not a valid header) removes the header
    pub fn new(value: Option<String>) -> Self {
        let value = value.and_then(|v| match HeaderValue::from_str(&v) {
            Ok(header) => Some(header),
            Err(_) => {
                tracing::warn!(value = %v, "Ignoring invalid Server header value");
                None
            }
        });
        Self { value }
    }
}

#[async_trait]
impl Interceptor for ServerHeaderInterceptor {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
        let mut response = next.run(request).await?;
        match &self.value {
            Some(value) => {
                response.headers_mut().insert(header::SERVER, value.clone());
            }
            None => {
                response.headers_mut().remove(header::SERVER);
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptorLayer;
    use axum::{Router, response::IntoResponse, routing::get};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn server_header(interceptor: ServerHeaderInterceptor) -> Option<String> {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([(header::SERVER, "handler/0.1")], "ok").into_response() }),
            )
            .layer(InterceptorLayer::new(vec![Arc::new(interceptor)]));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        response
            .headers()
            .get(header::SERVER)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_header_set_or_removed() {
        let named = ServerHeaderInterceptor::new(Some("orders/1.2.3".to_string()));
        assert_eq!(server_header(named).await.as_deref(), Some("orders/1.2.3"));

        assert_eq!(server_header(ServerHeaderInterceptor::new(None)).await, None);
    }
}
