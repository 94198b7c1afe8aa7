use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit};

use super::TransportOptions;
use crate::exception::ErrorPipeline;
use crate::guard::GuardLayer;
use crate::interceptor::{
    AccessLogInterceptor, ErrorInterceptor, Interceptor, InterceptorLayer, ServerHeaderInterceptor,
};
use crate::lifecycle::Application;

/// Wrap the application routes in the runner's middleware.
///
/// Outermost first: access log, `Server` header, error pipeline, readiness
/// gate, application routes. The gate sits in front of routing, so a
/// closed gate answers every path with 503.
pub fn service_stack(app: &Application, options: &TransportOptions) -> Router {
    let settings = app.settings();
    let interceptors: Vec<Arc<dyn Interceptor>> = vec![
        Arc::new(AccessLogInterceptor::new(
            options.xheaders,
            settings.access_log_failures_only,
        )),
        Arc::new(ServerHeaderInterceptor::new(settings.server_header())),
        Arc::new(ErrorInterceptor::new(ErrorPipeline::from_settings(settings))),
    ];

    let router = Router::new()
        .fallback_service(app.router())
        .layer(GuardLayer::single(app.readiness().clone()))
        .layer(InterceptorLayer::new(interceptors));

    match options.max_body_size {
        Some(limit) => router.layer(DefaultBodyLimit::max(limit)),
        None => router,
    }
}
