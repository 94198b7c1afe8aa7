use crate::exception::HttpError;
use crate::interceptor::{Interceptor, InterceptorResult, Next};
use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody as _},
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, Uri, Version, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::Level;

/// One access log entry
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub remote_ip: String,
    pub started_at: DateTime<Utc>,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub bytes_written: Option<u64>,
    pub referer: String,
    pub user_agent: String,
    pub elapsed: Duration,
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self
            .bytes_written
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} - - [{}] \"{} {} {:?}\" {} \"{}\" {} \"{}\" \"{}\" (secs:{:.3})",
            self.remote_ip,
            self.started_at.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.uri,
            self.version,
            self.status.as_u16(),
            self.reason,
            bytes,
            self.referer,
            self.user_agent,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Logs one line per request, at a level chosen by the response status
#[derive(Clone, Debug, Default)]
pub struct AccessLogInterceptor {
    xheaders: bool,
    failures_only: bool,
}

impl AccessLogInterceptor {
    /// `xheaders` trusts `X-Real-IP` / `X-Forwarded-For` for the client
    /// address; `failures_only` drops successful requests to debug.
    pub fn new(xheaders: bool, failures_only: bool) -> Self {
        Self {
            xheaders,
            failures_only,
        }
    }

    /// Level a response with `status` is logged at
    pub fn level_for(&self, status: StatusCode) -> Level {
        match status.as_u16() {
            0..=399 if self.failures_only => Level::DEBUG,
            0..=399 => Level::INFO,
            400..=499 => Level::WARN,
            _ => Level::ERROR,
        }
    }

    fn remote_ip(&self, request: &Request<Body>) -> String {
        if self.xheaders {
            if let Some(ip) = forwarded_ip(request.headers()) {
                return ip;
            }
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return Some(real_ip.trim().to_string());
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn header_or_dash(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

fn emit(level: Level, record: &AccessRecord) {
    let status = record.status.as_u16();
    match level {
        Level::ERROR => tracing::error!(target: "runway::access", status, "{record}"),
        Level::WARN => tracing::warn!(target: "runway::access", status, "{record}"),
        Level::INFO => tracing::info!(target: "runway::access", status, "{record}"),
        _ => tracing::debug!(target: "runway::access", status, "{record}"),
    }
}

#[async_trait]
impl Interceptor for AccessLogInterceptor {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
        let start = Instant::now();
        let started_at = Utc::now();
        let remote_ip = self.remote_ip(&request);
        let method = request.method().clone();
        let uri = request.uri().clone();
        let version = request.version();
        let referer = header_or_dash(request.headers(), header::REFERER);
        let user_agent = header_or_dash(request.headers(), header::USER_AGENT);

        let result = next.run(request).await;

        let (status, reason, bytes_written) = match &result {
            Ok(response) => (
                response.status(),
                reason_for(response),
                response.body().size_hint().exact(),
            ),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "-".to_string(), None),
        };
        let record = AccessRecord {
            remote_ip,
            started_at,
            method,
            uri,
            version,
            status,
            reason,
            bytes_written,
            referer,
            user_agent,
            elapsed: start.elapsed(),
        };
        emit(self.level_for(status), &record);
        result
    }
}

fn reason_for(response: &Response) -> String {
    match response.extensions().get::<HttpError>() {
        Some(error) => error.reason(),
        None => response
            .status()
            .canonical_reason()
            .unwrap_or("-")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_by_status() {
        let normal = AccessLogInterceptor::new(false, false);
        let quiet = AccessLogInterceptor::new(false, true);
        for (code, level, quiet_level) in [
            (200, Level::INFO, Level::DEBUG),
            (303, Level::INFO, Level::DEBUG),
            (400, Level::WARN, Level::WARN),
            (404, Level::WARN, Level::WARN),
            (500, Level::ERROR, Level::ERROR),
            (599, Level::ERROR, Level::ERROR),
        ] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(normal.level_for(status), level, "status {code}");
            assert_eq!(quiet.level_for(status), quiet_level, "status {code}");
        }
    }

    #[test]
    fn test_record_format() {
        let record = AccessRecord {
            remote_ip: "1.1.1.1".to_string(),
            started_at: DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z")
                .unwrap()
                .with_timezone(&Utc),
            method: Method::GET,
            uri: "/search?q=42".parse().unwrap(),
            version: Version::HTTP_11,
            status: StatusCode::OK,
            reason: "OK".to_string(),
            bytes_written: None,
            referer: "-".to_string(),
            user_agent: "-".to_string(),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            record.to_string(),
            "1.1.1.1 - - [05/Mar/2024:07:08:09 +0000] \"GET /search?q=42 HTTP/1.1\" 200 \"OK\" - \"-\" \"-\" (secs:1.500)"
        );
    }

    #[test]
    fn test_remote_ip_sources() {
        let mut request = Request::get("/")
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 4000))));

        assert_eq!(AccessLogInterceptor::new(false, false).remote_ip(&request), "192.168.1.7");
        assert_eq!(AccessLogInterceptor::new(true, false).remote_ip(&request), "10.0.0.1");

        request
            .headers_mut()
            .insert("x-real-ip", "172.16.0.9".parse().unwrap());
        assert_eq!(AccessLogInterceptor::new(true, false).remote_ip(&request), "172.16.0.9");
    }
}
