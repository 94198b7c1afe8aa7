//! HTTP transport
//!
//! Binds the listening socket and serves connections with hyper. Accept
//! loops are plain tokio tasks; each accepted connection runs as tracked
//! loop work, so requests still in flight keep the shutdown drain waiting.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Router, extract::ConnectInfo};
use hyper::{Request, body::Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::stack::service_stack;
use crate::config::Settings;
use crate::lifecycle::Application;
use crate::runtime::LoopHandle;

/// hyper refuses read buffers smaller than this
const MIN_BUFFER_SIZE: usize = 8192;

/// Listener settings taken from the application settings
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub address: String,
    /// Trust proxy headers for the client address
    pub xheaders: bool,
    /// Largest request body accepted, in bytes
    pub max_body_size: Option<usize>,
    /// Largest HTTP/1 read buffer, in bytes
    pub max_buffer_size: Option<usize>,
    /// Set `SO_REUSEPORT` on the listening socket
    pub reuse_port: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl TransportOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            address: settings.address.clone(),
            xheaders: settings.xheaders,
            max_body_size: settings.max_body_size,
            max_buffer_size: settings.max_buffer_size,
            reuse_port: !settings.debug,
        }
    }
}

/// What the supervisor needs from a transport server
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bind the listening socket without accepting yet
    async fn bind(&self, port: u16) -> io::Result<()>;

    /// Bind and accept on a single accept loop
    async fn listen(&self, port: u16) -> io::Result<()> {
        self.bind(port).await?;
        self.start(1)
    }

    /// Start `worker_count` accept loops on the bound socket; 0 means one per CPU
    fn start(&self, worker_count: usize) -> io::Result<()>;

    /// Stop accepting and ask open connections to finish. Idempotent.
    fn stop(&self);

    /// Address actually bound, once bound
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// [`Transport`] serving an application over HTTP/1 and HTTP/2
pub struct HttpTransport {
    service: Router,
    options: TransportOptions,
    event_loop: LoopHandle,
    listener: Mutex<Option<Arc<TcpListener>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl HttpTransport {
    /// Transport for `app`, wrapped in the runner's middleware stack
    pub fn new(app: &Application, options: TransportOptions, event_loop: &LoopHandle) -> Self {
        let service = service_stack(app, &options);
        Self::with_service(service, options, event_loop)
    }

    /// Transport for an already assembled service
    pub fn with_service(service: Router, options: TransportOptions, event_loop: &LoopHandle) -> Self {
        Self {
            service,
            options,
            event_loop: event_loop.clone(),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn bound_listener(&self) -> io::Result<Arc<TcpListener>> {
        self.listener
            .lock()
            .map_err(|_| io::Error::other("transport state poisoned"))?
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not bound"))
    }

    fn accept_loop(&self, worker: usize, listener: Arc<TcpListener>) {
        let service = self.service.clone();
        let event_loop = self.event_loop.clone();
        let shutdown = self.shutdown.clone();
        let max_buffer_size = self.options.max_buffer_size;

        tokio::spawn(async move {
            tracing::debug!(worker, "Accept loop started");
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, remote_addr)) => {
                        let connection = serve_connection(
                            stream,
                            remote_addr,
                            service.clone(),
                            max_buffer_size,
                            shutdown.clone(),
                        );
                        event_loop.spawn(connection);
                    }
                    Err(e) if is_connection_error(&e) => continue,
                    Err(e) => {
                        tracing::error!(worker, error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::debug!(worker, "Accept loop stopped");
        });
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn bind(&self, port: u16) -> io::Result<()> {
        let addr = tokio::net::lookup_host((self.options.address.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve", self.options.address),
                )
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        if self.options.reuse_port {
            socket.set_reuseport(true)?;
        }
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let bound = listener.local_addr()?;

        tracing::info!(address = %bound, "Bound listener");
        *self
            .local_addr
            .lock()
            .map_err(|_| io::Error::other("transport state poisoned"))? = Some(bound);
        *self
            .listener
            .lock()
            .map_err(|_| io::Error::other("transport state poisoned"))? = Some(Arc::new(listener));
        Ok(())
    }

    fn start(&self, worker_count: usize) -> io::Result<()> {
        let listener = self.bound_listener()?;
        let workers = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        for worker in 0..workers {
            self.accept_loop(worker, Arc::clone(&listener));
        }
        tracing::info!(workers, address = ?self.local_addr(), "Accepting connections");
        Ok(())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        if let Ok(mut listener) = self.listener.lock() {
            listener.take();
        }
        tracing::info!("Transport stopped accepting connections");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    service: Router,
    max_buffer_size: Option<usize>,
    shutdown: CancellationToken,
) {
    let hyper_service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote_addr));
        service.clone().oneshot(request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    if let Some(max) = max_buffer_size {
        if max < MIN_BUFFER_SIZE {
            tracing::warn!(max_buffer_size = max, "Buffer size below hyper's minimum, using {MIN_BUFFER_SIZE}");
        }
        builder.http1().max_buf_size(max.max(MIN_BUFFER_SIZE));
    }

    let connection = builder.serve_connection(TokioIo::new(stream), hyper_service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(remote = %remote_addr, error = %e, "Connection closed with error");
                }
                break;
            }
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn local_options() -> TransportOptions {
        TransportOptions {
            address: "127.0.0.1".to_string(),
            reuse_port: false,
            ..TransportOptions::default()
        }
    }

    #[tokio::test]
    async fn test_start_requires_bind() {
        let event_loop = EventLoop::new();
        let transport =
            HttpTransport::with_service(Router::new(), local_options(), &event_loop.handle());
        let err = transport.start(1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_serves_and_stops() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let router = Router::new().route("/", get(|| async { "hello" }));
        let transport = HttpTransport::with_service(router, local_options(), &handle);

        transport.listen(0).await.unwrap();
        let addr = transport.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("hello"));

        transport.stop();
        transport.stop();
        while handle.has_outstanding_work() {
            tokio::task::yield_now().await;
        }
    }
}
