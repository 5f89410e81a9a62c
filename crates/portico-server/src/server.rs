//! Server instance lifecycle.
//!
//! A [`Server`] moves through five states, never backwards:
//!
//! ```text
//! Created -> Listening -> Running -> ShuttingDown -> Closed
//! ```
//!
//! Construction validates the configuration, assembles the router and binds
//! the listener; it only returns once the instance is `Listening`.
//! [`Server::start`] is non-blocking: it adds one to the shared
//! [`WaitGroup`](crate::WaitGroup) and spawns two supervised tasks:
//!
//! - the serve loop, accepting connections until the listener closes
//! - the shutdown watcher, waiting for the caller's cancellation or the
//!   shared [`ShutdownSignal`](crate::ShutdownSignal)
//!
//! [`Server::shutdown`] drains in-flight connections within a deadline, then
//! removes the instance from the wait group.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_server::{Route, Server, ServerConfig, ShutdownSignal, WaitGroup};
//!
//! let signal = ShutdownSignal::with_os_signals();
//! let group = WaitGroup::new();
//!
//! let server = Server::new(
//!     |_config: &ServerConfig| vec![Route::get("/hello", "Say hello", hello())],
//!     ServerConfig::builder()
//!         .address(":8080")
//!         .shutdown_signal(signal.clone())
//!         .wait_group(group.clone()),
//! )
//! .await?;
//!
//! server.start(std::future::pending())?;
//! group.wait().await;
//! ```

use crate::config::{ConfigBuilder, ServerConfig};
use crate::error::ServerError;
use crate::listener::{Accepted, Listener};
use crate::route::{Binder, RouteInfo};
use crate::router::Router;
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use futures_util::FutureExt;
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use parking_lot::Mutex;
use portico_core::{envelope, RequestContext, Response};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Configuration validated, listener not opened yet.
    ///
    /// Only reported in construction logs: [`Server::new`] returns once the
    /// instance is `Listening`, so [`Server::state`] never yields it.
    Created,
    /// Listener open, tasks not started.
    Listening,
    /// Serve loop and shutdown watcher running.
    Running,
    /// Drain in progress.
    ShuttingDown,
    /// Terminal.
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Listening => "listening",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        })
    }
}

type TaskResult = Result<(), ServerError>;

struct Inner {
    config: ServerConfig,
    router: Router,
    local_addr: SocketAddr,
    tls: bool,
    listener: Mutex<Option<Listener>>,
    state: Mutex<ServerState>,
    /// Stops the serve loop and the watcher of this instance only.
    stop: ShutdownSignal,
    /// Closes connections still open at the drain deadline.
    force_close: ShutdownSignal,
    graceful: Mutex<Option<GracefulShutdown>>,
    serve_done: watch::Sender<bool>,
    tasks: Mutex<JoinSet<TaskResult>>,
}

/// A server instance.
///
/// Clones share the same instance, so one clone can be started while
/// another is kept for shutdown.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Validates `builder`, assembles the router from the default routes and
    /// the routes supplied by `binder`, and binds the listener.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] if the configuration is invalid; nothing is
    ///   bound in that case
    /// - [`ServerError::Listener`] if the address cannot be bound
    /// - [`ServerError::Tls`] if the TLS material is invalid
    pub async fn new(binder: impl Binder, builder: ConfigBuilder) -> Result<Self, ServerError> {
        let config = builder.build()?;
        Self::with_config(binder, config).await
    }

    /// Like [`Server::new`], from an already built configuration.
    ///
    /// # Errors
    ///
    /// See [`Server::new`].
    pub async fn with_config(binder: impl Binder, config: ServerConfig) -> Result<Self, ServerError> {
        tracing::debug!(parent: config.span(), address = config.address(), state = %ServerState::Created, "server created");
        let routes = binder.bind(&config);
        let router = Router::new(&config, routes);

        let listener = Listener::bind(&config).await?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Listener {
            address: config.address().to_string(),
            source,
        })?;
        let tls = listener.is_tls();

        tracing::info!(
            parent: config.span(),
            address = %local_addr,
            tls,
            routes = router.routes().len(),
            state = %ServerState::Listening,
            "listener bound"
        );

        let (serve_done, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                router,
                local_addr,
                tls,
                listener: Mutex::new(Some(listener)),
                state: Mutex::new(ServerState::Listening),
                stop: ShutdownSignal::new(),
                force_close: ShutdownSignal::new(),
                graceful: Mutex::new(None),
                serve_done,
                tasks: Mutex::new(JoinSet::new()),
            }),
        })
    }

    /// Starts serving without blocking.
    ///
    /// Adds one to the shared wait group, then spawns the serve loop and the
    /// shutdown watcher. The watcher shuts the instance down with the
    /// configured shutdown timeout once `cancel` completes or the shared
    /// shutdown signal fires. The deadline starts when the drain starts, so
    /// an already expired caller deadline does not cut the drain short.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidState`] unless the instance is `Listening`.
    pub fn start<F>(&self, cancel: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = {
            let mut state = self.inner.state.lock();
            let listener = match *state {
                ServerState::Listening => self.inner.listener.lock().take(),
                _ => None,
            };
            let Some(listener) = listener else {
                return Err(ServerError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            };

            *self.inner.graceful.lock() = Some(GracefulShutdown::new());
            self.inner.config.wait_group().add(1);
            *state = ServerState::Running;
            listener
        };

        let span = self.inner.config.span().clone();
        let mut tasks = self.inner.tasks.lock();
        tasks.spawn(
            supervise("shutdown watcher", watch_shutdown(Arc::clone(&self.inner), cancel))
                .instrument(span.clone()),
        );
        tasks.spawn(supervise("serve loop", serve(Arc::clone(&self.inner), listener)).instrument(span));

        tracing::info!(
            parent: self.inner.config.span(),
            address = %self.inner.local_addr,
            tls = self.inner.tls,
            "server started"
        );
        Ok(())
    }

    /// Stops accepting connections and drains the open ones within `timeout`.
    ///
    /// Connections still open at the deadline are closed. A started instance
    /// leaves the shared wait group once the drain is over, whether it
    /// completed or not. Only the first call has any effect; later calls
    /// return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// [`ServerError::Shutdown`] if the deadline elapsed before every
    /// connection finished.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ServerError> {
        let previous = {
            let mut state = self.inner.state.lock();
            let previous = *state;
            if matches!(previous, ServerState::ShuttingDown | ServerState::Closed) {
                tracing::debug!(parent: self.inner.config.span(), state = %previous, "shutdown already requested");
                return Ok(());
            }
            *state = ServerState::ShuttingDown;
            previous
        };

        self.inner.stop.trigger();
        let started = previous == ServerState::Running;
        let result = if started {
            self.drain(timeout).await
        } else {
            drop(self.inner.listener.lock().take());
            Ok(())
        };

        *self.inner.state.lock() = ServerState::Closed;
        if started {
            self.inner.config.wait_group().done();
        }

        match &result {
            Ok(()) => tracing::info!(parent: self.inner.config.span(), "server stopped"),
            Err(e) => tracing::warn!(parent: self.inner.config.span(), error = %e, "server stopped with open connections"),
        }
        result
    }

    async fn drain(&self, timeout: Duration) -> Result<(), ServerError> {
        let inner = Arc::clone(&self.inner);
        let mut serve_done = inner.serve_done.subscribe();

        let drained = async move {
            // Wait for the listener to be dropped before draining
            let _ = serve_done.wait_for(|done| *done).await;
            let graceful = inner.graceful.lock().take();
            if let Some(graceful) = graceful {
                graceful.shutdown().await;
            }
        };

        if tokio::time::timeout(timeout, drained).await.is_ok() {
            Ok(())
        } else {
            self.inner.force_close.trigger();
            Err(ServerError::Shutdown(timeout))
        }
    }

    /// Waits for both tasks to end and returns the first failure.
    ///
    /// Only the first caller observes the task outcomes.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Serve`] if the serve loop failed
    /// - [`ServerError::TaskPanicked`] if a task panicked
    pub async fn wait(&self) -> Result<(), ServerError> {
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        let mut first_error = None;

        while let Some(joined) = tasks.join_next().await {
            // Cancelled tasks only happen at runtime teardown
            if let Ok(Err(e)) = joined {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.inner.state.lock()
    }

    /// Returns the bound socket address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Returns every bound route, defaults first.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        self.inner.router.routes()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.inner.local_addr)
            .field("tls", &self.inner.tls)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn supervise<F>(name: &'static str, task: F) -> impl Future<Output = TaskResult> + Send
where
    F: Future<Output = TaskResult> + Send,
{
    AssertUnwindSafe(task).catch_unwind().map(move |outcome| {
        outcome.unwrap_or_else(|_| {
            tracing::error!(task = name, "server task panicked");
            Err(ServerError::TaskPanicked(name))
        })
    })
}

async fn watch_shutdown<F>(inner: Arc<Inner>, cancel: F) -> TaskResult
where
    F: Future<Output = ()> + Send,
{
    let shared = inner.config.shutdown_signal().recv();
    let stopped = inner.stop.recv();

    tokio::select! {
        () = cancel => tracing::debug!("cancellation received"),
        () = shared => tracing::debug!("shared shutdown signal received"),
        () = stopped => return Ok(()),
    }

    let timeout = inner.config.shutdown_timeout();
    // Logged by shutdown itself
    let _ = Server { inner }.shutdown(timeout).await;
    Ok(())
}

/// Marks the serve loop as finished, even when it unwinds.
struct ServeDone<'a>(&'a watch::Sender<bool>);

impl Drop for ServeDone<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

async fn serve(inner: Arc<Inner>, listener: Listener) -> TaskResult {
    let _done = ServeDone(&inner.serve_done);
    let stop = inner.stop.recv();
    tokio::pin!(stop);

    loop {
        let accepted = tokio::select! {
            biased;
            () = &mut stop => None,
            accepted = listener.accept() => Some(accepted),
        };

        let (stream, remote_addr) = match accepted {
            Some(Ok(accepted)) => accepted,
            Some(Err(e)) if is_connection_error(&e) => {
                tracing::debug!(error = %e, "failed to accept connection");
                continue;
            }
            Some(Err(e)) => {
                drop(listener);
                tracing::error!(address = %inner.local_addr, error = %e, "serve loop stopped unexpectedly");
                return Err(ServerError::Serve(e));
            }
            None => {
                drop(listener);
                tracing::info!(address = %inner.local_addr, "listener closed");
                return Ok(());
            }
        };

        let handshake = listener.handshake(stream);
        let connection_inner = Arc::clone(&inner);
        tokio::spawn(
            async move {
                match handshake.await {
                    Ok(Accepted::Plain(stream)) => serve_connection(connection_inner, stream, remote_addr).await,
                    Ok(Accepted::Tls(stream)) => serve_connection(connection_inner, stream, remote_addr).await,
                    Err(e) => tracing::debug!(%remote_addr, error = %e, "TLS handshake failed"),
                }
            }
            .in_current_span(),
        );
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

async fn serve_connection<I>(inner: Arc<Inner>, stream: I, remote_addr: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service_inner = Arc::clone(&inner);
    let service = service_fn(move |request: http::Request<Incoming>| {
        let inner = Arc::clone(&service_inner);
        async move { handle_request(inner, request, remote_addr).await }
    });

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new());
    // hyper applies its own default when left unset
    let header_timeout = inner.config.header_timeout();
    builder.header_read_timeout((!header_timeout.is_zero()).then_some(header_timeout));
    let connection = builder.serve_connection(TokioIo::new(stream), service);

    let watched = inner.graceful.lock().as_ref().map(|graceful| graceful.watch(connection));
    let Some(watched) = watched else {
        tracing::debug!(%remote_addr, "connection dropped during shutdown");
        return;
    };

    tokio::select! {
        result = watched => {
            if let Err(e) = result {
                tracing::debug!(%remote_addr, error = %e, "connection closed with error");
            }
        }
        () = inner.force_close.recv() => {
            tracing::debug!(%remote_addr, "connection closed at shutdown deadline");
        }
    }
}

async fn handle_request(
    inner: Arc<Inner>,
    request: http::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Response, io::Error> {
    let write_timeout = inner.config.write_timeout();
    within(write_timeout, respond(&inner, request, remote_addr))
        .await
        .ok_or_else(|| {
            tracing::warn!(%remote_addr, timeout = ?write_timeout, "write timeout elapsed, closing connection");
            io::Error::new(io::ErrorKind::TimedOut, "write timeout elapsed")
        })
}

async fn respond(inner: &Inner, request: http::Request<Incoming>, remote_addr: SocketAddr) -> Response {
    let ctx = RequestContext::new()
        .with_received_at(Utc::now())
        .with_remote_addr(remote_addr);

    let (parts, body) = request.into_parts();
    let body = match within(inner.config.read_timeout(), body.collect()).await {
        Some(Ok(collected)) => collected.to_bytes(),
        Some(Err(e)) => {
            tracing::debug!(%remote_addr, error = %e, "failed to read request body");
            return envelope::send_status(&ctx, StatusCode::BAD_REQUEST);
        }
        None => return envelope::send_status(&ctx, StatusCode::REQUEST_TIMEOUT),
    };

    inner
        .router
        .dispatch(ctx, http::Request::from_parts(parts, body))
        .await
}

/// Runs `future` within `limit`; zero means no limit.
async fn within<F: Future>(limit: Duration, future: F) -> Option<F::Output> {
    if limit.is_zero() {
        return Some(future.await);
    }
    tokio::time::timeout(limit, future).await.ok()
}
