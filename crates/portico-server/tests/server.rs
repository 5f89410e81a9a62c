//! End-to-end tests against real loopback listeners.

mod common;

use bytes::Bytes;
use common::{capture, capture_at, get, loopback, read_head, send};
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use portico_core::{envelope, handler_fn, BoxFuture, BoxHandler, ProviderError, Request, RequestContext, Response};
use portico_middleware::{BoxedMiddleware, Middleware, MiddlewareArgs, Next};
use portico_server::{
    ip_provider_fn, ConfigError, DefaultRoute, Route, Server, ServerConfig, ServerError, ServerState,
    ShutdownSignal, TlsConfig, WaitGroup,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;

type Journal = Arc<Mutex<Vec<String>>>;

fn hello() -> BoxHandler {
    handler_fn(|ctx, _req| async move { envelope::send_text(&ctx, StatusCode::OK, "hello") })
}

fn hello_routes(_config: &ServerConfig) -> Vec<Route> {
    vec![Route::get("/hello", "Say hello", hello())]
}

async fn started(builder: portico_server::ConfigBuilder, routes: fn(&ServerConfig) -> Vec<Route>) -> Server {
    let server = Server::new(routes, builder).await.unwrap();
    server.start(std::future::pending()).unwrap();
    server
}

#[tokio::test]
async fn test_invalid_address_fails_before_binding() {
    let bound = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&bound);
    let binder = move |_config: &ServerConfig| {
        flag.store(true, Ordering::SeqCst);
        Vec::new()
    };

    let err = Server::new(binder, ServerConfig::builder().address("localhost"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServerError::Config(ConfigError::InvalidAddress { .. })));
    assert!(!bound.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_same_address_twice_is_a_listener_error() {
    let builder = loopback();
    let address = builder.clone().build().unwrap().address().to_string();
    let _first = Server::new(hello_routes, builder).await.unwrap();

    let err = Server::new(hello_routes, ServerConfig::builder().address(address))
        .await
        .unwrap_err();

    assert!(err.is_listener());
    assert!(matches!(err, ServerError::Listener { .. }));
}

#[tokio::test]
async fn test_invalid_tls_material_leaves_port_free() {
    let builder = loopback();
    let address = builder.clone().build().unwrap().address().to_string();

    let err = Server::new(
        hello_routes,
        builder.tls(TlsConfig::from_pem("not a certificate", "not a key")),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServerError::Tls(_)));

    let server = Server::new(hello_routes, ServerConfig::builder().address(address)).await;
    assert!(server.is_ok());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (captured, _guard) = capture();
    let server = started(loopback(), hello_routes).await;

    let reply = get(server.local_addr(), "/missing").await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert!(reply.body.is_empty());
    assert_eq!(reply.headers["cache-control"], "no-cache, no-store, must-revalidate");

    let records = captured.with_message("response");
    let record = records
        .iter()
        .find(|record| record.field("response_code") == Some("404"))
        .unwrap();
    assert_eq!(record.level, Level::ERROR);
    assert_eq!(record.field("response_status"), Some("fail"));
    assert_eq!(record.field("request_path"), Some("/missing"));

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_wrong_method_is_not_allowed() {
    let server = started(loopback(), hello_routes).await;

    let reply = send(server.local_addr(), Method::POST, "/hello", &[]).await;

    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.headers["allow"], "GET");

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

fn panicking_routes(_config: &ServerConfig) -> Vec<Route> {
    vec![
        Route::get("/hello", "Say hello", hello()),
        Route::get("/boom", "Always panics", handler_fn(|_ctx, _req| async move { explode() })),
    ]
}

fn explode() -> Response {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_panic_is_recovered_and_server_keeps_serving() {
    let (captured, _guard) = capture();
    let server = started(loopback(), panicking_routes).await;

    let reply = get(server.local_addr(), "/boom").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);

    let recovered = captured.with_message("recovered from handler panic");
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].field("panic"), Some("handler exploded"));
    assert!(!recovered[0].field("stacktrace").unwrap_or_default().is_empty());
    assert_eq!(
        recovered[0].field("trace_id"),
        reply.headers["x-request-id"].to_str().ok()
    );

    let responses = captured.with_message("response");
    let answered = responses
        .iter()
        .find(|record| record.field("response_code") == Some("500"))
        .unwrap();
    assert_eq!(answered.field("request_path"), Some("/boom"));
    assert_eq!(answered.field("request_method"), Some("GET"));

    let reply = get(server.local_addr(), "/hello").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "hello");

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_generated_trace_id_matches_log_and_handler() {
    let (captured, _guard) = capture();
    let echo = |_config: &ServerConfig| {
        vec![Route::get(
            "/trace",
            "Echo the trace id",
            handler_fn(|ctx, _req| async move {
                let trace_id = ctx.trace_id().unwrap_or_default().to_string();
                envelope::send_text(&ctx, StatusCode::OK, trace_id)
            }),
        )]
    };
    let server = Server::new(echo, loopback()).await.unwrap();
    server.start(std::future::pending()).unwrap();

    let reply = get(server.local_addr(), "/trace").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(!reply.body.is_empty());
    assert_eq!(reply.headers["x-request-id"], reply.body.as_str());

    let completed = captured.with_message("request completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].field("trace_id"), Some(reply.body.as_str()));

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_supplied_trace_id_is_kept() {
    let echo = |_config: &ServerConfig| {
        vec![Route::get(
            "/trace",
            "Echo the trace id",
            handler_fn(|ctx, _req| async move {
                let trace_id = ctx.trace_id().unwrap_or_default().to_string();
                envelope::send_text(&ctx, StatusCode::OK, trace_id)
            }),
        )]
    };
    let server = Server::new(echo, loopback().trace_header("X-Correlation-ID"))
        .await
        .unwrap();
    server.start(std::future::pending()).unwrap();

    let reply = send(
        server.local_addr(),
        Method::GET,
        "/trace",
        &[("x-correlation-id", "req-42")],
    )
    .await;

    assert_eq!(reply.body, "req-42");
    assert_eq!(reply.headers["x-correlation-id"], "req-42");

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

struct Recorder {
    label: &'static str,
    journal: Journal,
}

impl Middleware for Recorder {
    fn name(&self) -> &'static str {
        self.label
    }

    fn process<'a>(
        &'a self,
        _args: &'a MiddlewareArgs,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            self.journal.lock().push(format!("{}-before", self.label));
            let response = next.run(ctx, request).await;
            self.journal.lock().push(format!("{}-after", self.label));
            response
        })
    }
}

fn recorder(label: &'static str, journal: &Journal) -> BoxedMiddleware {
    Arc::new(Recorder {
        label,
        journal: Arc::clone(journal),
    })
}

#[tokio::test]
async fn test_global_middleware_order() {
    let journal = Journal::default();
    let handler_journal = Arc::clone(&journal);
    let binder = move |_config: &ServerConfig| {
        let journal = Arc::clone(&handler_journal);
        vec![Route::get(
            "/ordered",
            "Record the handler",
            handler_fn(move |ctx, _req| {
                let journal = Arc::clone(&journal);
                async move {
                    journal.lock().push("H".to_string());
                    envelope::send_status(&ctx, StatusCode::NO_CONTENT)
                }
            }),
        )]
    };
    let server = Server::new(
        binder,
        loopback().middlewares([recorder("A", &journal), recorder("B", &journal)]),
    )
    .await
    .unwrap();
    server.start(std::future::pending()).unwrap();

    let reply = get(server.local_addr(), "/ordered").await;

    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(
        *journal.lock(),
        vec!["A-before", "B-before", "H", "B-after", "A-after"]
    );

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_ip_route_success() {
    let builder = loopback()
        .enable_default_routes(&[DefaultRoute::Ip])
        .ip_provider(ip_provider_fn(|| async { Ok("203.0.113.7".to_string()) }));
    let server = started(builder, hello_routes).await;

    let reply = get(server.local_addr(), "/ip").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "203.0.113.7");

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_ip_route_failure_hides_provider_error() {
    let builder = loopback()
        .enable_default_routes(&[DefaultRoute::Ip])
        .ip_provider(ip_provider_fn(|| async {
            Err(ProviderError::Transport("connection refused by upstream".to_string()))
        }));
    let server = started(builder, hello_routes).await;

    let reply = get(server.local_addr(), "/ip").await;

    assert_eq!(reply.status, StatusCode::FAILED_DEPENDENCY);
    assert!(reply.body.is_empty());

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

fn order_routes(_config: &ServerConfig) -> Vec<Route> {
    vec![Route::get("/orders", "List orders", hello())]
}

#[tokio::test]
async fn test_index_lists_itself_first() {
    let builder = loopback().enable_default_routes(&[DefaultRoute::Index, DefaultRoute::Ping]);
    let server = started(builder, order_routes).await;

    let reply = get(server.local_addr(), "/").await;
    let listing: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
    let paths: Vec<&str> = listing["routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|route| route["path"].as_str().unwrap())
        .collect();

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(paths, ["/", "/ping", "/orders"]);

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_default_routes_off_unless_enabled() {
    let server = started(loopback().enable_default_routes(&[DefaultRoute::Ping]), hello_routes).await;

    assert_eq!(get(server.local_addr(), "/ping").await.status, StatusCode::OK);
    assert_eq!(get(server.local_addr(), "/status").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(server.local_addr(), "/").await.status, StatusCode::NOT_FOUND);

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_metrics_without_handler_is_not_implemented() {
    let server = started(loopback().enable_all_default_routes(), hello_routes).await;

    let reply = get(server.local_addr(), "/metrics").await;
    assert_eq!(reply.status, StatusCode::NOT_IMPLEMENTED);

    let reply = get(server.local_addr(), "/pprof/build").await;
    assert_eq!(reply.status, StatusCode::OK);

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_status_route_uses_injected_health_check() {
    let unhealthy = handler_fn(|ctx, _req| async move {
        envelope::send_json(
            &ctx,
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({"database": "down"}),
        )
    });
    let builder = loopback()
        .enable_default_routes(&[DefaultRoute::Status])
        .default_route_handler(DefaultRoute::Status, unhealthy);
    let server = started(builder, hello_routes).await;

    let reply = get(server.local_addr(), "/status").await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body, r#"{"database":"down"}"#);

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

fn slow_routes(_config: &ServerConfig) -> Vec<Route> {
    vec![
        Route::get(
            "/slow",
            "Sleeps before answering",
            handler_fn(|ctx, _req| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                envelope::send_text(&ctx, StatusCode::OK, "done")
            }),
        ),
        Route::get(
            "/stuck",
            "Never answers in time",
            handler_fn(|ctx, _req| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                envelope::send_status(&ctx, StatusCode::OK)
            }),
        ),
    ]
}

#[tokio::test]
async fn test_request_timeout_answers_service_unavailable() {
    let server = started(loopback().request_timeout(Duration::from_millis(50)), slow_routes).await;

    let reply = get(server.local_addr(), "/slow").await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body, "timeout");

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_shared_signal_shuts_down_every_instance() {
    let signal = ShutdownSignal::new();
    let group = WaitGroup::new();
    let shared = || loopback().shutdown_signal(signal.clone()).wait_group(group.clone());

    let first = started(shared(), hello_routes).await;
    let second = started(shared(), hello_routes).await;
    assert_eq!(group.count(), 2);

    signal.trigger();
    tokio::time::timeout(Duration::from_secs(5), group.wait())
        .await
        .unwrap();

    assert_eq!(group.count(), 0);
    for server in [&first, &second] {
        server.wait().await.unwrap();
        assert_eq!(server.state(), ServerState::Closed);
        assert!(tokio::net::TcpStream::connect(server.local_addr()).await.is_err());
    }
}

#[tokio::test]
async fn test_drain_lets_in_flight_request_finish() {
    let server = started(loopback(), slow_routes).await;
    let addr = server.local_addr();

    let in_flight = tokio::spawn(async move { get(addr, "/slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown(Duration::from_secs(5)).await.unwrap();

    let reply = in_flight.await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "done");
}

#[tokio::test]
async fn test_drain_deadline_still_releases_counter() {
    let group = WaitGroup::new();
    let server = started(loopback().wait_group(group.clone()), slow_routes).await;
    let addr = server.local_addr();

    let in_flight = tokio::spawn(async move {
        let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
        let request = http::Request::get(format!("http://{addr}/stuck"))
            .body(Full::new(Bytes::new()))
            .unwrap();
        client.request(request).await.is_ok()
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = server.shutdown(Duration::from_millis(100)).await.unwrap_err();

    assert!(matches!(err, ServerError::Shutdown(_)));
    assert_eq!(group.count(), 0);
    assert!(!in_flight.await.unwrap());
}

fn mixed_routes(config: &ServerConfig) -> Vec<Route> {
    let mut routes = hello_routes(config);
    routes.extend(slow_routes(config));
    routes
}

fn completed_for<'r>(records: &'r [common::Record], path: &str) -> Option<&'r common::Record> {
    records.iter().find(|record| record.field("request_path") == Some(path))
}

#[tokio::test]
async fn test_completion_record_level_follows_timeout() {
    let (captured, _guard) = capture();
    let server = started(loopback().request_timeout(Duration::from_millis(50)), mixed_routes).await;

    assert_eq!(get(server.local_addr(), "/hello").await.status, StatusCode::OK);
    assert_eq!(
        get(server.local_addr(), "/slow").await.status,
        StatusCode::SERVICE_UNAVAILABLE
    );

    let completed = captured.with_message("request completed");
    let fast = completed_for(&completed, "/hello").unwrap();
    assert_eq!(fast.level, Level::DEBUG);
    assert_eq!(fast.field("response_code"), Some("200"));
    assert!(fast.field("timed_out").is_none());

    let slow = completed_for(&completed, "/slow").unwrap();
    assert_eq!(slow.level, Level::INFO);
    assert_eq!(slow.field("response_code"), Some("503"));
    assert_eq!(slow.field("timed_out"), Some("true"));

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_request_dump_is_redacted_and_debug_only() {
    let credentials = [("authorization", "Bearer hunter2")];

    let (captured, guard) = capture();
    let server = started(loopback(), hello_routes).await;
    send(server.local_addr(), Method::GET, "/hello?token=s3cr3t", &credentials).await;
    server.shutdown(Duration::from_secs(1)).await.unwrap();
    drop(guard);

    let completed = captured.with_message("request completed");
    let dump = completed_for(&completed, "/hello")
        .and_then(|record| record.field("request_dump"))
        .unwrap();
    assert!(dump.starts_with("GET /hello"));
    assert!(dump.contains("[REDACTED]"));
    assert!(!dump.contains("hunter2"));
    assert!(!dump.contains("s3cr3t"));

    let (captured, _guard) = capture_at(LevelFilter::INFO);
    let server = started(loopback().request_timeout(Duration::from_millis(50)), mixed_routes).await;
    send(server.local_addr(), Method::GET, "/slow", &credentials).await;
    server.shutdown(Duration::from_secs(1)).await.unwrap();

    let completed = captured.with_message("request completed");
    let record = completed_for(&completed, "/slow").unwrap();
    assert_eq!(record.level, Level::INFO);
    assert!(record.field("request_dump").is_none());
}

#[tokio::test]
async fn test_read_timeout_answers_request_timeout() {
    let server = started(loopback().read_timeout(Duration::from_millis(100)), hello_routes).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\nabc")
        .await
        .unwrap();
    let head = read_head(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 408"), "unexpected head: {head:?}");
    drop(stream);
    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_write_timeout_closes_connection() {
    let server = started(loopback().write_timeout(Duration::from_millis(50)), slow_routes).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    stream
        .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let head = read_head(&mut stream).await;

    assert!(head.is_empty(), "unexpected head: {head:?}");
    drop(stream);
    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

/// Sends a request head in two parts with `pause` in between.
async fn slow_head(server: &Server, pause: Duration) -> String {
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n")
        .await
        .unwrap();
    // Lets the connection task read the first part before the clock jumps
    tokio::time::sleep(Duration::from_millis(10)).await;
    tokio::time::sleep(pause).await;

    let _ = stream.write_all(b"\r\n").await;
    read_head(&mut stream).await
}

#[tokio::test(start_paused = true)]
async fn test_header_timeout_closes_slow_head() {
    let server = started(loopback().header_timeout(Duration::from_secs(1)), hello_routes).await;

    let head = slow_head(&server, Duration::from_secs(5)).await;

    assert!(!head.starts_with("HTTP/1.1 200"), "unexpected head: {head:?}");
    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_header_timeout_waits_for_head() {
    let server = started(loopback().header_timeout(Duration::ZERO), hello_routes).await;

    let head = slow_head(&server, Duration::from_secs(45)).await;

    assert!(head.starts_with("HTTP/1.1 200"), "unexpected head: {head:?}");
    server.shutdown(Duration::from_secs(1)).await.unwrap();
}
