//! Demo server.
//!
//! Configured from `PORTICO_*` environment variables (and a `.env` file when
//! present), with every default route enabled and Prometheus metrics on
//! `/metrics`. Stops on SIGTERM or SIGINT.

use http::StatusCode;
use portico::prelude::*;
use std::sync::Arc;

fn routes(_config: &ServerConfig) -> Vec<Route> {
    vec![
        Route::get(
            "/hello/{name}",
            "Greet someone",
            handler_fn(|ctx, _req| async move {
                let greeting = format!("hello, {}", ctx.param("name").unwrap_or("stranger"));
                envelope::send_text(&ctx, StatusCode::OK, greeting)
            }),
        ),
        Route::post(
            "/echo",
            "Echo the request body size",
            handler_fn(|ctx, req| async move {
                envelope::send_json(
                    &ctx,
                    StatusCode::OK,
                    &serde_json::json!({ "bytes": req.body().len() }),
                )
            }),
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(&LogConfig::production())?;
    let metrics = install_recorder(&MetricsConfig::default())?;

    let group = WaitGroup::new();
    let builder = ServerConfig::from_env()?
        .enable_all_default_routes()
        .default_route_handler(DefaultRoute::Metrics, Arc::new(MetricsHandler::new(metrics)))
        .ip_provider(Arc::new(HttpIpProvider::new()))
        .middleware(Arc::new(InstrumentMiddleware::new()))
        .shutdown_signal(ShutdownSignal::with_os_signals())
        .wait_group(group.clone())
        .span(tracing::info_span!("server", service = "portico-demo"));

    let server = Server::new(routes, builder).await?;
    server.start(std::future::pending())?;

    group.wait().await;
    server.wait().await?;
    Ok(())
}
