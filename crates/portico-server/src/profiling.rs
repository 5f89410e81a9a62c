//! Runtime introspection behind the `pprof` default route.
//!
//! The sub-path captured by `{*option}` selects the profile:
//!
//! - *(empty)* - JSON index of the available profiles
//! - `runtime` - Tokio runtime metrics
//! - `memory` - process memory usage
//! - `backtrace` - backtrace of the serving thread
//! - `build` - crate name and version
//!
//! Anything else answers 404.

use http::StatusCode;
use portico_core::{envelope, BoxFuture, Handler, Request, RequestContext, Response};
use serde::Serialize;

/// Name of the path parameter carrying the sub-path.
pub const OPTION_PARAM: &str = "option";

const PROFILES: [(&str, &str); 4] = [
    ("runtime", "Tokio runtime worker and task metrics"),
    ("memory", "Physical and virtual memory of the process"),
    ("backtrace", "Backtrace of the serving thread"),
    ("build", "Name and version of the server crate"),
];

#[derive(Serialize)]
struct Profile {
    name: &'static str,
    path: String,
    description: &'static str,
}

#[derive(Serialize)]
struct RuntimeProfile {
    workers: usize,
    alive_tasks: usize,
    global_queue_depth: usize,
}

#[derive(Serialize)]
struct MemoryProfile {
    physical_bytes: usize,
    virtual_bytes: usize,
}

#[derive(Serialize)]
struct BuildProfile {
    name: &'static str,
    version: &'static str,
}

/// Handler dispatching on the `option` path parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfilingHandler;

impl ProfilingHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Handler for ProfilingHandler {
    fn call(&self, ctx: RequestContext, _request: Request) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let option = ctx.param(OPTION_PARAM).unwrap_or_default().trim_matches('/');
            match option {
                "" => {
                    let profiles: Vec<Profile> = PROFILES
                        .iter()
                        .map(|&(name, description)| Profile {
                            name,
                            path: format!("/pprof/{name}"),
                            description,
                        })
                        .collect();
                    envelope::send_json(&ctx, StatusCode::OK, &profiles)
                }
                "runtime" => runtime_profile(&ctx),
                "memory" => memory_profile(&ctx),
                "backtrace" => {
                    let trace = std::backtrace::Backtrace::force_capture().to_string();
                    envelope::send_text(&ctx, StatusCode::OK, trace)
                }
                "build" => envelope::send_json(
                    &ctx,
                    StatusCode::OK,
                    &BuildProfile {
                        name: env!("CARGO_PKG_NAME"),
                        version: env!("CARGO_PKG_VERSION"),
                    },
                ),
                _ => envelope::send_status(&ctx, StatusCode::NOT_FOUND),
            }
        })
    }
}

fn runtime_profile(ctx: &RequestContext) -> Response {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return envelope::send_status(ctx, StatusCode::SERVICE_UNAVAILABLE);
    };
    let metrics = handle.metrics();
    envelope::send_json(
        ctx,
        StatusCode::OK,
        &RuntimeProfile {
            workers: metrics.num_workers(),
            alive_tasks: metrics.num_alive_tasks(),
            global_queue_depth: metrics.global_queue_depth(),
        },
    )
}

fn memory_profile(ctx: &RequestContext) -> Response {
    match memory_stats::memory_stats() {
        Some(stats) => envelope::send_json(
            ctx,
            StatusCode::OK,
            &MemoryProfile {
                physical_bytes: stats.physical_mem,
                virtual_bytes: stats.virtual_mem,
            },
        ),
        None => envelope::send_status(ctx, StatusCode::SERVICE_UNAVAILABLE),
    }
}
