use std::convert::Infallible;
use std::net::SocketAddr;

use cbrc20_context::{try_error, try_info, Context};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Process-wide counters exported on `/metrics` when `server.prometheus`
/// is set. One registry, a
/// handful of named counters, cloned cheaply into every task that needs
/// to bump one.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub orders_created: IntCounter,
    pub orders_transitioned: IntCounterVec,
    pub blocks_processed: IntCounter,
    pub reorgs_handled: IntCounter,
    pub fetch_retries: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let orders_created =
            IntCounter::new("cbrc20_orders_created_total", "Deploy orders created").unwrap();
        let orders_transitioned = IntCounterVec::new(
            Opts::new("cbrc20_orders_transitioned_total", "Order state transitions, by target status"),
            &["status"],
        )
        .unwrap();
        let blocks_processed =
            IntCounter::new("cbrc20_blocks_processed_total", "Blocks processed by BlockProcessor").unwrap();
        let reorgs_handled =
            IntCounter::new("cbrc20_reorgs_handled_total", "Reorgs detected and rolled back").unwrap();
        let fetch_retries =
            IntCounter::new("cbrc20_fetch_retries_total", "BlockFetcher per-block retry attempts").unwrap();

        registry.register(Box::new(orders_created.clone())).unwrap();
        registry.register(Box::new(orders_transitioned.clone())).unwrap();
        registry.register(Box::new(blocks_processed.clone())).unwrap();
        registry.register(Box::new(reorgs_handled.clone())).unwrap();
        registry.register(Box::new(fetch_retries.clone())).unwrap();

        Metrics {
            registry,
            orders_created,
            orders_transitioned,
            blocks_processed,
            reorgs_handled,
            fetch_retries,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

async fn serve_metrics(registry: Registry, _req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    encoder.encode(&metric_families, &mut buffer).expect("prometheus encode never fails");
    Ok(Response::new(Body::from(buffer)))
}

/// Serves `/metrics` with the registry's current snapshot until the
/// process exits.
pub async fn start_serving(port: u16, registry: Registry, ctx: Context) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| serve_metrics(registry.clone(), req)))
        }
    });

    try_info!(ctx, "metrics: serving prometheus metrics on {}", addr);
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        try_error!(ctx, "metrics: server error: {}", e);
    }
}
