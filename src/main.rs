use anyhow::{anyhow, Context, Result};
use deferred_prom::config::AppConfig;
use deferred_prom::pipeline::Instrumentation;
use deferred_prom::server::{create_app, demo_routes, ServerState};
use deferred_prom::sink::make_sink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal instrumentation error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration from environment")?;

    let sink = make_sink(&config.storage_adapter, &config.namespace)
        .with_context(|| format!("create storage adapter {}", config.storage_adapter))?;
    let instrumentation = Arc::new(
        Instrumentation::new(&config, sink.as_ref(), demo_routes())
            .context("register instruments")?,
    );

    let background = config
        .flush
        .interval()
        .map(|period| instrumentation.clone().spawn_periodic_flush(period));
    if background.is_none() {
        warn!("background flush disabled; observations outside requests wait for shutdown");
    }

    let app = create_app(
        ServerState {
            instrumentation: instrumentation.clone(),
            sink: sink.clone(),
        },
        &config,
    );
    let listener = tokio::net::TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("bind {}", config.listen_address))?;
    info!(
        address = %config.listen_address,
        metrics_route = %config.metrics_route(),
        metrics_route_enabled = config.metrics_route_enabled,
        "HTTP server starting"
    );
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "HTTP server error");
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let buffer = instrumentation.buffer();
                debug!(
                    pending = buffer.len(),
                    lost = buffer.lost(),
                    capacity = buffer.capacity(),
                    "instrumentation heartbeat"
                );
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!(error = %err, "ctrl_c listener error");
                }
                info!("Shutdown signal received, flushing");
                break;
            }
        }
    }

    server.abort();
    if let Some(handle) = background {
        handle.abort();
    }
    let flushing = instrumentation.clone();
    let report = tokio::task::spawn_blocking(move || flushing.flush_all())
        .await
        .context("final flush task")?;
    info!(
        drained = report.drained,
        delivered = report.delivered,
        failed = report.failed,
        lost = instrumentation.buffer().lost(),
        "final flush done"
    );
    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
