use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use specchio::{
    cache::{CacheError, ObjectCache},
    config::{self, LoadError},
    infra::{
        InfraError,
        http::{IpRateLimiter, ProxyState, build_router},
        metrics::Metrics,
        telemetry,
    },
    origin::S3ObjectStore,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

/// Inflight requests get this long to finish once a shutdown signal lands.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to create cache: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_startup_error(&error);
        process::exit(1);
    }
}

fn report_startup_error(error: &StartupError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "startup error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "startup error");
    });
}

async fn run() -> Result<(), StartupError> {
    let settings = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let origin = Arc::new(S3ObjectStore::new(&settings.origin).await);
    let cache = Arc::new(ObjectCache::new(
        settings.cache.capacity.get(),
        settings.cache.ttl,
        settings.cache.stale_ttl,
    )?);
    let metrics = Arc::new(Metrics::new()?);
    let limiter = (settings.rate_limit.rps > 0.0)
        .then(|| Arc::new(IpRateLimiter::new(settings.rate_limit.rps, settings.rate_limit.rps)));

    let state = ProxyState {
        settings: Arc::new(settings),
        cache,
        origin,
        metrics,
        limiter,
    };

    serve(state).await
}

async fn serve(state: ProxyState) -> Result<(), StartupError> {
    let settings = state.settings.clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(
        addr = %settings.server.addr,
        bucket = %settings.origin.bucket,
        cache_capacity = settings.cache.capacity.get(),
        read_timeout = ?settings.server.read_timeout,
        write_timeout = ?settings.server.write_timeout,
        idle_timeout = ?settings.server.idle_timeout,
        rate_limit_rps = settings.rate_limit.rps,
        "server starting"
    );

    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let server = async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signal_tx.send(());
        })
        .await
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline(signal_rx) => {
            warn!(grace = ?SHUTDOWN_GRACE, "graceful shutdown deadline exceeded, aborting inflight requests");
        }
    }

    Ok(())
}

/// Resolves `SHUTDOWN_GRACE` after the shutdown signal fires; never resolves
/// if no signal arrives.
async fn drain_deadline(signal_rx: oneshot::Receiver<()>) {
    if signal_rx.await.is_ok() {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    } else {
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
