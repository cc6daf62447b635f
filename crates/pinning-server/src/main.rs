//! Pinning service binary
//!
//! Wires configuration, signer, storage, engine and the two HTTP servers
//! together, then waits for SIGINT/SIGTERM and shuts everything down in
//! order: servers drain, workers stop, storage closes.

use std::sync::Arc;
use std::time::Duration;

use pinning_core::Signer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pinning_server::{
    create_ops_router, create_router, storage, AppState, Collector, Config, EngineConfig,
    PinningEngine,
};

/// Fixed loopback listener for metrics and health probes
const OPS_LISTEN: &str = "127.0.0.1:9090";

/// How long draining connections may take before shutdown gives up
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;

    let signer = Arc::new(Signer::from_pem_file(config.tls.private_key_path())?);

    let store = storage::new(
        config.storage.backend(),
        config.app_id.to_string(),
        Arc::clone(&signer),
    )
    .await?;

    let registry = prometheus::Registry::new();
    let collector = Collector::new();
    registry.register(Box::new(collector.clone()))?;

    let engine = PinningEngine::new(
        config.keys.clone(),
        collector,
        EngineConfig {
            probe_timeout: config.tls.timeout(),
            flush_interval: config.tls.dump_interval(),
        },
    );

    let flush_store = Arc::clone(&store);
    let _flush_task = engine.start_periodic_flush(move |snapshot| {
        let store = Arc::clone(&flush_store);
        async move { store.save_keys(&snapshot).await }
    });

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        signer,
        registry,
    });

    let api = create_router(Arc::clone(&state), config.server.write_timeout());
    let ops = create_ops_router(state);

    let api_listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    let ops_listener = tokio::net::TcpListener::bind(OPS_LISTEN).await?;

    info!(
        listen = %config.server.listen,
        ops = OPS_LISTEN,
        storage = %config.storage.kind,
        app_id = %config.app_id,
        "starting application"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let api_shutdown = shutdown.clone();
    let api_server = async move {
        axum::serve(api_listener, api)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await
    };

    let ops_shutdown = shutdown.clone();
    let ops_server = async move {
        axum::serve(ops_listener, ops)
            .with_graceful_shutdown(async move { ops_shutdown.cancelled().await })
            .await
    };

    let servers =
        tokio::spawn(async move { tokio::try_join!(api_server, ops_server).map(|_| ()) });

    shutdown.cancelled().await;
    info!("shutdown signal received");

    engine.shutdown();

    match tokio::time::timeout(SHUTDOWN_DEADLINE, servers).await {
        Err(_) => warn!("graceful shutdown deadline exceeded"),
        Ok(Ok(Ok(()))) => info!("http servers stopped gracefully"),
        Ok(Ok(Err(err))) => {
            let _ = store.close().await;
            return Err(err.into());
        }
        Ok(Err(join_err)) => {
            let _ = store.close().await;
            return Err(join_err.into());
        }
    }

    if let Err(err) = store.close().await {
        error!(error = %err, "failed to close storage");
    }

    info!("application stopped");
    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        token.cancel();
    });
}
