use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scrip::adapters::{AccrualClient, PostgresStore};
use scrip::api::{create_router, AppState};
use scrip::config::AppConfig;
use scrip::error::Result;
use scrip::services::{
    OrderProcessor, OrderService, RetryBuffer, TokenService, UserService, WalletService,
    WithdrawalService,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_flags_and_env();
    init_logging(&config.log_level);

    let store = Arc::new(PostgresStore::new(&config.database_uri, config.db_max_connections).await?);
    store.migrate().await?;

    // Work queue: intake and the retry sweeper produce, the single processor
    // consumes. Bounded so admission throttles under backpressure.
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retries = RetryBuffer::start(
        config.retry_ttl(),
        config.retry_cleanup_interval(),
        queue_tx.clone(),
    );
    let oracle = Arc::new(AccrualClient::new(
        &config.accrual_address,
        config.accrual_rate_per_minute,
        config.accrual_timeout(),
    )?);

    let processor = OrderProcessor::new(store.clone(), oracle, retries, queue_tx.clone());
    let processor_handle = tokio::spawn(processor.run(queue_rx, shutdown_rx));

    let state = AppState {
        users: Arc::new(UserService::new(store.clone())),
        orders: Arc::new(OrderService::new(store.clone(), queue_tx.clone())),
        wallet: Arc::new(WalletService::new(store.clone())),
        withdrawals: Arc::new(WithdrawalService::new(store.clone())),
        tokens: Arc::new(TokenService::new(
            &config.token_secret,
            config.token_lifetime(),
        )),
        request_timeout: config.request_timeout(),
    };
    let app = create_router(state);

    let listener = TcpListener::bind(&config.run_address).await?;
    info!("listening on http://{}", listener.local_addr()?);

    // One task listens for the signal; the server drains gracefully while a
    // watchdog enforces the grace deadline.
    let (signal_tx, signal_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let graceful = {
        let mut signal_rx = signal_rx.clone();
        async move {
            let _ = signal_rx.changed().await;
        }
    };
    {
        let mut signal_rx = signal_rx.clone();
        tokio::spawn(async move {
            if signal_rx.changed().await.is_ok() {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                error!("graceful shutdown timed out, forcing exit");
                std::process::exit(1);
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await?;

    // HTTP is drained; close the work queue and stop the processor. In-flight
    // uncommitted orders are recovered from storage on the next start.
    let _ = shutdown_tx.send(true);
    drop(queue_tx);
    if tokio::time::timeout(SHUTDOWN_GRACE, processor_handle)
        .await
        .is_err()
    {
        warn!("order processor did not stop within the grace period");
    }

    info!("shutdown complete");
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},sqlx=warn")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate());
    #[cfg(unix)]
    let hangup = unix_signal(signal::unix::SignalKind::hangup());
    #[cfg(unix)]
    let quit = unix_signal(signal::unix::SignalKind::quit());

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = hangup => {},
        _ = quit => {},
    }
    info!("shutdown signal received");
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to install signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
