use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use credit_ledger::api::{self, ApiState};
use credit_ledger::config::LedgerConfig;
use credit_ledger::ledger::{AllocationProcessor, ConsumptionProcessor, LedgerQueryService};
use credit_ledger::storage::LedgerDatabase;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = LedgerConfig::from_env()?;
    let host = config.server_host.clone();
    let port = config.server_port;

    info!(
        host = %host,
        port,
        data_dir = %config.data_dir.display(),
        "starting credit-ledger service"
    );

    let database = Arc::new(LedgerDatabase::new(config.data_dir.clone())?);
    let allocations = AllocationProcessor::new(Arc::clone(&database), config.max_txn_attempts);
    let consumption = ConsumptionProcessor::new(Arc::clone(&database), config.max_txn_attempts);
    let queries = LedgerQueryService::new(Arc::clone(&database), config.low_utilization_threshold);

    let _reconcile_task = if config.enable_auto_reconcile {
        Some(queries.start_reconciliation_task(Duration::from_secs(config.reconcile_interval_secs)))
    } else {
        None
    };

    let state = Arc::new(ApiState::new(
        allocations,
        consumption,
        queries,
        Arc::clone(&database),
        config,
    ));
    let router = api::create_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("credit-ledger service shutting down");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
