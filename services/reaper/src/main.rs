//! Reaper daemon entry point.

use std::sync::Arc;

use anyhow::Result;
use reaper_cloud::{aws::AwsClient, CloudClient};
use reaper_mesos::{HttpMesosClient, MesosClient};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reaper::{api, Config, Reconciler};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to REAPER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting reaper downscaler");
    info!(
        asg_prefixes = ?config.asg_prefixes,
        protected_frameworks = ?config.protected_frameworks,
        protected_tasks_labels = ?config.protected_tasks_labels,
        death_node_mark = %config.death_node_mark,
        mesos_master_url = %config.mesos_master_url,
        tick_interval_secs = config.tick_interval.as_secs(),
        "Configuration loaded"
    );

    let cloud: Arc<dyn CloudClient> = Arc::new(AwsClient::new(config.call_deadline).await);
    let mesos: Arc<dyn MesosClient> = Arc::new(HttpMesosClient::new(
        &config.mesos_master_url,
        config.call_deadline,
    ));

    let (reconciler, status_rx) = Reconciler::new(cloud, mesos, &config);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "Admin surface listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, api::routes(status_rx)).await {
            error!(error = %err, "Admin surface failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    reconciler.run(shutdown_rx).await;

    Ok(())
}
