use std::sync::Arc;

use anyhow::Context;

use uploadq_api::app::{build_app, services};
use uploadq_infra::QueueConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    uploadq_observability::init();

    let config = QueueConfig::from_env().context("invalid UPLOADQ_* configuration")?;
    let services = Arc::new(
        services::build_services(config)
            .await
            .context("failed to prepare storage directory")?,
    );
    let workers = services.start_workers();

    let app = build_app(services);

    let bind = std::env::var("UPLOADQ_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    workers.shutdown().await;
    Ok(())
}
