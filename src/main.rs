use std::sync::Arc;

use tuneserve::api::job_routes;
use tuneserve::backend::{ModelBackend, SimulatedBackend};
use tuneserve::config::ServiceConfig;
use tuneserve::error::Result;
use tuneserve::service::JobService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    eprintln!("Tuneserve v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Jobs API: http://{}/api/jobs", config.bind_addr);
    eprintln!("   Status API: http://{}/api/status/{{id}}", config.bind_addr);
    eprintln!(
        "   Workers: {}, retention: {}s",
        config.workers,
        config.retention.as_secs()
    );

    let backend: Arc<dyn ModelBackend> = Arc::new(SimulatedBackend::new(config.stage_delay));
    let service = JobService::start(&config, backend);
    let app = job_routes(Arc::clone(&service));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    // Jobs already accepted still run to completion.
    service.shutdown().await;

    Ok(())
}
