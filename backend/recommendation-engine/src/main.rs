use anyhow::Context;
use recommendation_engine::{
    models::{RetrainStatus, RetrainTarget},
    Config, DatasetSnapshot, InMemoryStore, RecommendationServer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load config
    let config = Config::from_env().context("Failed to load config")?;
    let snapshot_path = config.service.snapshot_path.clone();
    let models_dir = config.service.models_dir.clone();

    info!(
        service = %config.service.service_name,
        snapshot = %snapshot_path.display(),
        "Starting offline retrain"
    );

    let dataset = DatasetSnapshot::load(&snapshot_path)?;
    let store = Arc::new(InMemoryStore::from_dataset(dataset));
    let server = RecommendationServer::new(config, store);

    let stats = server.get_catalog_stats().await?;
    info!(
        users = stats.users,
        items = stats.items,
        ratings = stats.ratings,
        unscored = stats.unscored_interactions,
        mean_rating = ?stats.mean_rating,
        "Catalog loaded"
    );

    let target = RetrainTarget::All;
    server.request_retrain(target)?;

    let mut last_progress = None;
    let job = loop {
        let job = server.get_retrain_status();
        if last_progress != Some(job.progress) {
            info!(progress = job.progress, message = %job.message, "Retrain progress");
            last_progress = Some(job.progress);
        }
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    match job.status {
        RetrainStatus::Completed => info!(message = %job.message, "Retrain completed"),
        _ => warn!(message = %job.message, "Retrain finished with errors"),
    }

    for metrics in server.get_model_metrics() {
        info!(
            strategy = %metrics.strategy,
            version = metrics.version,
            rmse = ?metrics.rmse,
            mae = ?metrics.mae,
            precision_at_k = metrics.precision_at_k,
            recall_at_k = metrics.recall_at_k,
            f1_at_k = metrics.f1_at_k,
            ndcg_at_k = metrics.ndcg_at_k,
            coverage = metrics.coverage,
            diversity = ?metrics.diversity,
            "Model metrics"
        );
    }

    std::fs::create_dir_all(&models_dir)
        .with_context(|| format!("Failed to create {}", models_dir.display()))?;
    let manifest_path = models_dir.join("registry_manifest.json");
    let manifest = serde_json::to_string_pretty(&server.registry().manifest())?;
    std::fs::write(&manifest_path, manifest)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    info!(path = %manifest_path.display(), "Registry manifest written");

    if job.status != RetrainStatus::Completed {
        error!(failed = job.failed.len(), "Some strategies failed to train");
        anyhow::bail!("retrain finished with status {:?}: {}", job.status, job.message);
    }

    Ok(())
}
