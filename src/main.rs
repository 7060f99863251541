//! # SkillSwap Cache - Main Entry Point
//!
//! Runs the caching and performance layer as a standalone HTTP service
//! exposing the performance endpoints and a liveness route.
//!
//! Configuration comes from the YAML file named by `SKILLSWAP_CONFIG`, or
//! from defaults plus environment overrides when it is unset. When
//! `SKILLSWAP_WARMUP_FILE` names a JSON warmup payload, the cache regions are
//! pre-populated in the background after startup.

use anyhow::Context;
use axum::{routing::get, Json, Router};
use serde_json::json;
use tracing::info;

use skillswap_cache::caching::WarmupData;
use skillswap_cache::core::config::AppConfig;
use skillswap_cache::observability::init_logging;
use skillswap_cache::server::{serve, AppContext};
use skillswap_cache::ServiceError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.logging);

    info!("🚀 Starting SkillSwap cache service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let context = AppContext::initialize(config)
        .await
        .context("failed to initialize application context")?;

    if let Ok(path) = std::env::var("SKILLSWAP_WARMUP_FILE") {
        schedule_warmup(&context, path);
    }

    let api = Router::new().route("/health", get(liveness));
    serve(context, api).await.context("server failed")?;

    info!("✅ SkillSwap cache service shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("SKILLSWAP_CONFIG") {
        Ok(path) => AppConfig::load_from_file(&path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path))?,
        Err(_) => AppConfig::from_env().context("invalid configuration")?,
    };
    Ok(config)
}

fn schedule_warmup(context: &AppContext, path: String) {
    let cache = context.cache.clone();
    context.tasks.spawn("startup_warmup", async move {
        let raw = tokio::fs::read_to_string(&path).await?;
        let data: WarmupData = serde_json::from_str(&raw)?;
        let report = cache.warmup(data).await;
        if report.failed > 0 {
            return Err(ServiceError::cache(format!(
                "{} warmup writes failed from {}",
                report.failed, path
            )));
        }
        Ok(())
    });
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
