use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use prompt_graph::api::HasGraphService;
use prompt_graph::config::PromptGraphConfig;
use prompt_graph::generation::{GeminiGenerator, TextGenerator};
use prompt_graph::operations::PromptGraphService;

#[derive(Clone)]
struct DemoApp {
    service: PromptGraphService,
}

impl HasGraphService for DemoApp {
    fn graph_service(&self) -> PromptGraphService {
        self.service.clone()
    }
}

/// Stands in for Gemini when no API key is configured.
struct UnconfiguredGenerator;

#[async_trait]
impl TextGenerator for UnconfiguredGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Err(anyhow!("GEMINI_API_KEY is not set"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PromptGraphConfig::from_env().context("failed to read configuration")?;

    let pool = prompt_graph::db::connect(&config.database_url, config.max_connections)
        .await
        .map_err(|err| anyhow!("{err}"))
        .context("failed to open database")?;
    prompt_graph::db::create_prompt_graph_tables(&pool)
        .await
        .context("failed to run prompt graph migrations")?;

    let generator: Arc<dyn TextGenerator> = match &config.gemini_api_key {
        Some(api_key) => {
            let gemini = GeminiGenerator::new(api_key.clone(), config.gemini_timeout)?
                .with_model(config.gemini_model.clone());
            tracing::info!(model = gemini.model(), "using Gemini text generation");
            Arc::new(gemini)
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set; node execution will fail");
            Arc::new(UnconfiguredGenerator)
        }
    };

    let app_state = DemoApp {
        service: PromptGraphService::new(Arc::new(pool), generator),
    };

    let api = Router::new()
        .route("/healthz", get(health_handler))
        .merge(prompt_graph::api::routes::<DemoApp>());

    let app = Router::new().nest("/api", api).with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.bind_addr))?;

    tracing::info!(
        "prompt graph server listening on http://{}/api",
        config.bind_addr
    );

    axum::serve(listener, app)
        .await
        .context("prompt graph server failed")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}
