use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hf_chat_relay::{
    api::{self, AppState},
    config::AppConfig,
    conversation::PromptBuilder,
    db::DBLayer,
    inference::InferenceClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // -----------------------------
    // Configuration (fails fast)
    // -----------------------------
    let config = AppConfig::from_env()?;
    info!(
        endpoint = %config.inference.endpoint,
        format = ?config.inference.payload_format,
        max_attempts = config.inference.max_attempts,
        retry_delay = ?config.inference.retry_delay,
        "inference configured"
    );

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let db = DBLayer::new(&config.db_path)
        .with_context(|| format!("failed to open chat store at {}", config.db_path.display()))?;
    let prompts = PromptBuilder::new(
        &config.prompt,
        config.inference.payload_format,
        config.inference.model_name.clone(),
        config.inference.wait_for_model,
    )?;
    let infer = InferenceClient::new(&config.inference)?;

    let state = AppState {
        prompts: Arc::new(prompts),
        infer: Arc::new(infer),
        sink: Arc::new(db),
    };

    let app = api::app(state);

    let addr = config.listen_addr();
    info!("🌐 HTTP listening on http://{addr}");
    info!("💬 Chat endpoint at http://{addr}/chat");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
    }
}
