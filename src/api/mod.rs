use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{conversation::PromptBuilder, db::ChatSink, inference::InferenceClient};

pub mod error;
pub mod handlers;
pub mod types;

/// Shared per-process dependencies, injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub prompts: Arc<PromptBuilder>,
    pub infer: Arc<InferenceClient>,
    pub sink: Arc<dyn ChatSink>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::landing_page))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
}

/// Full application: routes, CORS for the browser front-end, state.
pub fn app(state: AppState) -> Router {
    router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}
