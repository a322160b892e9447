use axum::{
    extract::{rejection::JsonRejection, State},
    response::Html,
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    api::{
        error::ChatError,
        types::{ChatRequest, ChatResponse},
        AppState,
    },
    conversation::sanitize_message,
    inference::normalize,
    model::chat_record::ChatRecord,
};

const INDEX_HTML: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/static/index.html"));

pub async fn landing_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    let Json(req) = body.map_err(|rejection| {
        debug!(%rejection, "unparseable chat body");
        ChatError::Validation("request body must be a JSON object with a string `message`")
    })?;

    let message = req
        .message
        .ok_or(ChatError::Validation("missing `message` field"))?;
    let message = sanitize_message(&message);
    if message.is_empty() {
        return Err(ChatError::Validation("`message` must not be empty"));
    }

    let built = state
        .prompts
        .build(&message)
        .map_err(|err| ChatError::Internal(err.into()))?;

    let response = state.infer.infer(&built.payload).await?;
    let answer = normalize(&response, &state.prompts.normalize_context(&message, &built));

    let record = ChatRecord::new(message.as_str(), answer.as_str());
    if let Err(err) = state.sink.append(&record).await {
        warn!(answer_len = answer.len(), "answer discarded because it could not be stored");
        return Err(err.into());
    }

    info!(
        message_len = message.len(),
        answer_len = answer.len(),
        "chat exchange stored"
    );
    Ok(Json(ChatResponse { response: answer }))
}
