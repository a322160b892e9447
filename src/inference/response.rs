use serde_json::Value;
use tracing::warn;

use crate::conversation::truncate_at_stop;

/// Entity sequences that survive a single unescape pass when upstream
/// double-encodes its output.
const RESIDUAL_ENTITIES: &[(&str, &str)] = &[
    ("&#39;", "'"),
    ("&#x27;", "'"),
    ("&apos;", "'"),
    ("&quot;", "\""),
    ("&#34;", "\""),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&amp;", "&"),
];

/// The shapes a text-generation endpoint is known to answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    SingleAnswer { generated_text: String },
    AnswerList(Vec<String>),
    ChatCompletion { content: String },
    UpstreamError { error: String },
    Unrecognized(Value),
}

impl InferenceResponse {
    pub fn from_json(value: Value) -> Self {
        if let Some(text) = generated_text(&value) {
            return InferenceResponse::SingleAnswer {
                generated_text: text,
            };
        }

        if let Some(items) = value.as_array() {
            if items.first().and_then(generated_text).is_some() {
                return InferenceResponse::AnswerList(
                    items.iter().filter_map(generated_text).collect(),
                );
            }
        }

        if let Some(content) = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            return InferenceResponse::ChatCompletion {
                content: content.to_string(),
            };
        }

        if let Some(error) = value.get("error") {
            let error = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return InferenceResponse::UpstreamError { error };
        }

        InferenceResponse::Unrecognized(value)
    }

    /// Decodes a raw response body; a body that is not JSON is kept as a string.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_json(value),
            Err(_) => InferenceResponse::Unrecognized(Value::String(body.to_string())),
        }
    }

    /// The raw generated text, if the response carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            InferenceResponse::SingleAnswer { generated_text } => Some(generated_text),
            InferenceResponse::AnswerList(items) => items.first().map(String::as_str),
            InferenceResponse::ChatCompletion { content } => Some(content),
            InferenceResponse::UpstreamError { .. } | InferenceResponse::Unrecognized(_) => None,
        }
    }
}

fn generated_text(value: &Value) -> Option<String> {
    value
        .get("generated_text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Everything the normalizer needs to know about the exchange.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub marker: &'a str,
    pub user_message: &'a str,
    pub prompt_text: Option<&'a str>,
    pub stop_sequence: Option<&'a str>,
    pub fallback: &'a str,
}

pub fn normalize(response: &InferenceResponse, ctx: &NormalizeContext<'_>) -> String {
    let raw = match response.text() {
        Some(text) if !text.trim().is_empty() => text,
        Some(_) => return ctx.fallback.to_string(),
        None => {
            match response {
                InferenceResponse::UpstreamError { error } => {
                    warn!(error = %error, "inference endpoint returned an error object")
                }
                InferenceResponse::Unrecognized(value) => {
                    warn!(body = %value, "unrecognized inference response shape")
                }
                _ => {}
            }
            return ctx.fallback.to_string();
        }
    };

    let text = truncate_at_stop(raw, ctx.stop_sequence);
    let text = strip_prompt_echo(text, ctx.prompt_text);
    let answer = extract_answer(text, ctx.marker, ctx.user_message);
    unescape(&answer)
}

/// Drops everything up to and including an echoed prompt, wherever it starts.
fn strip_prompt_echo<'a>(text: &'a str, prompt: Option<&str>) -> &'a str {
    match prompt
        .filter(|p| !p.is_empty())
        .and_then(|p| text.find(p).map(|at| at + p.len()))
    {
        Some(end) => &text[end..],
        None => text,
    }
}

/// Takes what follows the first marker, or strips the echoed user message.
pub fn extract_answer(text: &str, marker: &str, user_message: &str) -> String {
    if !marker.is_empty() {
        if let Some((_, answer)) = text.split_once(marker) {
            return answer.trim().to_string();
        }
    }

    let user_message = user_message.trim();
    if user_message.is_empty() {
        return text.trim().to_string();
    }
    text.replace(user_message, "").trim().to_string()
}

pub fn unescape(text: &str) -> String {
    let mut out = html_escape::decode_html_entities(text).into_owned();
    for (entity, literal) in RESIDUAL_ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, literal);
        }
    }
    out
}
