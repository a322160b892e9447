pub mod response;

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{config::InferenceSection, conversation::InferencePayload};

pub use response::{normalize, InferenceResponse, NormalizeContext};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference service unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: usize, last_error: String },

    #[error("inference request failed with status {status}")]
    RequestFailed { status: u16, body: String },

    #[error("inference request could not be built: {0}")]
    InvalidRequest(String),
}

/// Fixed-delay retry settings. `max_attempts` counts the first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

enum Attempt {
    Done(InferenceResponse),
    Transient(String),
    Fatal(InferenceError),
}

/// HTTP client for the remote text-generation endpoint.
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    retry: RetryPolicy,
}

impl InferenceClient {
    pub fn new(section: &InferenceSection) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(section.timeout).build()?;
        let headers = auth_headers(&section.api_token)?;
        Ok(Self::with_client(
            http,
            section.endpoint.clone(),
            headers,
            RetryPolicy {
                max_attempts: section.max_attempts,
                delay: section.retry_delay,
            },
        ))
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        headers: HeaderMap,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            headers,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                delay: retry.delay,
            },
        }
    }

    /// Sends `payload`, retrying transport failures and 503s with a fixed delay.
    pub async fn infer(
        &self,
        payload: &InferencePayload,
    ) -> Result<InferenceResponse, InferenceError> {
        let max = self.retry.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            match self.attempt(payload).await {
                Attempt::Done(response) => {
                    debug!(attempt, "inference call succeeded");
                    return Ok(response);
                }
                Attempt::Fatal(err) => return Err(err),
                Attempt::Transient(reason) => {
                    warn!(attempt, max_attempts = max, reason = %reason, "transient inference failure");
                    last_error = reason;
                    if attempt < max {
                        sleep(self.retry.delay).await;
                    }
                }
            }
        }

        Err(InferenceError::Unavailable {
            attempts: max,
            last_error,
        })
    }

    async fn attempt(&self, payload: &InferencePayload) -> Attempt {
        let sent = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) if err.is_builder() => {
                return Attempt::Fatal(InferenceError::InvalidRequest(err.to_string()))
            }
            Err(err) => return Attempt::Transient(describe_transport_error(&err)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Attempt::Transient(describe_transport_error(&err)),
        };

        if status == StatusCode::SERVICE_UNAVAILABLE {
            log_loading_hint(&body);
            return Attempt::Transient(format!("upstream returned {status}"));
        }

        if !status.is_success() {
            return Attempt::Fatal(InferenceError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        Attempt::Done(InferenceResponse::from_body(&body))
    }
}

pub fn auth_headers(token: &str) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("connection error: {err}")
    } else {
        err.to_string()
    }
}

// The hosted API answers 503 with `estimated_time` while a cold model loads.
fn log_loading_hint(body: &str) {
    let estimate = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("estimated_time").and_then(|t| t.as_f64()));
    if let Some(secs) = estimate {
        info!(estimated_secs = secs, "model is loading upstream");
    }
}
