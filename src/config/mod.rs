use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};

use crate::model::generation::{
    GenerationParameters, DEFAULT_MAX_NEW_TOKENS, DEFAULT_REPETITION_PENALTY, DEFAULT_TEMPERATURE,
};

pub const DEFAULT_URL_TEMPLATE: &str = "https://api-inference.huggingface.co/models/{model}";
pub const DEFAULT_ANSWER_MARKER: &str = "Odpowiedź:";
pub const DEFAULT_FALLBACK_ANSWER: &str = "Brak odpowiedzi";
pub const DEFAULT_SYSTEM_PROMPT: &str = "Jesteś ekspertem od roślin doniczkowych. \
Odpowiadaj na pytania użytkownika po polsku, w sposób rzetelny, dokładny i zgodny z nauką. \
Unikaj fałszywych informacji.";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 10_000;

/// How the remote model is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Plain text-generation route: `{"inputs": "..."}`.
    Completion,
    /// OpenAI-compatible chat route: `{"messages": [...]}`.
    Chat,
}

impl FromStr for PayloadFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completion" | "text" | "inputs" => Ok(PayloadFormat::Completion),
            "chat" | "messages" => Ok(PayloadFormat::Chat),
            other => Err(anyhow!("unknown payload format `{other}` (expected completion|chat)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceSection {
    pub endpoint: String,
    pub api_token: String,
    pub model_name: String,
    pub payload_format: PayloadFormat,
    pub timeout: Duration,
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub wait_for_model: bool,
}

#[derive(Debug, Clone)]
pub struct PromptSection {
    pub system_prompt: String,
    pub answer_marker: String,
    pub fallback_answer: String,
    pub generation: GenerationParameters,
}

#[derive(Debug, Clone)]
pub struct HttpSection {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub inference: InferenceSection,
    pub prompt: PromptSection,
    pub http: HttpSection,
}

impl AppConfig {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => tracing::debug!("no .env file found"),
            Err(err) => return Err(err).context("malformed .env file"),
        }
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = required(&var, "CHAT_DB_PATH")?;
        let api_token = required(&var, "API_TOKEN")?;
        let model_name = required(&var, "MODEL_NAME")?;

        let template =
            var("INFERENCE_URL_TEMPLATE").unwrap_or_else(|| DEFAULT_URL_TEMPLATE.to_string());
        let endpoint = template.replace("{model}", model_name.trim());

        let payload_format = match var("PAYLOAD_FORMAT") {
            Some(raw) => raw.parse::<PayloadFormat>().context("PAYLOAD_FORMAT")?,
            None => PayloadFormat::Completion,
        };

        let max_attempts = parsed(&var, "INFERENCE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            bail!("INFERENCE_MAX_ATTEMPTS must be at least 1");
        }

        let inference = InferenceSection {
            endpoint,
            api_token: api_token.trim().to_string(),
            model_name: model_name.trim().to_string(),
            payload_format,
            timeout: Duration::from_secs(parsed(
                &var,
                "INFERENCE_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            max_attempts,
            retry_delay: Duration::from_millis(parsed(
                &var,
                "INFERENCE_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
            )?),
            wait_for_model: parsed(&var, "WAIT_FOR_MODEL", true)?,
        };

        let generation = GenerationParameters {
            temperature: parsed(&var, "TEMPERATURE", DEFAULT_TEMPERATURE)?,
            max_new_tokens: parsed(&var, "MAX_NEW_TOKENS", DEFAULT_MAX_NEW_TOKENS)?,
            repetition_penalty: parsed(&var, "REPETITION_PENALTY", DEFAULT_REPETITION_PENALTY)?,
            stop_sequence: var("STOP_SEQUENCE"),
        };
        generation
            .validate()
            .context("invalid generation parameters")?;

        let prompt = PromptSection {
            system_prompt: var("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            answer_marker: var("ANSWER_MARKER")
                .map(|m| m.trim().to_string())
                .unwrap_or_else(|| DEFAULT_ANSWER_MARKER.into()),
            fallback_answer: var("FALLBACK_ANSWER")
                .unwrap_or_else(|| DEFAULT_FALLBACK_ANSWER.into()),
            generation,
        };

        let http = HttpSection {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            port: parsed(&var, "PORT", DEFAULT_PORT)?,
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            inference,
            prompt,
            http,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.http.bind_addr, self.http.port)
    }
}

fn required<F>(var: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    var(key).ok_or_else(|| anyhow!("missing required environment variable {key}"))
}

fn parsed<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid value for {key} (`{raw}`): {err}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("CHAT_DB_PATH", "chatdb"),
        ("API_TOKEN", "hf_secret"),
        ("MODEL_NAME", "meta-llama/Meta-Llama-3-8B-Instruct"),
    ];

    #[test]
    fn applies_defaults_and_templates_endpoint() {
        let cfg = AppConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(
            cfg.inference.endpoint,
            "https://api-inference.huggingface.co/models/meta-llama/Meta-Llama-3-8B-Instruct"
        );
        assert_eq!(cfg.inference.payload_format, PayloadFormat::Completion);
        assert_eq!(cfg.inference.max_attempts, 3);
        assert_eq!(cfg.inference.retry_delay, Duration::from_millis(2_000));
        assert_eq!(cfg.prompt.answer_marker, "Odpowiedź:");
        assert_eq!(cfg.prompt.generation, GenerationParameters::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:10000");
    }

    #[test]
    fn missing_required_variable_is_fatal() {
        for skip in ["CHAT_DB_PATH", "API_TOKEN", "MODEL_NAME"] {
            let pairs: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != skip).collect();
            let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.to_string().contains(skip), "{err}");
        }
    }

    #[test]
    fn blank_required_variable_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[1] = ("API_TOKEN", "   ");
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TEMPERATURE", "1.7"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn rejects_malformed_numbers_and_zero_attempts() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_NEW_TOKENS", "lots"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("MAX_NEW_TOKENS"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("INFERENCE_MAX_ATTEMPTS", "0"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn reads_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PAYLOAD_FORMAT", "chat"),
            (
                "INFERENCE_URL_TEMPLATE",
                "https://router.example/models/{model}/v1/chat/completions",
            ),
            ("INFERENCE_MAX_ATTEMPTS", "5"),
            ("INFERENCE_RETRY_DELAY_MS", "3000"),
            ("ANSWER_MARKER", " Answer: "),
            ("STOP_SEQUENCE", "</s>"),
            ("PORT", "3000"),
        ]);
        let cfg = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.inference.payload_format, PayloadFormat::Chat);
        assert!(cfg.inference.endpoint.ends_with("Instruct/v1/chat/completions"));
        assert_eq!(cfg.inference.max_attempts, 5);
        assert_eq!(cfg.inference.retry_delay, Duration::from_secs(3));
        assert_eq!(cfg.prompt.answer_marker, "Answer:");
        assert_eq!(cfg.prompt.generation.stop_sequence.as_deref(), Some("</s>"));
        assert_eq!(cfg.http.port, 3000);
    }
}
