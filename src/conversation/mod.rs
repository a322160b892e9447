use minijinja::Environment;
use serde::{Deserialize, Serialize};

use crate::{
    config::{PayloadFormat, PromptSection},
    inference::NormalizeContext,
    model::generation::GenerationParameters,
};

const COMPLETION_TEMPLATE_NAME: &str = "completion_prompt";
const COMPLETION_TEMPLATE: &str = "{{ system_prompt }}
Rozpocznij odpowiedź od \"{{ marker }}\".

Użytkownik: {{ message }}
{{ marker }}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletionParameters {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub repetition_penalty: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    pub return_full_text: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletionOptions {
    pub wait_for_model: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletionPayload {
    pub inputs: String,
    pub parameters: CompletionParameters,
    pub options: CompletionOptions,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Request body for the inference endpoint. Exactly one shape per deployment.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum InferencePayload {
    Completion(CompletionPayload),
    Chat(ChatPayload),
}

/// A payload together with the prompt text the model may echo back.
#[derive(Clone, Debug)]
pub struct BuiltPrompt {
    pub payload: InferencePayload,
    pub prompt_text: Option<String>,
}

/// Turns a validated user message into an [`InferencePayload`].
pub struct PromptBuilder {
    env: Environment<'static>,
    format: PayloadFormat,
    model_name: String,
    system_prompt: String,
    marker: String,
    fallback: String,
    params: GenerationParameters,
    wait_for_model: bool,
}

impl PromptBuilder {
    pub fn new(
        prompt: &PromptSection,
        format: PayloadFormat,
        model_name: impl Into<String>,
        wait_for_model: bool,
    ) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(COMPLETION_TEMPLATE_NAME, COMPLETION_TEMPLATE)?;
        Ok(Self {
            env,
            format,
            model_name: model_name.into(),
            system_prompt: prompt.system_prompt.trim().to_string(),
            marker: prompt.answer_marker.clone(),
            fallback: prompt.fallback_answer.clone(),
            params: prompt.generation.clone(),
            wait_for_model,
        })
    }

    /// Settings the normalizer needs to clean up the answer to `message`.
    pub fn normalize_context<'a>(
        &'a self,
        message: &'a str,
        built: &'a BuiltPrompt,
    ) -> NormalizeContext<'a> {
        NormalizeContext {
            marker: &self.marker,
            user_message: message,
            prompt_text: built.prompt_text.as_deref(),
            stop_sequence: self.params.stop_sequence.as_deref(),
            fallback: &self.fallback,
        }
    }

    pub fn build(&self, message: &str) -> Result<BuiltPrompt, minijinja::Error> {
        let message = sanitize_message(message);
        match self.format {
            PayloadFormat::Completion => {
                let inputs = self.render_completion(&message)?;
                Ok(BuiltPrompt {
                    payload: InferencePayload::Completion(CompletionPayload {
                        inputs: inputs.clone(),
                        parameters: CompletionParameters {
                            temperature: self.params.temperature,
                            max_new_tokens: self.params.max_new_tokens,
                            repetition_penalty: self.params.repetition_penalty,
                            stop: self.params.stop_sequences(),
                            return_full_text: false,
                        },
                        options: CompletionOptions {
                            wait_for_model: self.wait_for_model,
                        },
                    }),
                    prompt_text: Some(inputs),
                })
            }
            PayloadFormat::Chat => Ok(BuiltPrompt {
                payload: InferencePayload::Chat(ChatPayload {
                    model: self.model_name.clone(),
                    messages: self.chat_turns(message),
                    temperature: self.params.temperature,
                    max_tokens: self.params.max_new_tokens,
                    stop: self.params.stop_sequences(),
                }),
                prompt_text: None,
            }),
        }
    }

    fn render_completion(&self, message: &str) -> Result<String, minijinja::Error> {
        self.env
            .get_template(COMPLETION_TEMPLATE_NAME)?
            .render(minijinja::context! {
                system_prompt => self.system_prompt.as_str(),
                marker => self.marker.as_str(),
                message => message,
            })
    }

    fn chat_turns(&self, message: String) -> Vec<ChatTurn> {
        let system = format!(
            "{}\nRozpocznij odpowiedź od \"{}\".",
            self.system_prompt, self.marker
        );
        vec![
            ChatTurn {
                role: Role::System,
                content: system,
            },
            ChatTurn {
                role: Role::User,
                content: message,
            },
        ]
    }
}

/// Trims the message and normalizes CRLF line endings.
pub fn sanitize_message(text: &str) -> String {
    text.trim().replace("\r\n", "\n")
}

/// Cuts `text` at the first occurrence of `stop`.
pub fn truncate_at_stop<'a>(text: &'a str, stop: Option<&str>) -> &'a str {
    match stop.filter(|s| !s.is_empty()).and_then(|s| text.find(s)) {
        Some(end) => &text[..end],
        None => text,
    }
}
