use anyhow::{bail, Result};

pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 200;
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.1;

/// Sampling options sent with every request. Fixed per deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub repetition_penalty: f32,
    pub stop_sequence: Option<String>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            stop_sequence: None,
        }
    }
}

impl GenerationParameters {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            bail!("temperature must be within [0, 1], got {}", self.temperature);
        }
        if self.max_new_tokens == 0 {
            bail!("max_new_tokens must be greater than 0");
        }
        if !(self.repetition_penalty >= 1.0) {
            bail!(
                "repetition_penalty must be at least 1.0, got {}",
                self.repetition_penalty
            );
        }
        if matches!(self.stop_sequence.as_deref(), Some(s) if s.is_empty()) {
            bail!("stop_sequence must not be empty when set");
        }
        Ok(())
    }

    /// Stop sequences in the list form both upstream routes accept.
    pub fn stop_sequences(&self) -> Vec<String> {
        self.stop_sequence.iter().cloned().collect()
    }
}
