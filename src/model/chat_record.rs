use serde::{Deserialize, Serialize};

/// One persisted question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub user_input: String,
    pub bot_response: String,
    #[serde(default)]
    pub created_ts: i64,
}

impl ChatRecord {
    pub fn new(user_input: impl Into<String>, bot_response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            bot_response: bot_response.into(),
            created_ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}
