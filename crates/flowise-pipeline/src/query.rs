//! Outbound query composition.

use chrono::{DateTime, Local};
use serde_json::Value;
use tracing::debug;

/// One entry of the conversation history passed by the chat host.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// Either a plain string or a list of content parts.
    #[serde(default)]
    pub content: Value,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
        }
    }

    /// Text content, joining `text` parts when the content is a part list.
    pub fn text(&self) -> Option<String> {
        match &self.content {
            Value::String(text) => Some(text.clone()),
            Value::Array(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                (!texts.is_empty()).then(|| texts.join("\n"))
            }
            _ => None,
        }
    }
}

/// Builds the question text sent to the flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryComposer {
    append_datetime: bool,
}

impl QueryComposer {
    pub fn new(append_datetime: bool) -> Self {
        Self { append_datetime }
    }

    /// Trims the raw message and optionally appends the current local time.
    pub fn compose(&self, raw: &str) -> String {
        self.compose_at(raw, Local::now())
    }

    /// Same as [`QueryComposer::compose`] with an explicit clock.
    pub fn compose_at(&self, raw: &str, now: DateTime<Local>) -> String {
        let trimmed = raw.trim();
        let query = if self.append_datetime && !trimmed.is_empty() {
            format!(
                "{trimmed}; today's date is {} and the current time is {}",
                now.format("%Y-%m-%d"),
                now.format("%H:%M:%S")
            )
        } else {
            trimmed.to_string()
        };
        debug!(%query, "composed query");
        query
    }
}

const SYSTEM_MESSAGE_PATHS: &[&[&str]] = &[
    &["metadata", "model_params", "system"],
    &["model_params", "system"],
];

const SESSION_ID_PATHS: &[&[&str]] = &[
    &["metadata", "chat_id"],
    &["chat_id"],
    &["session_id"],
];

/// Finds the system message for the flow.
///
/// The model parameters in the request body win over the first
/// `system`-role history entry. `None` is a normal outcome.
pub fn system_message(body: &Value, history: &[ChatMessage]) -> Option<String> {
    SYSTEM_MESSAGE_PATHS
        .iter()
        .find_map(|path| string_at(body, path))
        .or_else(|| {
            history
                .iter()
                .find(|message| message.role == "system")
                .and_then(ChatMessage::text)
                .filter(|text| !text.trim().is_empty())
        })
}

/// Finds the chat session id the host attached to the request.
pub fn session_id(body: &Value) -> Option<String> {
    SESSION_ID_PATHS.iter().find_map(|path| string_at(body, path))
}

fn string_at(body: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(body, |value, key| value.get(*key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

/// Side-channel parameters passed to the flow with the question.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

impl OverrideConfig {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.system_message.is_none()
    }
}

/// Body of `POST /api/v1/prediction/{flow_id}`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub question: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "OverrideConfig::is_empty")]
    pub override_config: OverrideConfig,
}

impl PredictionRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            streaming: false,
            override_config: OverrideConfig::default(),
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn override_config(mut self, override_config: OverrideConfig) -> Self {
        self.override_config = override_config;
        self
    }
}
