use serde_json::{Map, Value};

use crate::errors::PipelineError;

/// Kind of a Flowise stream event.
///
/// Kinds Flowise is known to send get their own variant. Anything else is
/// kept verbatim in `Unknown` so it can still be shown through the
/// catch-all switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Token,
    Start,
    Update,
    AgentReasoning,
    Metadata,
    End,
    Error,
    AgentFlowEvent,
    NextAgentFlow,
    AgentFlowExecutedData,
    /// Tool invocations in the streaming dialect.
    UsedTools,
    /// Tool invocations in the single-shot/older dialect.
    CalledTools,
    UsageMetadata,
    AgentTrace,
    Unknown(String),
    /// The record had no `event` field.
    Missing,
}

impl EventKind {
    /// Maps a wire name to a kind.
    pub fn parse(name: &str) -> Self {
        match name {
            "token" => Self::Token,
            "start" => Self::Start,
            "update" => Self::Update,
            "agentReasoning" => Self::AgentReasoning,
            "metadata" => Self::Metadata,
            "end" => Self::End,
            "error" => Self::Error,
            "agentFlowEvent" => Self::AgentFlowEvent,
            "nextAgentFlow" => Self::NextAgentFlow,
            "agentFlowExecutedData" => Self::AgentFlowExecutedData,
            "usedTools" => Self::UsedTools,
            "calledTools" => Self::CalledTools,
            "usageMetadata" => Self::UsageMetadata,
            "agent_trace" => Self::AgentTrace,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the wire name (or `"none"` for a missing kind).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Token => "token",
            Self::Start => "start",
            Self::Update => "update",
            Self::AgentReasoning => "agentReasoning",
            Self::Metadata => "metadata",
            Self::End => "end",
            Self::Error => "error",
            Self::AgentFlowEvent => "agentFlowEvent",
            Self::NextAgentFlow => "nextAgentFlow",
            Self::AgentFlowExecutedData => "agentFlowExecutedData",
            Self::UsedTools => "usedTools",
            Self::CalledTools => "calledTools",
            Self::UsageMetadata => "usageMetadata",
            Self::AgentTrace => "agent_trace",
            Self::Unknown(name) => name,
            Self::Missing => "none",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level shape of an event's `data` field.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Absent,
    Text(String),
    Object(Map<String, Value>),
    List(Vec<Value>),
    /// Number, bool or explicit `null`.
    Scalar(Value),
}

impl Payload {
    /// Converts back into a plain JSON value (`Absent` becomes `null`).
    pub fn into_value(self) -> Value {
        match self {
            Self::Absent => Value::Null,
            Self::Text(text) => Value::String(text),
            Self::Object(map) => Value::Object(map),
            Self::List(items) => Value::Array(items),
            Self::Scalar(value) => value,
        }
    }

    /// Borrowing variant of [`Payload::into_value`].
    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Object(map) => Self::Object(map),
            Value::Array(items) => Self::List(items),
            other => Self::Scalar(other),
        }
    }
}

impl From<Option<Value>> for Payload {
    fn from(value: Option<Value>) -> Self {
        value.map(Self::from).unwrap_or(Self::Absent)
    }
}

/// One classified record from the Flowise stream.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowEvent {
    pub kind: EventKind,
    pub payload: Payload,
    /// Value of a top-level `error` key, when the record carried one.
    pub error: Option<Value>,
}

impl FlowEvent {
    /// Creates an event with no error attached.
    pub fn new(kind: EventKind, payload: impl Into<Payload>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            error: None,
        }
    }

    /// Classifies a JSON record shaped `{event, data}` or `{error}`.
    pub fn from_record(mut record: Map<String, Value>) -> Self {
        let kind = match record.get("event") {
            Some(Value::String(name)) => EventKind::parse(name),
            Some(Value::Null) | None => EventKind::Missing,
            Some(other) => EventKind::Unknown(other.to_string()),
        };
        Self {
            kind,
            payload: Payload::from(record.remove("data")),
            error: record.remove("error"),
        }
    }
}

/// One item delivered by a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Already-parsed JSON.
    Record(Value),
    /// Raw text that still needs a JSON parse.
    Raw(String),
}

impl Chunk {
    /// Admits a chunk into the classifier.
    ///
    /// Raw text is parsed first. Text that is not JSON, and JSON that is not
    /// an object, are reported as `ChunkParse` errors for the caller to
    /// contain.
    pub fn into_event(self) -> Result<FlowEvent, PipelineError> {
        let value = match self {
            Self::Record(value) => value,
            Self::Raw(text) => serde_json::from_str::<Value>(text.trim()).map_err(|_| {
                PipelineError::chunk_parse(format!("Skipped unparseable chunk: {text}"))
            })?,
        };
        match value {
            Value::Object(record) => Ok(FlowEvent::from_record(record)),
            other => Err(PipelineError::chunk_parse(format!(
                "Skipped chunk with unexpected shape: {other}"
            ))),
        }
    }
}
