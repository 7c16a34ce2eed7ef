use std::time::Duration;

use crate::errors::PipelineError;

const DEFAULT_RATE_LIMIT: u32 = 5;

/// Per-event-kind display switches.
///
/// Tokens and errors are never gated. Everything else can be hidden
/// independently; unknown kinds share the `other_events` switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibilityConfig {
    pub start_event: bool,
    pub update_event: bool,
    pub agent_reasoning: bool,
    pub metadata: bool,
    pub end_event: bool,
    pub agent_flow_event: bool,
    pub next_agent_flow: bool,
    pub agent_flow_executed_data: bool,
    pub usage_metadata: bool,
    /// Show the tool name block for `usedTools`/`calledTools` invocations.
    pub tool_names: bool,
    /// Show the tool input block.
    pub tool_inputs: bool,
    /// Show the (unwrapped) tool output block.
    pub tool_outputs: bool,
    /// Catch-all for kinds without a dedicated switch.
    pub other_events: bool,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            start_event: true,
            update_event: true,
            agent_reasoning: true,
            metadata: true,
            end_event: true,
            agent_flow_event: true,
            next_agent_flow: true,
            agent_flow_executed_data: true,
            usage_metadata: true,
            tool_names: true,
            tool_inputs: true,
            tool_outputs: true,
            other_events: true,
        }
    }
}

impl VisibilityConfig {
    /// Everything hidden. Handy for tests and for token-only chat surfaces.
    pub fn hidden() -> Self {
        Self {
            start_event: false,
            update_event: false,
            agent_reasoning: false,
            metadata: false,
            end_event: false,
            agent_flow_event: false,
            next_agent_flow: false,
            agent_flow_executed_data: false,
            usage_metadata: false,
            tool_names: false,
            tool_inputs: false,
            tool_outputs: false,
            other_events: false,
        }
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| read_bool(lookup, key).unwrap_or(true);
        Self {
            start_event: flag("DISPLAY_START_EVENT"),
            update_event: flag("DISPLAY_UPDATE_EVENT"),
            agent_reasoning: flag("DISPLAY_AGENT_REASONING"),
            metadata: flag("DISPLAY_METADATA"),
            end_event: flag("DISPLAY_END_EVENT"),
            agent_flow_event: flag("DISPLAY_AGENT_FLOW_EVENT"),
            next_agent_flow: flag("DISPLAY_NEXT_AGENT_FLOW"),
            agent_flow_executed_data: flag("DISPLAY_AGENT_FLOW_EXECUTED_DATA"),
            usage_metadata: flag("DISPLAY_USAGE_METADATA"),
            tool_names: flag("DISPLAY_TOOL_NAMES"),
            tool_inputs: flag("DISPLAY_TOOL_INPUTS"),
            tool_outputs: flag("DISPLAY_TOOL_OUTPUTS"),
            other_events: flag("DISPLAY_OTHER_EVENTS"),
        }
    }
}

/// Settings for one pipeline instance.
///
/// Mirrors the environment-backed settings object of the hosting chat
/// framework. Values are read once and swapped wholesale on refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bearer token for the Flowise API.
    pub api_key: String,
    /// Flowise base URL, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Requests per minute. `0` disables throttling.
    pub rate_limit: u32,
    pub flow_enabled: bool,
    pub flow_id: Option<String>,
    pub flow_name: Option<String>,
    /// Append the local date and time to every query.
    pub append_datetime: bool,
    /// Serve non-stream requests by collecting the streaming endpoint
    /// instead of calling the single-shot prediction endpoint.
    pub collect_stream: bool,
    /// Optional HTTP timeout. Unset means wait indefinitely.
    pub timeout: Option<Duration>,
    pub visibility: VisibilityConfig,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let api_key = if self.api_key.is_empty() {
            "<empty>"
        } else {
            "[REDACTED]"
        };
        f.debug_struct("PipelineConfig")
            .field("api_key", &api_key)
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .field("flow_enabled", &self.flow_enabled)
            .field("flow_id", &self.flow_id)
            .field("flow_name", &self.flow_name)
            .field("append_datetime", &self.append_datetime)
            .field("collect_stream", &self.collect_stream)
            .field("timeout", &self.timeout)
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            rate_limit: DEFAULT_RATE_LIMIT,
            flow_enabled: false,
            flow_id: None,
            flow_name: None,
            append_datetime: false,
            collect_stream: false,
            timeout: None,
            visibility: VisibilityConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a config pointing at `base_url` with the given key and
    /// everything else defaulted.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults and are logged.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let rate_limit = match text("RATE_LIMIT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::error!(value = %raw, "invalid RATE_LIMIT, using default");
                DEFAULT_RATE_LIMIT
            }),
            None => DEFAULT_RATE_LIMIT,
        };
        let timeout = text("FLOWISE_TIMEOUT_SECS").and_then(|raw| match raw.parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                tracing::error!(value = %raw, "invalid FLOWISE_TIMEOUT_SECS, ignoring");
                None
            }
        });

        Self {
            api_key: text("FLOWISE_API_KEY").unwrap_or_default(),
            base_url: text("FLOWISE_BASE_URL").unwrap_or_default(),
            rate_limit,
            flow_enabled: read_bool(&lookup, "FLOW_ENABLED").unwrap_or(false),
            flow_id: text("FLOW_ID"),
            flow_name: text("FLOW_NAME"),
            append_datetime: read_bool(&lookup, "QUERY_APPEND_DATETIME").unwrap_or(false),
            collect_stream: read_bool(&lookup, "FLOWISE_COLLECT_STREAM").unwrap_or(false),
            timeout,
            visibility: VisibilityConfig::from_lookup(&lookup),
        }
    }

    /// Enables the flow with the given id and name.
    pub fn flow(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.flow_enabled = true;
        self.flow_id = Some(id.into());
        self.flow_name = Some(name.into());
        self
    }

    /// Overrides the requests-per-minute limit.
    pub fn rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = per_minute;
        self
    }

    /// Overrides the display switches.
    pub fn visibility(mut self, visibility: VisibilityConfig) -> Self {
        self.visibility = visibility;
        self
    }

    /// Checks that the Flowise credentials are present.
    pub fn validate_credentials(&self) -> Result<(), PipelineError> {
        if self.api_key.trim().is_empty() || self.base_url.trim().is_empty() {
            return Err(PipelineError::Config(
                "Missing FlowiseAI configuration.".into(),
            ));
        }
        Ok(())
    }
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    let parsed = parse_bool(&raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        tracing::warn!(key, value = %raw, "ignoring unrecognised boolean");
    }
    parsed
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}
