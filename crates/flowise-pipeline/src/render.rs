//! Event classification and rendering.
//!
//! Every event is mapped to zero or more [`OutputFragment`]s in arrival
//! order. Rendering one event never fails the stream: errors are turned into
//! an explanatory fragment at the smallest possible granularity (one chunk,
//! one event).

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::VisibilityConfig;
use crate::errors::PipelineError;
use crate::event::{Chunk, EventKind, FlowEvent, Payload};
use crate::fragment::OutputFragment;
use crate::unwrap::{unwrap_payload, unwrap_value};

/// Per-connection rendering state.
///
/// Some Flowise dialects resend the full list of reasoning steps (or
/// executed agent-flow nodes) on every update. The state remembers how many
/// entries of each list were already rendered so only the new suffix is
/// emitted. Create a fresh state for each request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderState {
    agent_reasoning: usize,
    agent_flow_executed_data: usize,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries already rendered for a cumulative kind.
    pub fn seen(&self, kind: &EventKind) -> usize {
        match kind {
            EventKind::AgentReasoning => self.agent_reasoning,
            EventKind::AgentFlowExecutedData => self.agent_flow_executed_data,
            _ => 0,
        }
    }

    fn seen_mut(&mut self, kind: &EventKind) -> Option<&mut usize> {
        match kind {
            EventKind::AgentReasoning => Some(&mut self.agent_reasoning),
            EventKind::AgentFlowExecutedData => Some(&mut self.agent_flow_executed_data),
            _ => None,
        }
    }
}

/// Admits one transport chunk and renders it.
///
/// Chunks that cannot be parsed into an event yield a single warning
/// fragment.
pub fn render_chunk(
    chunk: Chunk,
    visibility: &VisibilityConfig,
    state: &mut RenderState,
) -> Vec<OutputFragment> {
    match chunk.into_event() {
        Ok(event) => render_event(&event, visibility, state),
        Err(err) => vec![contain(err)],
    }
}

/// Renders one classified event.
pub fn render_event(
    event: &FlowEvent,
    visibility: &VisibilityConfig,
    state: &mut RenderState,
) -> Vec<OutputFragment> {
    try_render(event, visibility, state).unwrap_or_else(|err| {
        warn!(kind = %event.kind, error = %err, "failed to render event");
        vec![contain(err)]
    })
}

fn contain(err: PipelineError) -> OutputFragment {
    match err {
        PipelineError::ChunkParse(message) => {
            warn!(%message, "skipping chunk");
            OutputFragment::text(format!("\n[Warning] {message}\n"))
        }
        other => OutputFragment::text(format!("\nError handling chunk: {other}\n")),
    }
}

fn try_render(
    event: &FlowEvent,
    visibility: &VisibilityConfig,
    state: &mut RenderState,
) -> Result<Vec<OutputFragment>, PipelineError> {
    if let Some(error) = &event.error {
        return Ok(vec![flowise_error(error)]);
    }

    let kind = &event.kind;
    match kind {
        EventKind::Error => Ok(vec![flowise_error(&event.payload.to_value())]),
        EventKind::Token => Ok(render_token(&event.payload).into_iter().collect()),
        EventKind::Start
        | EventKind::Update
        | EventKind::Metadata
        | EventKind::End
        | EventKind::AgentFlowEvent
        | EventKind::NextAgentFlow
        | EventKind::UsageMetadata => {
            if !labeled_visible(kind, visibility) {
                return Ok(Vec::new());
            }
            Ok(vec![labeled_block(label(kind), &event.payload)?])
        }
        EventKind::AgentReasoning | EventKind::AgentFlowExecutedData => {
            if !labeled_visible(kind, visibility) {
                return Ok(Vec::new());
            }
            render_cumulative(kind, &event.payload, state)
        }
        EventKind::UsedTools | EventKind::CalledTools => {
            render_tools(&event.payload, visibility)
        }
        EventKind::AgentTrace => match agent_action(&event.payload) {
            Some(action) => Ok(vec![render_agent_action(action)?]),
            None => Ok(render_other(kind, &event.payload, visibility)),
        },
        EventKind::Unknown(_) | EventKind::Missing => {
            Ok(render_other(kind, &event.payload, visibility))
        }
    }
}

fn labeled_visible(kind: &EventKind, visibility: &VisibilityConfig) -> bool {
    match kind {
        EventKind::Start => visibility.start_event,
        EventKind::Update => visibility.update_event,
        EventKind::Metadata => visibility.metadata,
        EventKind::AgentReasoning => visibility.agent_reasoning,
        EventKind::End => visibility.end_event,
        EventKind::AgentFlowEvent => visibility.agent_flow_event,
        EventKind::NextAgentFlow => visibility.next_agent_flow,
        EventKind::AgentFlowExecutedData => visibility.agent_flow_executed_data,
        EventKind::UsageMetadata => visibility.usage_metadata,
        _ => visibility.other_events,
    }
}

fn label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Start => "Start",
        EventKind::Update => "Update",
        EventKind::Metadata => "Metadata",
        EventKind::AgentReasoning => "Agent Reasoning",
        EventKind::End => "End",
        EventKind::AgentFlowEvent => "Agent Flow Event",
        EventKind::NextAgentFlow => "Next Agent Flow",
        EventKind::AgentFlowExecutedData => "Agent Flow Executed Data",
        EventKind::UsageMetadata => "Usage Metadata",
        _ => "Event",
    }
}

fn flowise_error(error: &Value) -> OutputFragment {
    OutputFragment::text(format!("Error from FlowiseAI: {}", display_value(error)))
}

fn render_token(payload: &Payload) -> Option<OutputFragment> {
    match payload {
        Payload::Absent => None,
        Payload::Text(text) if text.is_empty() => None,
        Payload::Text(text) => Some(OutputFragment::text(text.clone())),
        other => Some(OutputFragment::text(other.to_value().to_string())),
    }
}

fn labeled_block(label: &str, payload: &Payload) -> Result<OutputFragment, PipelineError> {
    let text = match payload {
        Payload::Text(text) => format!("\n__{label}__:\n{text}\n"),
        Payload::Object(_) | Payload::List(_) => {
            format!("\n__{label}__:\n{}\n", json_block(&payload.to_value())?)
        }
        Payload::Absent | Payload::Scalar(_) => format!(
            "\n[{label}] Unexpected data format: {}\n",
            payload.to_value()
        ),
    };
    Ok(OutputFragment::text(text))
}

fn render_cumulative(
    kind: &EventKind,
    payload: &Payload,
    state: &mut RenderState,
) -> Result<Vec<OutputFragment>, PipelineError> {
    let (Payload::List(entries), Some(seen)) = (payload, state.seen_mut(kind)) else {
        return Ok(vec![labeled_block(label(kind), payload)?]);
    };

    // A shorter snapshot means the flow started a new list.
    let start = if entries.len() < *seen { 0 } else { *seen };
    *seen = entries.len();

    entries[start..]
        .iter()
        .map(|entry| labeled_block(label(kind), &Payload::from(entry.clone())))
        .collect()
}

struct ToolInvocation {
    tool: String,
    input: Option<Value>,
    output: Option<Value>,
}

impl ToolInvocation {
    fn from_map(map: &Map<String, Value>) -> Self {
        let field = |names: &[&str]| names.iter().find_map(|name| map.get(*name)).cloned();
        let tool = match map.get("tool") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        };
        Self {
            tool,
            input: field(&["input", "toolInput"]),
            output: field(&["output", "toolOutput"]),
        }
    }
}

fn render_tools(
    payload: &Payload,
    visibility: &VisibilityConfig,
) -> Result<Vec<OutputFragment>, PipelineError> {
    // Only outputs are unwrapped in depth; inputs are shown as sent.
    let entries = match unwrap_payload(payload) {
        Payload::List(items) => items,
        Payload::Object(map) => vec![Value::Object(map)],
        Payload::Absent => Vec::new(),
        other => vec![other.into_value()],
    };

    let invocations: Vec<Result<ToolInvocation, Value>> = entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(map) => Ok(ToolInvocation::from_map(&map)),
            other => Err(other),
        })
        .collect();

    let names: Vec<&str> = invocations
        .iter()
        .filter_map(|inv| inv.as_ref().ok().map(|inv| inv.tool.as_str()))
        .collect();
    let description = if names.is_empty() {
        "Tool calling".to_string()
    } else {
        format!("Tool calling {}", names.join(", "))
    };

    let mut fragments = vec![OutputFragment::status(description, false)];
    for invocation in &invocations {
        match invocation {
            Ok(invocation) => {
                if let Some(block) = tool_block(invocation, visibility)? {
                    fragments.push(block);
                }
            }
            Err(entry) => fragments.push(OutputFragment::text(format!(
                "\n[Tool] Unexpected data format: {entry}\n"
            ))),
        }
    }
    Ok(fragments)
}

fn tool_block(
    invocation: &ToolInvocation,
    visibility: &VisibilityConfig,
) -> Result<Option<OutputFragment>, PipelineError> {
    let mut text = String::new();
    if visibility.tool_names {
        text.push_str(&format!("\n**Tool:** `{}`\n", invocation.tool));
    }
    if visibility.tool_inputs
        && let Some(input) = &invocation.input
    {
        text.push_str(&format!("\n**Input:**\n{}\n", value_block(input)?));
    }
    if visibility.tool_outputs
        && let Some(output) = &invocation.output
    {
        let output = unwrap_value(output.clone());
        text.push_str(&format!("\n**Output:**\n{}\n", value_block(&output)?));
    }
    Ok((!text.is_empty()).then(|| OutputFragment::text(text)))
}

fn agent_action(payload: &Payload) -> Option<Value> {
    let Payload::Object(map) = unwrap_payload(payload) else {
        return None;
    };
    if map.get("step").and_then(Value::as_str) != Some("agent_action") {
        return None;
    }
    Some(map.get("action").cloned().unwrap_or(Value::Null))
}

fn render_agent_action(action: Value) -> Result<OutputFragment, PipelineError> {
    let action = match action {
        Value::String(raw) => serde_json::from_str::<Value>(&raw)
            .map_err(|e| PipelineError::render(format!("invalid agent action JSON: {e}")))?,
        other => other,
    };
    let tool = action
        .get("tool")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::render("agent action has no tool name"))?;
    Ok(OutputFragment::status(format!("Tool calling {tool}"), false))
}

fn render_other(
    kind: &EventKind,
    payload: &Payload,
    visibility: &VisibilityConfig,
) -> Vec<OutputFragment> {
    if !visibility.other_events {
        return Vec::new();
    }
    vec![OutputFragment::text(format!(
        "\n[Other Event: {kind}] {}\n",
        payload.to_value()
    ))]
}

fn json_block(value: &Value) -> Result<String, PipelineError> {
    let pretty = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::render(format!("failed to format payload: {e}")))?;
    Ok(format!("```json\n{pretty}\n```"))
}

fn value_block(value: &Value) -> Result<String, PipelineError> {
    match value {
        Value::String(text) => Ok(format!("```\n{text}\n```")),
        other => json_block(other),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render_all(chunks: Vec<Value>, visibility: &VisibilityConfig) -> Vec<OutputFragment> {
        let mut state = RenderState::new();
        chunks
            .into_iter()
            .flat_map(|chunk| render_chunk(Chunk::Record(chunk), visibility, &mut state))
            .collect()
    }

    fn texts(fragments: &[OutputFragment]) -> Vec<&str> {
        fragments.iter().filter_map(OutputFragment::as_text).collect()
    }

    #[test]
    fn token_is_verbatim_regardless_of_visibility() {
        for visibility in [VisibilityConfig::default(), VisibilityConfig::hidden()] {
            let fragments = render_all(vec![json!({"event": "token", "data": "hello"})], &visibility);
            assert_eq!(fragments, vec![OutputFragment::text("hello")]);
        }
    }

    #[test]
    fn empty_tokens_produce_nothing() {
        let fragments = render_all(
            vec![json!({"event": "token", "data": ""}), json!({"event": "token"})],
            &VisibilityConfig::default(),
        );
        assert!(fragments.is_empty());
    }

    #[test]
    fn error_key_wins_over_kind() {
        let fragments = render_all(
            vec![json!({"event": "token", "data": "x", "error": "quota exceeded"})],
            &VisibilityConfig::hidden(),
        );
        assert_eq!(
            fragments,
            vec![OutputFragment::text("Error from FlowiseAI: quota exceeded")]
        );
    }

    #[test]
    fn error_event_is_never_gated() {
        let fragments = render_all(
            vec![json!({"event": "error", "data": {"code": 500}})],
            &VisibilityConfig::hidden(),
        );
        assert_eq!(
            fragments,
            vec![OutputFragment::text("Error from FlowiseAI: {\"code\":500}")]
        );
    }

    #[test]
    fn labeled_kinds_render_by_payload_shape() {
        let fragments = render_all(
            vec![
                json!({"event": "start", "data": "go"}),
                json!({"event": "metadata", "data": {"chatId": "c1"}}),
                json!({"event": "usageMetadata", "data": 42}),
            ],
            &VisibilityConfig::default(),
        );
        let texts = texts(&fragments);
        assert_eq!(texts[0], "\n__Start__:\ngo\n");
        assert_eq!(
            texts[1],
            "\n__Metadata__:\n```json\n{\n  \"chatId\": \"c1\"\n}\n```\n"
        );
        assert_eq!(texts[2], "\n[Usage Metadata] Unexpected data format: 42\n");
    }

    #[test]
    fn each_labeled_kind_honours_its_own_switch() {
        let visibility = VisibilityConfig {
            update_event: false,
            ..VisibilityConfig::default()
        };
        let fragments = render_all(
            vec![
                json!({"event": "update", "data": "hidden"}),
                json!({"event": "end", "data": "[DONE]"}),
            ],
            &visibility,
        );
        assert_eq!(texts(&fragments), vec!["\n__End__:\n[DONE]\n"]);
    }

    #[test]
    fn cumulative_reasoning_only_emits_new_entries() {
        let fragments = render_all(
            vec![
                json!({"event": "agentReasoning", "data": ["a"]}),
                json!({"event": "agentReasoning", "data": ["a", "b"]}),
                json!({"event": "agentReasoning", "data": ["a", "b", "c"]}),
            ],
            &VisibilityConfig::default(),
        );
        assert_eq!(
            texts(&fragments),
            vec![
                "\n__Agent Reasoning__:\na\n",
                "\n__Agent Reasoning__:\nb\n",
                "\n__Agent Reasoning__:\nc\n",
            ]
        );
    }

    #[test]
    fn cumulative_lists_are_tracked_per_kind_and_reset_on_shrink() {
        let mut state = RenderState::new();
        let visibility = VisibilityConfig::default();
        let reasoning = FlowEvent::new(EventKind::AgentReasoning, json!(["r1", "r2"]));
        let executed = FlowEvent::new(EventKind::AgentFlowExecutedData, json!([{"node": 1}]));

        assert_eq!(render_event(&reasoning, &visibility, &mut state).len(), 2);
        assert_eq!(render_event(&executed, &visibility, &mut state).len(), 1);
        assert_eq!(state.seen(&EventKind::AgentReasoning), 2);
        assert_eq!(state.seen(&EventKind::AgentFlowExecutedData), 1);

        let restarted = FlowEvent::new(EventKind::AgentReasoning, json!(["n1"]));
        let fragments = render_event(&restarted, &visibility, &mut state);
        assert_eq!(texts(&fragments), vec!["\n__Agent Reasoning__:\nn1\n"]);
        assert_eq!(state.seen(&EventKind::AgentReasoning), 1);
    }

    #[test]
    fn non_list_reasoning_renders_as_single_block() {
        let fragments = render_all(
            vec![json!({"event": "agentReasoning", "data": {"agentName": "planner"}})],
            &VisibilityConfig::default(),
        );
        assert_eq!(fragments.len(), 1);
        assert!(texts(&fragments)[0].contains("\"agentName\": \"planner\""));
    }

    #[test]
    fn used_tools_emit_status_then_blocks_with_unwrapped_output() {
        let fragments = render_all(
            vec![json!({"event": "usedTools", "data": [
                {"tool": "search", "toolInput": {"q": "rust"}, "toolOutput": "{\"hits\":2}"}
            ]})],
            &VisibilityConfig::default(),
        );
        assert_eq!(
            fragments[0],
            OutputFragment::status("Tool calling search", false)
        );
        let block = fragments[1].as_text().expect("tool block");
        assert!(block.contains("**Tool:** `search`"));
        assert!(block.contains("\"q\": \"rust\""));
        assert!(block.contains("\"hits\": 2"));
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn tool_blocks_follow_three_independent_switches() {
        let visibility = VisibilityConfig {
            tool_names: false,
            tool_outputs: false,
            ..VisibilityConfig::default()
        };
        let fragments = render_all(
            vec![json!({"event": "calledTools", "data": [
                {"tool": "calc", "input": "1+1", "output": "2"}
            ]})],
            &visibility,
        );
        assert_eq!(fragments.len(), 2);
        let block = fragments[1].as_text().expect("tool block");
        assert!(!block.contains("calc"));
        assert!(block.contains("**Input:**\n```\n1+1\n```"));
        assert!(!block.contains("**Output:**"));

        let fragments = render_all(
            vec![json!({"event": "usedTools", "data": [{"tool": "calc"}]})],
            &VisibilityConfig::hidden(),
        );
        assert_eq!(fragments, vec![OutputFragment::status("Tool calling calc", false)]);
    }

    #[test]
    fn string_encoded_tool_list_keeps_inputs_encoded() {
        let data = json!([{"tool": "search", "toolInput": "{\"q\":\"rust\"}"}]).to_string();
        let fragments = render_all(
            vec![json!({"event": "usedTools", "data": data})],
            &VisibilityConfig::default(),
        );
        assert_eq!(
            fragments[0],
            OutputFragment::status("Tool calling search", false)
        );
        let block = fragments[1].as_text().expect("tool block");
        assert!(block.contains("**Input:**\n```\n{\"q\":\"rust\"}\n```"));
    }

    #[test]
    fn plain_text_tool_payload_is_not_parsed() {
        let fragments = render_all(
            vec![json!({"event": "usedTools", "data": "42"})],
            &VisibilityConfig::default(),
        );
        assert_eq!(
            texts(&fragments),
            vec!["\n[Tool] Unexpected data format: \"42\"\n"]
        );
    }

    #[test]
    fn malformed_tool_entry_is_reported_inline() {
        let fragments = render_all(
            vec![json!({"event": "usedTools", "data": ["oops"]})],
            &VisibilityConfig::default(),
        );
        assert_eq!(fragments[0], OutputFragment::status("Tool calling", false));
        assert_eq!(
            texts(&fragments),
            vec!["\n[Tool] Unexpected data format: \"oops\"\n"]
        );
    }

    #[test]
    fn agent_trace_action_becomes_tool_status() {
        let fragments = render_all(
            vec![json!({"event": "agent_trace", "data": {
                "step": "agent_action",
                "action": "{\"tool\":\"web_browser\",\"toolInput\":\"x\"}"
            }})],
            &VisibilityConfig::hidden(),
        );
        assert_eq!(
            fragments,
            vec![OutputFragment::status("Tool calling web_browser", false)]
        );
    }

    #[test]
    fn malformed_agent_action_is_contained() {
        let fragments = render_all(
            vec![
                json!({"event": "agent_trace", "data": {"step": "agent_action", "action": "{not json"}}),
                json!({"event": "token", "data": "still here"}),
            ],
            &VisibilityConfig::default(),
        );
        assert_eq!(fragments.len(), 2);
        let first = fragments[0].as_text().expect("error text");
        assert!(first.starts_with("\nError handling chunk: render error: invalid agent action JSON"));
        assert_eq!(fragments[1], OutputFragment::text("still here"));
    }

    #[test]
    fn other_agent_trace_steps_use_catch_all() {
        let event = json!({"event": "agent_trace", "data": {"step": "tool_end"}});
        let shown = render_all(vec![event.clone()], &VisibilityConfig::default());
        assert_eq!(
            texts(&shown),
            vec!["\n[Other Event: agent_trace] {\"step\":\"tool_end\"}\n"]
        );
        let visibility = VisibilityConfig {
            other_events: false,
            ..VisibilityConfig::default()
        };
        assert!(render_all(vec![event], &visibility).is_empty());
    }

    #[test]
    fn unknown_and_missing_kinds_use_catch_all() {
        let fragments = render_all(
            vec![
                json!({"event": "sourceDocuments", "data": [{"id": 1}]}),
                json!({"data": "orphan"}),
            ],
            &VisibilityConfig::default(),
        );
        assert_eq!(
            texts(&fragments),
            vec![
                "\n[Other Event: sourceDocuments] [{\"id\":1}]\n",
                "\n[Other Event: none] \"orphan\"\n",
            ]
        );
    }

    #[test]
    fn unparseable_chunk_yields_one_warning_and_processing_continues() {
        let mut state = RenderState::new();
        let visibility = VisibilityConfig::default();
        let mut fragments = render_chunk(Chunk::Raw("][broken".into()), &visibility, &mut state);
        fragments.extend(render_chunk(
            Chunk::Raw("{\"event\":\"token\",\"data\":\"ok\"}".into()),
            &visibility,
            &mut state,
        ));
        assert_eq!(
            fragments,
            vec![
                OutputFragment::text("\n[Warning] Skipped unparseable chunk: ][broken\n"),
                OutputFragment::text("ok"),
            ]
        );
    }
}
