//! Stream driver: incremental and aggregate response modes.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::VisibilityConfig;
use crate::errors::TransportError;
use crate::fragment::OutputFragment;
use crate::render::{RenderState, render_chunk};
use crate::transport::{ChunkStream, PredictionBody};

/// Lazy, single-pass sequence of output fragments.
pub type FragmentStream = Pin<Box<dyn futures::Stream<Item = OutputFragment> + Send + 'static>>;

const ANSWER_KEYS: [&str; 4] = ["text", "answer", "response", "result"];

/// Pulls chunks from the transport and renders them one at a time.
///
/// Owns the per-connection [`RenderState`], so each driver must serve
/// exactly one request.
struct Driver {
    chunks: ChunkStream,
    visibility: VisibilityConfig,
    state: RenderState,
    finished: bool,
}

impl Driver {
    fn new(chunks: ChunkStream, visibility: VisibilityConfig) -> Self {
        Self {
            chunks,
            visibility,
            state: RenderState::new(),
            finished: false,
        }
    }

    /// Fragments for the next chunk, or `None` once the transport is done.
    async fn next_fragments(&mut self) -> Option<Vec<OutputFragment>> {
        if self.finished {
            return None;
        }
        match self.chunks.next().await {
            Some(Ok(chunk)) => {
                debug!(?chunk, "raw chunk");
                Some(render_chunk(chunk, &self.visibility, &mut self.state))
            }
            Some(Err(err)) => {
                self.finished = true;
                error!(error = %err, "Flowise stream failed");
                Some(vec![stream_failure(&err)])
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

fn stream_failure(err: &TransportError) -> OutputFragment {
    OutputFragment::text(format!("\nError reading FlowiseAI stream: {err}\n"))
}

/// Incremental mode.
///
/// Emits an "Analysis started" status, every rendered fragment in arrival
/// order, and a final status carrying the time elapsed since `started`
/// (the start of the request, not of the stream).
pub fn incremental(
    chunks: ChunkStream,
    visibility: VisibilityConfig,
    started: Instant,
) -> FragmentStream {
    enum Phase {
        Running,
        Finishing,
        Done,
    }

    struct State {
        driver: Driver,
        pending: VecDeque<OutputFragment>,
        phase: Phase,
        started: Instant,
    }

    let state = State {
        driver: Driver::new(chunks, visibility),
        pending: VecDeque::from([OutputFragment::status("Analysis started", false)]),
        phase: Phase::Running,
        started,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((fragment, state));
            }
            match state.phase {
                Phase::Done => return None,
                Phase::Finishing => {
                    state.phase = Phase::Done;
                    let elapsed = state.started.elapsed().as_secs_f64();
                    state.pending.push_back(OutputFragment::status(
                        format!("Analysis complete (elapsed {elapsed:.2}s)"),
                        true,
                    ));
                }
                Phase::Running => match state.driver.next_fragments().await {
                    Some(fragments) => state.pending.extend(fragments),
                    None => state.phase = Phase::Finishing,
                },
            }
        }
    }))
}

/// Aggregate mode: the transcript text of every chunk, concatenated.
///
/// Status fragments are dropped. Returns once the transport has finished
/// or failed.
pub async fn aggregate(chunks: ChunkStream, visibility: VisibilityConfig) -> String {
    let mut driver = Driver::new(chunks, visibility);
    let mut text = String::new();
    while let Some(fragments) = driver.next_fragments().await {
        for fragment in &fragments {
            if let Some(part) = fragment.as_text() {
                text.push_str(part);
            }
        }
    }
    text
}

/// A stream that yields exactly one fragment.
pub fn single(fragment: OutputFragment) -> FragmentStream {
    Box::pin(stream::iter([fragment]))
}

/// Renders a single-shot prediction body as the final answer.
///
/// The first string among `text`, `answer`, `response` and `result` wins.
/// Other JSON is shown as a formatted block; non-JSON bodies verbatim.
pub fn render_prediction(body: &PredictionBody) -> String {
    match body {
        PredictionBody::Text(text) => text.clone(),
        PredictionBody::Json(Value::String(text)) => text.clone(),
        PredictionBody::Json(Value::Object(map)) => ANSWER_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| json_block(&Value::Object(map.clone()))),
        PredictionBody::Json(other) => json_block(other),
    }
}

fn json_block(value: &Value) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("```json\n{pretty}\n```")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Chunk;
    use crate::fragment::concat_text;
    use serde_json::json;
    use std::time::Duration;

    fn chunks(items: Vec<Result<Chunk, TransportError>>) -> ChunkStream {
        Box::pin(stream::iter(items))
    }

    fn sample() -> Vec<Result<Chunk, TransportError>> {
        vec![
            Ok(Chunk::Raw("{\"event\":\"start\",\"data\":\"\"}".into())),
            Ok(Chunk::Record(json!({"event": "usedTools", "data": [{"tool": "calc", "toolOutput": "2"}]}))),
            Ok(Chunk::Raw("][broken".into())),
            Ok(Chunk::Record(json!({"event": "agentReasoning", "data": ["plan"]}))),
            Ok(Chunk::Record(json!({"event": "agentReasoning", "data": ["plan", "act"]}))),
            Ok(Chunk::Record(json!({"event": "token", "data": "The answer"}))),
            Ok(Chunk::Record(json!({"event": "token", "data": " is 2."}))),
            Ok(Chunk::Record(json!({"event": "end", "data": "[DONE]"}))),
        ]
    }

    #[tokio::test]
    async fn incremental_wraps_fragments_in_start_and_complete_status() {
        let fragments: Vec<_> = incremental(
            chunks(sample()),
            VisibilityConfig::default(),
            Instant::now(),
        )
        .collect()
        .await;

        assert_eq!(
            fragments.first(),
            Some(&OutputFragment::status("Analysis started", false))
        );
        match fragments.last() {
            Some(OutputFragment::Status { description, done }) => {
                assert!(description.starts_with("Analysis complete (elapsed "));
                assert!(*done);
            }
            other => panic!("expected completion status, got {other:?}"),
        }
        assert!(fragments.contains(&OutputFragment::text("The answer")));
        assert!(fragments.contains(&OutputFragment::text(
            "\n[Warning] Skipped unparseable chunk: ][broken\n"
        )));
    }

    #[tokio::test]
    async fn single_token_stream_is_verbatim() {
        let fragments: Vec<_> = incremental(
            chunks(vec![Ok(Chunk::Record(json!({"event": "token", "data": "hello"})))]),
            VisibilityConfig::hidden(),
            Instant::now(),
        )
        .collect()
        .await;
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[1], OutputFragment::text("hello"));
    }

    #[tokio::test]
    async fn aggregate_equals_incremental_text() {
        for visibility in [VisibilityConfig::default(), VisibilityConfig::hidden()] {
            let streamed: Vec<_> = incremental(chunks(sample()), visibility.clone(), Instant::now())
                .collect()
                .await;
            let collected = aggregate(chunks(sample()), visibility).await;
            assert_eq!(collected, concat_text(&streamed));
        }
    }

    #[tokio::test]
    async fn hidden_metadata_leaves_only_answer_and_warnings() {
        let collected = aggregate(chunks(sample()), VisibilityConfig::hidden()).await;
        assert_eq!(
            collected,
            "\n[Warning] Skipped unparseable chunk: ][broken\nThe answer is 2."
        );
    }

    #[tokio::test]
    async fn transport_failure_mid_stream_is_reported_then_stream_ends() {
        let items = vec![
            Ok(Chunk::Record(json!({"event": "token", "data": "partial"}))),
            Err(TransportError::stream("connection reset")),
            Ok(Chunk::Record(json!({"event": "token", "data": "never"}))),
        ];
        let fragments: Vec<_> =
            incremental(chunks(items), VisibilityConfig::default(), Instant::now())
                .collect()
                .await;
        let texts: Vec<_> = fragments.iter().filter_map(OutputFragment::as_text).collect();
        assert_eq!(
            texts,
            vec![
                "partial",
                "\nError reading FlowiseAI stream: stream read failed: connection reset\n"
            ]
        );
        assert!(matches!(
            fragments.last(),
            Some(OutputFragment::Status { done: true, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_is_measured_from_request_start() {
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(1500)).await;
        let fragments: Vec<_> = incremental(chunks(vec![]), VisibilityConfig::default(), started)
            .collect()
            .await;
        assert_eq!(
            fragments,
            vec![
                OutputFragment::status("Analysis started", false),
                OutputFragment::status("Analysis complete (elapsed 1.50s)", true),
            ]
        );
    }

    #[test]
    fn prediction_prefers_known_answer_fields() {
        let body = PredictionBody::Json(json!({"answer": "42", "text": 7, "chatId": "c"}));
        assert_eq!(render_prediction(&body), "42");
        let body = PredictionBody::Json(json!({"result": "r", "text": "t"}));
        assert_eq!(render_prediction(&body), "t");
    }

    #[test]
    fn prediction_without_answer_field_is_formatted_json() {
        let body = PredictionBody::Json(json!({"json": {"score": 1}}));
        assert_eq!(
            render_prediction(&body),
            "```json\n{\n  \"json\": {\n    \"score\": 1\n  }\n}\n```"
        );
        assert_eq!(
            render_prediction(&PredictionBody::Json(json!([1]))),
            "```json\n[\n  1\n]\n```"
        );
    }

    #[test]
    fn non_json_prediction_is_verbatim() {
        assert_eq!(
            render_prediction(&PredictionBody::Text("plain".into())),
            "plain"
        );
    }
}
