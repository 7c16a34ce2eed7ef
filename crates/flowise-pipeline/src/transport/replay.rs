use std::path::Path;

use futures::stream;
use serde_json::{Value, json};

use crate::errors::TransportError;
use crate::event::{Chunk, EventKind, Payload};
use crate::query::PredictionRequest;

use super::{ChunkStream, FlowTransport, PredictionBody};

/// Replays a recorded Flowise stream instead of calling a server.
///
/// Recordings are JSON lines: one raw chunk per line, exactly as the
/// `data:` field of the SSE stream carried it. Lines are handed over as
/// raw text, so broken lines exercise the same admission path as a live
/// stream.
#[derive(Clone, Debug, Default)]
pub struct ReplayTransport {
    chunks: Vec<Chunk>,
    flow_name: Option<String>,
}

impl ReplayTransport {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            flow_name: None,
        }
    }

    /// Parses a JSON-lines recording. Blank lines are skipped.
    pub fn from_lines(text: &str) -> Self {
        Self::new(
            text.lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| Chunk::Raw(line.to_string()))
                .collect(),
        )
    }

    /// Loads a JSON-lines recording from disk.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TransportError::Replay {
                message: format!("failed to read {}: {e}", path.display()),
            })?;
        Ok(Self::from_lines(&text))
    }

    /// Name reported by [`FlowTransport::fetch_flow`].
    pub fn flow_name(mut self, name: impl Into<String>) -> Self {
        self.flow_name = Some(name.into());
        self
    }

    /// Concatenated `token` payloads of the recording.
    fn answer(&self) -> String {
        self.chunks
            .iter()
            .filter_map(|chunk| chunk.clone().into_event().ok())
            .filter(|event| event.kind == EventKind::Token && event.error.is_none())
            .filter_map(|event| match event.payload {
                Payload::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl FlowTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn fetch_flow(&self, flow_id: &str) -> Result<Value, TransportError> {
        Ok(json!({
            "id": flow_id,
            "name": self.flow_name.as_deref().unwrap_or("replay"),
        }))
    }

    async fn stream_prediction(
        &self,
        _flow_id: &str,
        _request: &PredictionRequest,
    ) -> Result<ChunkStream, TransportError> {
        Ok(Box::pin(stream::iter(self.chunks.clone().into_iter().map(Ok))))
    }

    async fn predict(
        &self,
        _flow_id: &str,
        _request: &PredictionRequest,
    ) -> Result<PredictionBody, TransportError> {
        Ok(PredictionBody::Json(json!({ "text": self.answer() })))
    }
}
