//! Transport capability used to reach a Flowise flow.
//!
//! The renderer and stream driver only see [`Chunk`]s and
//! [`PredictionBody`]s; which client produced them is irrelevant to them.
mod http;
mod replay;
pub(crate) mod sse;

use std::pin::Pin;

use serde_json::Value;

use crate::errors::TransportError;
use crate::event::Chunk;
use crate::query::PredictionRequest;

pub use http::HttpTransport;
pub use replay::ReplayTransport;

/// Forward-only stream of chunks for one prediction.
pub type ChunkStream =
    Pin<Box<dyn futures::Stream<Item = Result<Chunk, TransportError>> + Send + 'static>>;

/// Body returned by the single-shot prediction endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum PredictionBody {
    Json(Value),
    /// The body was not JSON.
    Text(String),
}

impl PredictionBody {
    /// Classifies a raw response body.
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }
}

/// Client-side access to a Flowise deployment.
#[async_trait::async_trait]
pub trait FlowTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetches the chat-flow definition (`GET /api/v1/chatflows/{id}`).
    async fn fetch_flow(&self, flow_id: &str) -> Result<Value, TransportError>;

    /// Starts a streaming prediction and returns its chunk stream.
    async fn stream_prediction(
        &self,
        flow_id: &str,
        request: &PredictionRequest,
    ) -> Result<ChunkStream, TransportError>;

    /// Runs a single-shot prediction.
    async fn predict(
        &self,
        flow_id: &str,
        request: &PredictionRequest,
    ) -> Result<PredictionBody, TransportError>;
}
