use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use serde_json::json;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::errors::TransportError;
use crate::event::Chunk;
use crate::query::PredictionRequest;
use crate::stream::render_prediction;

use super::sse::{SseDecoder, frame_to_chunk};
use super::{ChunkStream, FlowTransport, PredictionBody};

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Flowise REST client built on `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    /// Creates a client for the deployment described by `config`.
    pub fn new(config: &PipelineConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn post_prediction(
        &self,
        flow_id: &str,
        request: &PredictionRequest,
    ) -> Result<reqwest::Response, TransportError> {
        let response = self
            .client
            .post(self.url(&format!("prediction/{flow_id}")))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(TransportError::status(status.as_u16(), body))
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

#[async_trait::async_trait]
impl FlowTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_flow(&self, flow_id: &str) -> Result<serde_json::Value, TransportError> {
        let response = self
            .client
            .get(self.url(&format!("chatflows/{flow_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::decode(e.to_string()))
    }

    async fn stream_prediction(
        &self,
        flow_id: &str,
        request: &PredictionRequest,
    ) -> Result<ChunkStream, TransportError> {
        let request = request.clone().streaming(true);
        debug!(flow_id, "starting streaming prediction");
        let response = self.post_prediction(flow_id, &request).await?;

        // Flows that cannot stream answer with a plain JSON body.
        if !is_event_stream(&response) {
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::stream(e.to_string()))?;
            let answer = render_prediction(&PredictionBody::from_text(text));
            let chunk = Chunk::Record(json!({"event": "token", "data": answer}));
            return Ok(Box::pin(stream::iter([Ok(chunk)])));
        }

        Ok(Box::pin(chunk_stream(Box::pin(response.bytes_stream()))))
    }

    async fn predict(
        &self,
        flow_id: &str,
        request: &PredictionRequest,
    ) -> Result<PredictionBody, TransportError> {
        let request = request.clone().streaming(false);
        debug!(flow_id, "sending single-shot prediction");
        let response = self.post_prediction(flow_id, &request).await?;
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::stream(e.to_string()))?;
        Ok(PredictionBody::from_text(text))
    }
}

fn chunk_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<Chunk, TransportError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<Chunk>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Ok(Some((chunk, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(bytes)) => {
                        let frames = state.decoder.push(&bytes);
                        state
                            .pending
                            .extend(frames.into_iter().filter_map(frame_to_chunk));
                    }
                    Some(Err(e)) => return Err(TransportError::stream(e.to_string())),
                    None => {
                        state.done = true;
                        state
                            .pending
                            .extend(state.decoder.finish().and_then(frame_to_chunk));
                    }
                }
            }
        },
    )
}
