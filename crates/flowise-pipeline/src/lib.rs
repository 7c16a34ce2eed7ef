//! Chat pipeline adapter for Flowise flows.
//!
//! A chat host hands each user message to [`Pipeline::process_message`]. The
//! pipeline composes the query, invokes the configured flow through a
//! [`FlowTransport`], and renders the flow's event stream into transcript
//! text and ephemeral status updates.
//!
//! # Streaming usage
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use flowise_pipeline::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PipelineError> {
//! let pipeline = Pipeline::new(
//!     PipelineConfig::new("http://localhost:3000", "api-key").flow("flow-id", "Research"),
//! )?;
//! pipeline.on_startup().await;
//!
//! let body = serde_json::json!({"stream": true});
//! if let PipeOutput::Stream(mut fragments) =
//!     pipeline.process_message("What changed?", "flowise", &[], &body).await
//! {
//!     while let Some(fragment) = fragments.next().await {
//!         if let Some(text) = fragment.as_text() {
//!             print!("{text}");
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Environment-backed settings and display switches.
pub mod config;
/// Public error types.
pub mod errors;
/// Flowise event records and their classification.
pub mod event;
/// Resolution of the configured flow.
pub mod flow;
/// Fragments handed back to the chat host.
pub mod fragment;
/// Logging setup.
pub mod observability;
/// Host-facing entry point and lifecycle hooks.
pub mod pipeline;
/// Common imports for typical usage.
pub mod prelude;
/// Query text and prediction request building.
pub mod query;
/// Requests-per-minute throttle.
pub mod rate;
/// Event classification and rendering into fragments.
pub mod render;
/// Incremental and aggregate response modes.
pub mod stream;
/// Clients that reach a Flowise deployment.
pub mod transport;
/// Decoding of JSON nested inside string values.
pub mod unwrap;

pub use config::{PipelineConfig, VisibilityConfig};
pub use errors::{PipelineError, TransportError};
pub use event::{Chunk, EventKind, FlowEvent, Payload};
pub use flow::FlowConfig;
pub use fragment::OutputFragment;
pub use observability::init_observability;
pub use pipeline::{PipeOutput, Pipeline, TransportFactory};
pub use query::{ChatMessage, PredictionRequest};
pub use render::{RenderState, render_chunk, render_event};
pub use stream::FragmentStream;
pub use transport::{ChunkStream, FlowTransport, HttpTransport, PredictionBody, ReplayTransport};
pub use unwrap::unwrap_value;
