//! Common imports for hosting the pipeline.
pub use crate::{
    ChatMessage, FlowTransport, OutputFragment, PipeOutput, Pipeline, PipelineConfig,
    PipelineError, ReplayTransport, VisibilityConfig,
};
