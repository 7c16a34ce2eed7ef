/// Errors returned by a flow transport before they are turned into
/// user-visible fragments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request could not be sent (connect, DNS, TLS, timeout).
    #[error("request failed: {message}")]
    Request { message: String },
    /// Flowise answered with a non-success status.
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response stream failed after the connection was established.
    #[error("stream read failed: {message}")]
    Stream { message: String },
    /// The response body could not be decoded.
    #[error("invalid response body: {message}")]
    Decode { message: String },
    /// A recorded chunk file could not be read.
    #[error("replay failed: {message}")]
    Replay { message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a status error from an HTTP status code and the response body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a stream read error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Creates a body decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code, when the error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Top-level error type for the pipeline.
///
/// Only `Config` and `Transport` end a request early. `ChunkParse` and
/// `Render` are contained to a single chunk or event and surface as
/// fragments inside an otherwise healthy stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Missing credentials, or the flow is not enabled/complete.
    #[error("config error: {0}")]
    Config(String),
    /// Network failure or non-success answer from Flowise.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// One streamed item could not be parsed or had an unexpected shape.
    #[error("chunk parse error: {0}")]
    ChunkParse(String),
    /// Rendering one classified event failed.
    #[error("render error: {0}")]
    Render(String),
}

impl PipelineError {
    pub(crate) fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub(crate) fn chunk_parse(message: impl Into<String>) -> Self {
        Self::ChunkParse(message.into())
    }
}
