use thiserror::Error;

/// Crate-wide error type. Variants map onto the error taxonomy: each carries
/// exactly the context its recovery policy needs.
#[derive(Debug, Error)]
pub enum VideoMemoryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Camera '{io_id}' connection failed: {reason}")]
    CameraConnection { io_id: String, reason: String },

    #[error("Camera '{io_id}' not found")]
    CameraNotFound { io_id: String },

    #[error("VLM transport error: {0}")]
    Transport(String),

    #[error("VLM rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("VLM output did not validate against schema: {0}")]
    Parse(String),

    #[error("VLM refused to answer: {0}")]
    Refusal(String),

    #[error("VLM returned an empty response")]
    Empty,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Action dispatch error: {0}")]
    Action(String),

    #[error("Shutdown timed out waiting for worker: {0}")]
    ShutdownTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VideoMemoryError>;

/// Errors from a single `ModelProvider::generate` call. Kept distinct from
/// `VideoMemoryError` so provider implementations don't need to know about
/// store/device/action concerns; converted at the ingestor boundary.
#[derive(Debug, Error)]
pub enum VlmError {
    #[error("provider misconfigured: {0}")]
    Config(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("response failed schema validation: {0}")]
    Parse(String),
    #[error("model refused: {0}")]
    Refusal(String),
    #[error("empty response")]
    Empty,
}

impl From<VlmError> for VideoMemoryError {
    fn from(e: VlmError) -> Self {
        match e {
            VlmError::Config(s) => VideoMemoryError::Config(s),
            VlmError::Transport(s) => VideoMemoryError::Transport(s),
            VlmError::RateLimit(s) => VideoMemoryError::RateLimit(s),
            VlmError::Parse(s) => VideoMemoryError::Parse(s),
            VlmError::Refusal(s) => VideoMemoryError::Refusal(s),
            VlmError::Empty => VideoMemoryError::Empty,
        }
    }
}
