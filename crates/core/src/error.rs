//! Error taxonomy of the session coordinator.
//!
//! Local, recoverable failures (one bad audio delta, one bad tool call) never
//! reach the caller as a `SessionError`; they are logged and the session goes on.

/// Failures of the PCM codec.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to decode audio: {0}")]
    Decode(String),
}

/// Failures acquiring a local audio device.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("audio device error: {0}")]
    Device(String),
}

/// Failures of the network session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open session: {0}")]
    Connect(String),
    #[error("session is closed")]
    Closed,
    #[error("failed to send: {0}")]
    Send(String),
}

/// Errors surfaced to callers of the lifecycle controller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection attempt was cancelled")]
    Cancelled,
    #[error("session controller has shut down")]
    Shutdown,
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(reason) => SessionError::PermissionDenied(reason),
            CaptureError::Device(reason) => SessionError::Device(reason),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(reason) => SessionError::Connect(reason),
            other => SessionError::Transport(other.to_string()),
        }
    }
}

/// A tool call whose arguments do not match the tool's declared parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),
    #[error("argument '{name}' must be {expected}")]
    InvalidArgument {
        name: &'static str,
        expected: &'static str,
    },
    #[error("unknown section '{given}', expected one of: {valid}")]
    UnknownSection { given: String, valid: String },
    #[error("unknown form field '{given}', expected one of: {valid}")]
    UnknownField { given: String, valid: String },
}
