//! Provider- and device-agnostic core of the voice navigation assistant: the PCM
//! codec, playback scheduling, the session transport seam, tool dispatch and the
//! session lifecycle controller.

pub mod audio;
pub mod codec;
pub mod controller;
pub mod error;
pub mod log;
pub mod playback;
pub mod tools;
pub mod transport;
pub mod ui_state;

pub use controller::{
    Collaborators, ConnectionState, ControllerConfig, SessionController, SessionStatus,
};
pub use error::{CaptureError, CodecError, SessionError, ToolError, TransportError};
pub use log::{LogCategory, LogEntry, SessionLog};
pub use tools::{ToolDispatcher, ToolOutcome, ToolSchema, tool_schemas};
pub use transport::{
    Connection, Connector, InboundMessage, SessionConfig, ToolCallRequest, ToolCallResponse,
    TransportLink,
};
pub use ui_state::{AppState, FormField, Section, SharedAppState, UiStateSink};
