//! The provider-agnostic view of the hosted speech session.
//!
//! A [`Connector`] opens a [`Connection`]: an outbound [`TransportLink`] plus a
//! single inbound channel of already classified [`InboundMessage`]s. Adapters
//! for a concrete service translate its wire protocol into these types.

use crate::audio::{AudioFrame, EncodedAudio};
use crate::error::TransportError;
use crate::log::{LogCategory, SessionLog};
use crate::tools::{ToolOutcome, ToolSchema};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Session parameters sent when connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub voice: String,
    pub system_instruction: String,
    pub tools: Vec<ToolSchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

/// One inbound message, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AudioDelta(EncodedAudio),
    Interrupted,
    ToolCalls(Vec<ToolCallRequest>),
    TurnComplete,
    /// What the service heard the user say.
    InputTranscript(String),
    /// What the model is saying.
    OutputTranscript(String),
    ToolCallCancelled(Vec<String>),
    GoAway(Option<String>),
    Closed { reason: Option<String> },
    Error(String),
}

impl InboundMessage {
    /// True for messages after which the session is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundMessage::Closed { .. } | InboundMessage::Error(_))
    }
}

/// The outbound half of an open session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportLink: Send {
    async fn send_audio(&mut self, frame: AudioFrame) -> Result<(), TransportError>;
    async fn send_tool_response(&mut self, response: ToolCallResponse) -> Result<(), TransportError>;
    /// Must tolerate repeated calls.
    async fn close(&mut self);
}

pub struct Connection {
    pub link: Box<dyn TransportLink>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Opens sessions with the hosted service. `connect` resolves once the remote
/// side has acknowledged the session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: SessionConfig) -> Result<Connection, TransportError>;
}

/// Wraps a link with the session's send policy: audio is fire-and-forget, tool
/// responses on a closed session are recorded rather than raised, and close is
/// idempotent.
pub struct SessionTransport {
    link: Option<Box<dyn TransportLink>>,
    log: SessionLog,
    dropped_frames: u64,
}

impl SessionTransport {
    pub fn new(link: Box<dyn TransportLink>, log: SessionLog) -> Self {
        Self {
            link: Some(link),
            log,
            dropped_frames: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Frames dropped because the session was closed or the send failed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub async fn send_audio(&mut self, frame: AudioFrame) {
        let Some(link) = self.link.as_mut() else {
            self.dropped_frames += 1;
            tracing::debug!("Session closed, dropping {} bytes of audio", frame.data().len());
            return;
        };
        if let Err(e) = link.send_audio(frame).await {
            self.dropped_frames += 1;
            tracing::warn!("Dropping audio frame: {}", e);
        }
    }

    pub async fn send_tool_response(&mut self, response: ToolCallResponse) {
        let Some(link) = self.link.as_mut() else {
            self.log.record(
                LogCategory::System,
                format!("Session closed, dropped response to {} ({})", response.name, response.id),
            );
            return;
        };
        let (id, name) = (response.id.clone(), response.name.clone());
        if let Err(e) = link.send_tool_response(response).await {
            self.log.record(
                LogCategory::System,
                format!("Failed to send response to {} ({}): {}", name, id, e),
            );
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
            tracing::debug!("transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> ToolCallResponse {
        ToolCallResponse {
            id: "call-1".to_string(),
            name: "navigate_to_section".to_string(),
            outcome: ToolOutcome::Success("ok".to_string()),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut link = MockTransportLink::new();
        link.expect_close().times(1).return_const(());
        let log = SessionLog::new();
        let mut transport = SessionTransport::new(Box::new(link), log.clone());

        transport.close().await;
        transport.close().await;

        assert!(!transport.is_open());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_sends_after_close_are_dropped() {
        let mut link = MockTransportLink::new();
        link.expect_close().times(1).return_const(());
        link.expect_send_audio().never();
        link.expect_send_tool_response().never();
        let log = SessionLog::new();
        let mut transport = SessionTransport::new(Box::new(link), log.clone());
        transport.close().await;

        transport.send_audio(AudioFrame::new(vec![0, 0], 16_000)).await;
        transport.send_tool_response(response()).await;

        assert_eq!(transport.dropped_frames(), 1);
        let system = log.by_category(LogCategory::System);
        assert_eq!(system.len(), 1);
        assert!(system[0].message.contains("call-1"));
    }

    #[tokio::test]
    async fn test_send_failures_are_not_raised() {
        let mut link = MockTransportLink::new();
        link.expect_send_audio()
            .times(1)
            .returning(|_| Err(TransportError::Closed));
        link.expect_send_tool_response()
            .times(1)
            .returning(|_| Err(TransportError::Send("broken pipe".to_string())));
        let log = SessionLog::new();
        let mut transport = SessionTransport::new(Box::new(link), log.clone());

        transport.send_audio(AudioFrame::new(vec![1, 0], 16_000)).await;
        transport.send_tool_response(response()).await;

        assert_eq!(transport.dropped_frames(), 1);
        assert_eq!(log.by_category(LogCategory::System).len(), 1);
    }

    #[test]
    fn test_terminal_messages() {
        assert!(InboundMessage::Closed { reason: None }.is_terminal());
        assert!(InboundMessage::Error("reset".to_string()).is_terminal());
        assert!(!InboundMessage::TurnComplete.is_terminal());
    }
}
