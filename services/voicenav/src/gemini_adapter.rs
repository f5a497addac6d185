use crate::config::{INBOUND_CAPACITY, SERVER_EVENT_CAPACITY};
use async_trait::async_trait;
use gemini_live::types::client::{FunctionResponse, Setup};
use gemini_live::types::{Blob, FunctionDeclaration, ServerMessage, Tool};
use gemini_live::{Client, ServerEvent, ServerRx};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voicenav_core::audio::{AudioFrame, EncodedAudio, OUTPUT_SAMPLE_RATE};
use voicenav_core::codec;
use voicenav_core::tools::ToolOutcome;
use voicenav_core::{
    Connection, Connector, InboundMessage, SessionConfig, ToolCallRequest, ToolCallResponse,
    TransportError, TransportLink,
};

/// Opens Gemini Live sessions for the session controller.
pub struct GeminiConnector {
    api_key: SecretString,
    model: String,
    base_url: Option<String>,
}

impl GeminiConnector {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: SecretString::from(api_key.to_string()),
            model: model.to_string(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    fn client_config(&self) -> gemini_live::Config {
        let builder = gemini_live::Config::builder()
            .with_api_key(self.api_key.expose_secret())
            .with_model(&self.model);
        match &self.base_url {
            Some(base_url) => builder.with_base_url(base_url).build(),
            None => builder.build(),
        }
    }
}

/// The setup message for a session: audio responses in the requested voice,
/// the system instruction, every tool, and transcription of both sides.
pub fn build_setup(config: &gemini_live::Config, session: &SessionConfig) -> Setup {
    let declarations = session
        .tools
        .iter()
        .map(|tool| {
            FunctionDeclaration::new(
                tool.name.to_string(),
                tool.description.to_string(),
                tool.parameters_schema(),
            )
        })
        .collect();

    config
        .setup_builder()
        .with_voice(&session.voice)
        .with_system_instruction(&session.system_instruction)
        .with_tools(vec![Tool::new(declarations)])
        .with_transcription_enable()
        .build()
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(&self, session: SessionConfig) -> Result<Connection, TransportError> {
        let config = self.client_config();
        let setup = build_setup(&config, &session);
        tracing::info!("Opening Gemini Live session with {}", config.model());

        let mut client = gemini_live::connect_with_config(SERVER_EVENT_CAPACITY, config, setup)
            .await
            .map_err(|e| TransportError::Connect(format!("{:#}", e)))?;
        let events = client
            .server_events()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let pump = tokio::spawn(forward_events(events, tx));

        Ok(Connection {
            link: Box::new(GeminiLink {
                client,
                pump: Some(pump),
            }),
            inbound: rx,
        })
    }
}

/// Outbound half of a Gemini Live session.
pub struct GeminiLink {
    client: Client,
    pump: Option<JoinHandle<()>>,
}

impl GeminiLink {
    fn send_error(&self, err: anyhow::Error) -> TransportError {
        if self.client.is_open() {
            TransportError::Send(err.to_string())
        } else {
            TransportError::Closed
        }
    }
}

#[async_trait]
impl TransportLink for GeminiLink {
    async fn send_audio(&mut self, frame: AudioFrame) -> Result<(), TransportError> {
        let blob = Blob::new(&frame.mime_type(), codec::to_base64(&frame));
        match self.client.send_realtime_audio(blob).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.send_error(e)),
        }
    }

    async fn send_tool_response(&mut self, response: ToolCallResponse) -> Result<(), TransportError> {
        match self
            .client
            .send_tool_response(vec![to_function_response(&response)])
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(self.send_error(e)),
        }
    }

    async fn close(&mut self) {
        self.client.close().await;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Ok(stats) = self.client.stats() {
            tracing::info!(
                "Session used {} tokens ({} prompt, {} response)",
                stats.total_tokens(),
                stats.prompt_tokens(),
                stats.response_tokens()
            );
        }
    }
}

pub fn to_function_response(response: &ToolCallResponse) -> FunctionResponse {
    match &response.outcome {
        ToolOutcome::Success(text) => FunctionResponse::result(&response.id, &response.name, text),
        ToolOutcome::Failure(text) => FunctionResponse::error(&response.id, &response.name, text),
    }
}

/// Translates client events into the session's inbound channel until either
/// side goes away. Falling behind the client's event buffer ends the session:
/// the skipped events may have carried tool calls that would never be answered.
async fn forward_events(mut events: ServerRx, tx: mpsc::Sender<InboundMessage>) {
    loop {
        let inbound = match events.recv().await {
            Ok(ServerEvent::Message(message)) => translate(message),
            Ok(ServerEvent::Error(e)) => vec![InboundMessage::Error(e)],
            Ok(ServerEvent::Close { reason }) => vec![InboundMessage::Closed { reason }],
            Err(RecvError::Lagged(n)) => {
                tracing::error!("Gemini event stream lagged by {} messages.", n);
                vec![InboundMessage::Error(format!("missed {} server events", n))]
            }
            Err(RecvError::Closed) => vec![InboundMessage::Closed { reason: None }],
        };
        for message in inbound {
            let terminal = message.is_terminal();
            if tx.send(message).await.is_err() || terminal {
                tracing::debug!("Gemini event stream ended");
                return;
            }
        }
    }
}

/// Classifies one server message. A message may carry several facets (a
/// transcript alongside audio, say); they come out in the order they should be
/// handled. Messages with nothing the session acts on yield nothing.
pub fn translate(message: ServerMessage) -> Vec<InboundMessage> {
    let kind = message.kind();
    let mut out = Vec::new();

    if let Some(content) = message.server_content {
        if let Some(transcription) = content.input_transcription {
            out.push(InboundMessage::InputTranscript(transcription.text));
        }
        if content.interrupted == Some(true) {
            out.push(InboundMessage::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                match part.inline_data {
                    Some(blob) if blob.is_audio() => {
                        let rate = blob.sample_rate().unwrap_or(OUTPUT_SAMPLE_RATE);
                        out.push(InboundMessage::AudioDelta(EncodedAudio::new(blob.data, rate)));
                    }
                    Some(blob) => tracing::debug!("Ignoring inline {} data", blob.mime_type),
                    None => {
                        if let Some(text) = part.text {
                            tracing::debug!("Model text: {}", text);
                        }
                    }
                }
            }
        }
        if let Some(transcription) = content.output_transcription {
            out.push(InboundMessage::OutputTranscript(transcription.text));
        }
        if content.turn_complete == Some(true) {
            out.push(InboundMessage::TurnComplete);
        }
    }

    if let Some(tool_call) = message.tool_call {
        let calls = tool_call
            .function_calls
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.name,
                args: call.args,
            })
            .collect();
        out.push(InboundMessage::ToolCalls(calls));
    }
    if let Some(cancellation) = message.tool_call_cancellation {
        out.push(InboundMessage::ToolCallCancelled(cancellation.ids));
    }
    if let Some(go_away) = message.go_away {
        out.push(InboundMessage::GoAway(go_away.time_left));
    }

    if out.is_empty() {
        match kind {
            "usageMetadata" | "setupComplete" | "serverContent" => {
                tracing::trace!("Nothing to act on in {} message", kind)
            }
            _ => tracing::warn!("Ignoring unrecognized server message"),
        }
    }
    out
}
