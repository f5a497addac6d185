use crate::client::stats::Stats;
use crate::types;
use anyhow::{Context, Result};
use futures_util::{SinkExt, Stream, StreamExt};
use gemini_live_types::client::{FunctionResponse, RealtimeInput, Setup, ToolResponse};
use gemini_live_types::{Blob, ClientMessage, ServerMessage};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;

pub(crate) mod config;
pub(crate) mod consts;
pub(crate) mod stats;
mod utils;

/// Events published to subscribers of a connected client.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A protocol message from the service.
    Message(ServerMessage),
    /// The socket failed mid-session. No further events follow.
    Error(String),
    /// The socket was closed. No further events follow.
    Close { reason: Option<String> },
}

/// Commands for the writer task.
#[derive(Debug)]
enum Outgoing {
    Message(ClientMessage),
    Close,
}

type ClientTx = tokio::sync::mpsc::Sender<Outgoing>;
type ServerTx = tokio::sync::broadcast::Sender<ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<ServerEvent>;

// Contains the capacity for channels, client/server transmitters, configuration,
// and stats guarded by a Mutex.
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
    // Subscribed before the reader task starts so no event is missed.
    first_rx: Option<ServerRx>,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
            first_rx: None,
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    async fn connect(&mut self, setup: Setup) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        tracing::info!("connected to {}", self.config.base_url());

        let (mut write, mut read) = ws_stream.split();

        // The session is only usable once the server acknowledges the setup.
        let text = serde_json::to_string(&ClientMessage::Setup(setup))?;
        write
            .send(Message::Text(text))
            .await
            .context("Failed to send setup message")?;
        wait_for_setup_complete(&mut read).await?;
        tracing::info!("session setup complete");

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<Outgoing>(self.capacity);
        let (s_tx, s_rx) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());
        self.first_rx = Some(s_rx);

        // This task serializes outgoing messages onto the socket.
        tokio::spawn(async move {
            while let Some(outgoing) = c_rx.recv().await {
                match outgoing {
                    Outgoing::Message(message) => match serde_json::to_string(&message) {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("failed to send message: {}", e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize message: {}", e);
                        }
                    },
                    Outgoing::Close => {
                        if let Err(e) = write.send(Message::Close(None)).await {
                            tracing::debug!("failed to send close frame: {}", e);
                        }
                        break;
                    }
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("failed to close socket writer: {}", e);
            }
        });

        let stats = self.stats.clone();
        // This task reads socket frames and broadcasts them as server events.
        tokio::spawn(async move {
            let mut terminal: Option<ServerEvent> = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        terminal = Some(ServerEvent::Error(e.to_string()));
                        break;
                    }
                    Ok(message) => message,
                };

                if let Message::Close(reason) = &message {
                    tracing::info!("connection closed: {:?}", reason);
                    terminal = Some(ServerEvent::Close {
                        reason: reason.as_ref().map(|frame| frame.reason.to_string()),
                    });
                    break;
                }

                let Some(parsed) = parse_frame(&message) else {
                    continue;
                };
                match parsed {
                    Ok(server_message) => {
                        tracing::debug!("received message: {}", server_message.kind());
                        if let Some(usage) = &server_message.usage_metadata {
                            if let Ok(mut stats_guard) = stats.lock() {
                                stats_guard.update_usage(
                                    usage.total_token_count.unwrap_or_default(),
                                    usage.prompt_token_count.unwrap_or_default(),
                                    usage.response_token_count.unwrap_or_default(),
                                );
                            } else {
                                tracing::error!("failed to update stats");
                            }
                        }
                        if let Err(e) = s_tx.send(ServerEvent::Message(server_message)) {
                            tracing::error!("failed to send event: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to deserialize message: {}", e);
                    }
                }
            }

            let terminal = terminal.unwrap_or(ServerEvent::Close { reason: None });
            if let Err(e) = s_tx.send(terminal) {
                tracing::debug!("no subscriber for terminal event: {}", e);
            }
        });
        Ok(())
    }

    /// Get a server receiver that we can use to receive server events.
    ///
    /// The first call returns a receiver that has seen every event since the
    /// session opened; later calls subscribe from the current position.
    pub fn server_events(&mut self) -> Result<ServerRx> {
        if let Some(rx) = self.first_rx.take() {
            return Ok(rx);
        }
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    // Return a stats object that we can use to inspect the stats.
    pub fn stats(&self) -> Result<Stats> {
        if let Ok(stats_guard) = self.stats.lock() {
            Ok(stats_guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }

    pub fn is_open(&self) -> bool {
        self.c_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    async fn send_client_message(&mut self, message: ClientMessage) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(Outgoing::Message(message))
                    .await
                    .map_err(|_| anyhow::anyhow!("connection closed"))?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    /// Streams a chunk of microphone audio.
    pub async fn send_realtime_audio(&mut self, audio: Blob) -> Result<()> {
        self.send_client_message(ClientMessage::RealtimeInput(RealtimeInput::audio(audio)))
            .await
    }

    /// Answers one or more tool calls.
    pub async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send_client_message(ClientMessage::ToolResponse(ToolResponse::new(responses)))
            .await
    }

    /// Closes the socket. Calling it again, or before connecting, does nothing.
    pub async fn close(&mut self) {
        if let Some(tx) = self.c_tx.take() {
            if tx.send(Outgoing::Close).await.is_err() {
                tracing::debug!("writer already stopped");
            }
        }
    }
}

/// Reads frames until the server acknowledges the setup message.
async fn wait_for_setup_complete<S>(read: &mut S) -> Result<()>
where
    S: Stream<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin,
{
    while let Some(message) = read.next().await {
        let message = message.context("Failed to read setup response")?;
        if let Message::Close(reason) = &message {
            return Err(anyhow::anyhow!(
                "connection closed before setup completed: {:?}",
                reason
            ));
        }
        match parse_frame(&message) {
            Some(Ok(server_message)) if server_message.setup_complete.is_some() => {
                return Ok(());
            }
            Some(Ok(server_message)) => {
                tracing::debug!("ignoring {} before setup completed", server_message.kind());
            }
            Some(Err(e)) => {
                tracing::warn!("failed to deserialize setup response: {}", e);
            }
            None => {}
        }
    }
    Err(anyhow::anyhow!("connection ended before setup completed"))
}

/// The service sends JSON in both text and binary frames. Control frames yield `None`.
fn parse_frame(message: &Message) -> Option<serde_json::Result<types::ServerMessage>> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(text)),
        Message::Binary(bin) => Some(serde_json::from_slice(bin)),
        _ => None,
    }
}

// Public function to create a client with specific config and connect to Gemini Live.
pub async fn connect_with_config(
    capacity: usize,
    config: config::Config,
    setup: Setup,
) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect(setup).await?;
    Ok(client)
}

// Public function to connect with default settings.
pub async fn connect() -> Result<Client> {
    let config = config::Config::new();
    let setup = config.setup_builder().build();
    connect_with_config(1024, config, setup).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn text(json: &str) -> tokio_tungstenite::tungstenite::Result<Message> {
        Ok(Message::Text(json.to_string()))
    }

    #[test]
    fn test_parse_frame_accepts_text_and_binary() {
        let json = r#"{ "setupComplete": {} }"#;
        let from_text = parse_frame(&Message::Text(json.to_string()))
            .unwrap()
            .unwrap();
        assert!(from_text.setup_complete.is_some());

        let from_binary = parse_frame(&Message::Binary(json.as_bytes().to_vec()))
            .unwrap()
            .unwrap();
        assert!(from_binary.setup_complete.is_some());

        assert!(parse_frame(&Message::Ping(vec![])).is_none());
    }

    #[tokio::test]
    async fn test_wait_for_setup_complete_skips_other_messages() {
        let mut frames = stream::iter(vec![
            text(r#"{ "usageMetadata": { "totalTokenCount": 3 } }"#),
            text("not json"),
            text(r#"{ "setupComplete": {} }"#),
        ]);

        assert!(wait_for_setup_complete(&mut frames).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_setup_complete_fails_on_close() {
        let mut frames = stream::iter(vec![Ok(Message::Close(None))]);
        assert!(wait_for_setup_complete(&mut frames).await.is_err());

        let mut empty = stream::iter(Vec::<tokio_tungstenite::tungstenite::Result<Message>>::new());
        assert!(wait_for_setup_complete(&mut empty).await.is_err());
    }

    #[tokio::test]
    async fn test_unconnected_client_rejects_sends_and_closes_quietly() {
        let config = config::Config::builder().with_api_key("unused").build();
        let mut client = Client::new(8, config);

        assert!(!client.is_open());
        assert!(client.server_events().is_err());
        assert!(
            client
                .send_realtime_audio(Blob::new("audio/pcm;rate=16000", String::new()))
                .await
                .is_err()
        );
        client.close().await;
        client.close().await;
    }
}
