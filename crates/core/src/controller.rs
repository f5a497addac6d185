//! The session lifecycle controller.
//!
//! A [`SessionController`] is a cloneable handle to a single actor task that owns
//! every piece of session state. All mutation happens on that task's loop, which
//! multiplexes caller commands, the pending connection attempt, the session's
//! inbound channel and the capture tick.

use crate::audio::{CaptureGuard, INPUT_SAMPLE_RATE, Microphone, Speaker};
use crate::codec::{FrameEncoder, SegmentDecoder};
use crate::error::SessionError;
use crate::log::{LogCategory, SessionLog};
use crate::playback::PlaybackScheduler;
use crate::tools::ToolDispatcher;
use crate::transport::{
    Connection, Connector, InboundMessage, SessionConfig, SessionTransport, ToolCallRequest,
    ToolCallResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior};

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub active_segments: usize,
    /// Where the next inbound segment would start, while a session is open.
    pub next_start: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session: SessionConfig,
    /// How often captured audio is drained, encoded and sent.
    pub capture_interval: Duration,
}

/// Everything the controller drives but does not implement.
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub microphone: Arc<dyn Microphone>,
    pub speaker: Arc<dyn Speaker>,
    pub dispatcher: ToolDispatcher,
}

enum Command {
    Connect(oneshot::Sender<Result<(), SessionError>>),
    Disconnect(oneshot::Sender<()>),
    Status(oneshot::Sender<SessionStatus>),
}

/// Handle to the controller task. The task tears the session down and exits
/// when the last handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    log: SessionLog,
}

impl SessionController {
    /// Spawns the controller task on the current tokio runtime.
    pub fn spawn(config: ControllerConfig, collaborators: Collaborators, log: SessionLog) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let coordinator = Coordinator {
            config,
            connector: collaborators.connector,
            microphone: collaborators.microphone,
            speaker: collaborators.speaker,
            dispatcher: collaborators.dispatcher,
            log: log.clone(),
            state: state_tx,
            attempt: None,
            session: None,
            inbound: None,
            ticker: None,
        };
        tokio::spawn(coordinator.run(commands_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
            log,
        }
    }

    /// Opens a session. Resolves once the remote side has acknowledged it, or
    /// immediately if a session is already open or being opened.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(tx))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Ends the session or pending attempt, if any, and waits until every
    /// resource has been released.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect(tx))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }
}

/// Local and remote resources of an open session.
struct Session {
    transport: SessionTransport,
    capture: CaptureGuard,
    scheduler: PlaybackScheduler,
    encoder: FrameEncoder,
    decoder: SegmentDecoder,
}

/// Resources acquired by a successful connection attempt.
struct Established {
    connection: Connection,
    capture: CaptureGuard,
    scheduler: PlaybackScheduler,
}

struct Attempt {
    handle: JoinHandle<Result<Established, SessionError>>,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

struct Coordinator {
    config: ControllerConfig,
    connector: Arc<dyn Connector>,
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,
    dispatcher: ToolDispatcher,
    log: SessionLog,
    state: watch::Sender<ConnectionState>,
    attempt: Option<Attempt>,
    session: Option<Session>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    ticker: Option<Interval>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                biased;
                result = finished_attempt(&mut self.attempt) => self.on_attempt_finished(result),
                message = next_inbound(&mut self.inbound) => self.on_inbound(message).await,
                _ = next_tick(&mut self.ticker) => self.on_tick().await,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }
        tracing::debug!("all controller handles dropped, shutting down");
        self.cancel_attempt().await;
        self.teardown().await;
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("session state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.begin_connect(reply),
            Command::Disconnect(reply) => {
                if self.cancel_attempt().await {
                    self.log
                        .record(LogCategory::System, "Connection attempt cancelled");
                } else if self.session.is_some() {
                    self.teardown().await;
                    self.log.record(LogCategory::System, "Disconnected");
                }
                let _ = reply.send(());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.current_state(),
            active_segments: self
                .session
                .as_ref()
                .map_or(0, |session| session.scheduler.active_segments()),
            next_start: self
                .session
                .as_ref()
                .map(|session| session.scheduler.next_start_time()),
        }
    }

    fn begin_connect(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if self.current_state() != ConnectionState::Idle {
            tracing::debug!("connect ignored in state {:?}", self.current_state());
            let _ = reply.send(Ok(()));
            return;
        }

        self.set_state(ConnectionState::Connecting);
        tracing::info!("Connecting with voice {}", self.config.session.voice);
        let handle = tokio::spawn(establish(
            self.microphone.clone(),
            self.speaker.clone(),
            self.connector.clone(),
            self.config.session.clone(),
        ));
        self.attempt = Some(Attempt { handle, reply });
    }

    fn on_attempt_finished(&mut self, result: Result<Result<Established, SessionError>, JoinError>) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        let result = result.unwrap_or_else(|e| {
            Err(SessionError::Connect(format!("connection attempt failed: {}", e)))
        });

        match result {
            Ok(established) => {
                let Established {
                    connection,
                    capture,
                    scheduler,
                } = established;
                let mut ticker = tokio::time::interval(self.config.capture_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                let decoder = SegmentDecoder::new(scheduler.sample_rate());
                self.session = Some(Session {
                    transport: SessionTransport::new(connection.link, self.log.clone()),
                    capture,
                    scheduler,
                    encoder: FrameEncoder::new(),
                    decoder,
                });
                self.inbound = Some(connection.inbound);
                self.ticker = Some(ticker);
                self.set_state(ConnectionState::Open);
                self.log.record(LogCategory::System, "Connected");
                let _ = attempt.reply.send(Ok(()));
            }
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                self.log
                    .record(LogCategory::System, format!("Connection failed: {}", e));
                let _ = attempt.reply.send(Err(e));
            }
        }
    }

    /// Aborts a pending attempt and waits for it to unwind. Resources of an
    /// attempt that completed before the abort landed are released here.
    /// Returns false if nothing was pending.
    async fn cancel_attempt(&mut self) -> bool {
        let Some(mut attempt) = self.attempt.take() else {
            return false;
        };
        attempt.handle.abort();
        if let Ok(Ok(established)) = (&mut attempt.handle).await {
            let Established {
                mut connection,
                mut capture,
                mut scheduler,
            } = established;
            capture.release();
            connection.link.close().await;
            scheduler.release();
        }
        let _ = attempt.reply.send(Err(SessionError::Cancelled));
        self.set_state(ConnectionState::Idle);
        true
    }

    /// Releases the open session's resources. Safe to call with no session.
    async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.set_state(ConnectionState::Closing);
        self.inbound = None;
        self.ticker = None;

        session.capture.release();
        session.transport.close().await;
        session.scheduler.release();
        let dropped = session.transport.dropped_frames();
        if dropped > 0 {
            tracing::info!("{} audio frames were not delivered during the session", dropped);
        }
        self.set_state(ConnectionState::Idle);
    }

    async fn on_inbound(&mut self, message: Option<InboundMessage>) {
        let message = message.unwrap_or(InboundMessage::Closed { reason: None });
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match message {
            InboundMessage::AudioDelta(audio) => {
                match session.decoder.decode(&audio) {
                    Ok(segment) if segment.is_empty() => {}
                    Ok(segment) => {
                        session.scheduler.enqueue(segment);
                    }
                    Err(e) => self
                        .log
                        .record(LogCategory::System, format!("Dropped audio segment: {}", e)),
                }
            }
            InboundMessage::Interrupted => {
                session.decoder.reset();
                let stopped = session.scheduler.flush();
                self.log.record(
                    LogCategory::System,
                    format!("Interrupted, stopped {} pending segments", stopped),
                );
            }
            InboundMessage::ToolCalls(calls) => {
                for call in calls {
                    let response = handle_tool_call(&self.dispatcher, &self.log, call);
                    session.transport.send_tool_response(response).await;
                }
            }
            InboundMessage::TurnComplete => {
                match session.decoder.finish() {
                    Ok(tail) if tail.is_empty() => {}
                    Ok(tail) => {
                        session.scheduler.enqueue(tail);
                    }
                    Err(e) => tracing::warn!("Dropping end of turn audio: {}", e),
                }
                let finished = session.scheduler.reap_finished();
                tracing::debug!("turn complete, {} segments finished", finished);
            }
            InboundMessage::InputTranscript(text) => {
                if !text.trim().is_empty() {
                    self.log.record(LogCategory::User, text);
                }
            }
            InboundMessage::OutputTranscript(text) => {
                if !text.trim().is_empty() {
                    self.log.record(LogCategory::Model, text);
                }
            }
            InboundMessage::ToolCallCancelled(ids) => {
                self.log.record(
                    LogCategory::Tool,
                    format!("Cancelled tool calls: {}", ids.join(", ")),
                );
            }
            InboundMessage::GoAway(time_left) => {
                self.log.record(
                    LogCategory::System,
                    format!(
                        "Server will close the session in {}",
                        time_left.as_deref().unwrap_or("an unknown time")
                    ),
                );
            }
            InboundMessage::Closed { reason } => {
                self.teardown().await;
                self.log.record(
                    LogCategory::System,
                    format!(
                        "Session closed by server: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    ),
                );
            }
            InboundMessage::Error(e) => {
                self.teardown().await;
                self.log
                    .record(LogCategory::System, format!("Transport error: {}", e));
            }
        }
    }

    async fn on_tick(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.scheduler.reap_finished();

        let samples = session.capture.take_samples();
        if samples.is_empty() {
            return;
        }
        let source_rate = session.capture.sample_rate().unwrap_or(INPUT_SAMPLE_RATE);
        match session.encoder.encode(&samples, source_rate) {
            Ok(frame) if frame.is_empty() => {}
            Ok(frame) => session.transport.send_audio(frame).await,
            Err(e) => tracing::warn!("Dropping captured audio: {}", e),
        }
    }
}

/// Runs one tool call. The state change is applied before the response exists.
fn handle_tool_call(
    dispatcher: &ToolDispatcher,
    log: &SessionLog,
    call: ToolCallRequest,
) -> ToolCallResponse {
    log.record(
        LogCategory::Tool,
        format!("{}({})", call.name, serde_json::Value::Object(call.args.clone())),
    );
    let outcome = dispatcher.dispatch(&call.name, &call.args);
    log.record(LogCategory::Tool, outcome.text());
    ToolCallResponse {
        id: call.id,
        name: call.name,
        outcome,
    }
}

/// Acquires the microphone, then the speaker, then the remote session. Anything
/// acquired before a failure, or before the task is aborted, is released on drop.
async fn establish(
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
) -> Result<Established, SessionError> {
    let capture = CaptureGuard::new(microphone.open().await?);
    let scheduler = PlaybackScheduler::new(speaker.open().await?);
    let connection = connector.connect(config).await?;
    Ok(Established {
        connection,
        capture,
        scheduler,
    })
}

async fn finished_attempt(
    attempt: &mut Option<Attempt>,
) -> Result<Result<Established, SessionError>, JoinError> {
    match attempt {
        Some(attempt) => (&mut attempt.handle).await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::Receiver<InboundMessage>>) -> Option<InboundMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
