//! Side-effecting driver around [`SyncMachine`].
//!
//! One task, one input at a time: commands, transport events and the reconnect
//! timer are multiplexed with `select!`, fed to the machine, and the resulting
//! effects are executed in order before the next input is read. Message batches
//! are therefore decrypted and published strictly in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use snapfile_core::types::{ClientAction, ConnectInfo, RenderedMessage, ServerAction};
use snapfile_core::{SnapfileError, SnapfileResult};
use snapfile_crypto::{encrypt_text, SessionKey};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::machine::{ConnState, Effect, FatalReason, Input, SyncMachine, CLOSE_ABNORMAL};
use crate::transport::{Connection, Connector, TransportEvent};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    /// Encrypt and post a text message
    Send(String),
    Reconnect,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    State(ConnState),
    Session(ConnectInfo),
    Message(RenderedMessage),
    SendFailed(String),
    ReauthRequired(FatalReason),
}

/// Why [`SyncClient::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncExit {
    /// The command channel or the event receiver was dropped.
    Shutdown,
    /// The server ended the session; log in again.
    Fatal(FatalReason),
    /// The connector cannot build a request from the current settings.
    /// Retrying would fail the same way.
    Misconfigured(String),
}

/// Caller's end of a running [`SyncClient`].
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    events: mpsc::Receiver<SyncEvent>,
}

impl SyncHandle {
    pub async fn send_text(&self, text: impl Into<String>) -> SnapfileResult<()> {
        self.command(SyncCommand::Send(text.into())).await
    }

    pub async fn command(&self, command: SyncCommand) -> SnapfileResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SnapfileError::NotConnected)
    }

    /// Next event, or `None` once the client has stopped.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Split into the raw channel ends.
    pub fn into_parts(self) -> (mpsc::Sender<SyncCommand>, mpsc::Receiver<SyncEvent>) {
        (self.commands, self.events)
    }
}

pub struct SyncClient<C: Connector> {
    machine: SyncMachine,
    connector: C,
    key: Arc<SessionKey>,
    commands: mpsc::Receiver<SyncCommand>,
    events: mpsc::Sender<SyncEvent>,
    conn: Option<C::Conn>,
    reconnect_at: Option<Instant>,
    exit: Option<SyncExit>,
}

impl<C: Connector> SyncClient<C> {
    pub fn new(connector: C, key: Arc<SessionKey>, backoff: Backoff) -> (Self, SyncHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = Self {
            machine: SyncMachine::new(backoff),
            connector,
            key,
            commands: cmd_rx,
            events: ev_tx,
            conn: None,
            reconnect_at: None,
            exit: None,
        };
        let handle = SyncHandle {
            commands: cmd_tx,
            events: ev_rx,
        };
        (client, handle)
    }

    /// Messages delivered so far
    pub fn offset(&self) -> u64 {
        self.machine.offset()
    }

    /// Connect and keep the message list in sync until the session ends or
    /// the caller goes away.
    pub async fn run(mut self) -> SyncExit {
        self.apply(Input::ConnectRequested).await;

        loop {
            if let Some(exit) = self.exit.take() {
                if let Some(mut conn) = self.conn.take() {
                    conn.close().await;
                }
                info!(?exit, offset = self.machine.offset(), "sync client stopped");
                return exit;
            }

            let input = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.command_input(command).await,
                    None => {
                        self.exit = Some(SyncExit::Shutdown);
                        None
                    }
                },
                event = next_transport_event(&mut self.conn) => self.transport_input(event),
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    Some(Input::ReconnectDue)
                }
            };

            if let Some(input) = input {
                self.apply(input).await;
            }
        }
    }

    async fn command_input(&mut self, command: SyncCommand) -> Option<Input> {
        match command {
            SyncCommand::Send(text) => {
                self.send_text(&text).await;
                None
            }
            SyncCommand::Reconnect => Some(Input::ConnectRequested),
            SyncCommand::Disconnect => {
                self.reconnect_at = None;
                Some(Input::DisconnectRequested)
            }
        }
    }

    fn transport_input(&mut self, event: TransportEvent) -> Option<Input> {
        match event {
            TransportEvent::Text(text) => match ServerAction::from_json(&text) {
                Ok(frame) => Some(Input::Frame(frame)),
                Err(e) => {
                    warn!(error = %e, "malformed server frame skipped");
                    None
                }
            },
            TransportEvent::Error(e) => {
                warn!(error = %e, "websocket error");
                Some(Input::TransportError)
            }
            TransportEvent::Closed { code, reason } => {
                self.conn = None;
                Some(Input::Closed { code, reason })
            }
        }
    }

    async fn send_text(&mut self, text: &str) {
        if self.machine.state() != &ConnState::Connected {
            self.publish(SyncEvent::SendFailed("not connected".into()))
                .await;
            return;
        }
        let envelope = match encrypt_text(&self.key, text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.publish(SyncEvent::SendFailed(e.to_string())).await;
                return;
            }
        };
        if let Err(e) = self.send_action(ClientAction::Send { data: envelope }).await {
            self.publish(SyncEvent::SendFailed(e.to_string())).await;
        }
    }

    async fn send_action(&mut self, action: ClientAction) -> SnapfileResult<()> {
        let json = action.to_json()?;
        match self.conn.as_mut() {
            Some(conn) => conn.send(json).await,
            None => Err(SnapfileError::NotConnected),
        }
    }

    /// Feed `input` to the machine and carry out every resulting effect,
    /// including inputs those effects generate.
    async fn apply(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);

        while let Some(input) = inputs.pop_front() {
            let before = self.machine.state().clone();
            let effects = self.machine.handle(input);
            if self.machine.state() != &before {
                self.publish(SyncEvent::State(self.machine.state().clone()))
                    .await;
            }

            for effect in effects {
                match effect {
                    Effect::OpenTransport => {
                        self.reconnect_at = None;
                        self.conn = None;
                        match self.connector.connect().await {
                            Ok(conn) => {
                                self.conn = Some(conn);
                                inputs.push_back(Input::Opened);
                            }
                            Err(SnapfileError::Config(reason)) => {
                                error!(%reason, "cannot connect with current settings");
                                inputs.push_back(Input::DisconnectRequested);
                                self.exit = Some(SyncExit::Misconfigured(reason));
                            }
                            Err(e) => {
                                warn!(error = %e, "connect failed");
                                inputs.push_back(Input::TransportError);
                                inputs.push_back(Input::Closed {
                                    code: CLOSE_ABNORMAL,
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                    Effect::CloseTransport => {
                        if let Some(mut conn) = self.conn.take() {
                            conn.close().await;
                        }
                    }
                    Effect::Send(action) => {
                        if let Err(e) = self.send_action(action).await {
                            warn!(error = %e, "pull failed");
                            self.conn = None;
                            inputs.push_back(Input::TransportError);
                            inputs.push_back(Input::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: e.to_string(),
                            });
                        }
                    }
                    Effect::ShowSession(info) => {
                        self.publish(SyncEvent::Session(info)).await;
                    }
                    Effect::Deliver(msgs) => {
                        debug!(count = msgs.len(), offset = self.machine.offset(), "batch received");
                        for msg in &msgs {
                            let rendered = msg.render(&self.key);
                            self.publish(SyncEvent::Message(rendered)).await;
                        }
                    }
                    Effect::ScheduleReconnect(delay) => {
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    Effect::EndSession(reason) => {
                        self.reconnect_at = None;
                        self.publish(SyncEvent::ReauthRequired(reason)).await;
                        self.exit = Some(SyncExit::Fatal(reason));
                    }
                }
            }
        }
    }

    async fn publish(&mut self, event: SyncEvent) {
        if self.events.send(event).await.is_err() && self.exit.is_none() {
            // receiver dropped
            self.exit = Some(SyncExit::Shutdown);
        }
    }
}

async fn next_transport_event<T: Connection>(conn: &mut Option<T>) -> TransportEvent {
    match conn {
        Some(conn) => conn.next_event().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
