//! Connection lifecycle as a pure state machine.
//!
//! [`SyncMachine::handle`] maps one [`Input`] to zero or more [`Effect`]s and
//! never touches the network or the clock, so every transition is testable
//! without a runtime.

use snapfile_core::types::{BatchEntry, ClientAction, ConnectInfo, ServerAction};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

/// Going away: the folder expired or was deleted
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Abnormal closure: the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Try again later: the server asked the client to back off
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Application close code the server uses for a missing or stale session
pub const CLOSE_UNAUTHORIZED: u16 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    SessionExpired,
    Unauthorized,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::SessionExpired => f.write_str("folder expired or deleted"),
            FatalReason::Unauthorized => f.write_str("session is not authorized"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    /// Closed with a recoverable code. `retry_in` is `None` once backoff gave up.
    ClosedRecoverable {
        retry_in: Option<Duration>,
    },
    ClosedFatal(FatalReason),
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Disconnected => f.write_str("disconnected"),
            ConnState::Connecting => f.write_str("connecting"),
            ConnState::Connected => f.write_str("connected"),
            ConnState::ClosedRecoverable {
                retry_in: Some(delay),
            } => write!(f, "connection lost, retrying in {:.1}s", delay.as_secs_f64()),
            ConnState::ClosedRecoverable { retry_in: None } => {
                f.write_str("connection lost, not retrying")
            }
            ConnState::ClosedFatal(reason) => write!(f, "closed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    ConnectRequested,
    Opened,
    Frame(ServerAction),
    TransportError,
    Closed { code: u16, reason: String },
    ReconnectDue,
    DisconnectRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    Send(ClientAction),
    ShowSession(ConnectInfo),
    /// Render these in order. The offset has already been advanced.
    Deliver(Vec<BatchEntry>),
    ScheduleReconnect(Duration),
    EndSession(FatalReason),
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    state: ConnState,
    backoff: Backoff,
    offset: u64,
    errors: u32,
    /// A pull has gone out on the current connection
    pulled: bool,
}

impl SyncMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnState::Disconnected,
            backoff,
            offset: 0,
            errors: 0,
            pulled: false,
        }
    }

    pub fn state(&self) -> &ConnState {
        &self.state
    }

    /// Messages delivered so far in this process
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Transport errors since the last successful open
    pub fn errors(&self) -> u32 {
        self.errors
    }

    fn is_live(&self) -> bool {
        matches!(self.state, ConnState::Connecting | ConnState::Connected)
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::ConnectRequested => self.connect(),

            Input::Opened => {
                if self.state != ConnState::Connecting {
                    debug!(state = %self.state, "open outside connecting ignored");
                    return Vec::new();
                }
                self.state = ConnState::Connected;
                self.errors = 0;
                self.pulled = true;
                info!(offset = self.offset, "connected");
                vec![Effect::Send(ClientAction::Pull {
                    offset: self.offset,
                })]
            }

            Input::Frame(frame) => {
                if self.state != ConnState::Connected {
                    debug!(state = %self.state, "frame outside connected ignored");
                    return Vec::new();
                }
                match frame {
                    ServerAction::Connect { info } => {
                        let mut effects = vec![Effect::ShowSession(info)];
                        if !self.pulled {
                            self.pulled = true;
                            effects.push(Effect::Send(ClientAction::Pull {
                                offset: self.offset,
                            }));
                        }
                        effects
                    }
                    ServerAction::Send { msgs } => {
                        self.offset += msgs.len() as u64;
                        vec![Effect::Deliver(msgs)]
                    }
                }
            }

            Input::TransportError => {
                self.errors = self.errors.saturating_add(1);
                debug!(errors = self.errors, "transport error");
                Vec::new()
            }

            Input::Closed { code, reason } => self.closed(code, &reason),

            Input::ReconnectDue => match self.state {
                ConnState::ClosedRecoverable { retry_in: Some(_) } => self.connect(),
                _ => {
                    debug!(state = %self.state, "stale reconnect timer ignored");
                    Vec::new()
                }
            },

            Input::DisconnectRequested => {
                let mut effects = Vec::new();
                if self.is_live() {
                    effects.push(Effect::CloseTransport);
                }
                self.state = ConnState::Disconnected;
                effects
            }
        }
    }

    fn connect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_live() {
            effects.push(Effect::CloseTransport);
        }
        self.state = ConnState::Connecting;
        self.pulled = false;
        effects.push(Effect::OpenTransport);
        effects
    }

    fn closed(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        if !self.is_live() {
            debug!(code, state = %self.state, "close outside a live connection ignored");
            return Vec::new();
        }
        match code {
            CLOSE_ABNORMAL | CLOSE_TRY_AGAIN_LATER => {
                let retry_in = self.backoff.delay(self.errors);
                self.state = ConnState::ClosedRecoverable { retry_in };
                match retry_in {
                    Some(delay) => {
                        info!(code, reason, errors = self.errors, ?delay, "connection lost, reconnecting");
                        vec![Effect::ScheduleReconnect(delay)]
                    }
                    None => {
                        warn!(code, reason, errors = self.errors, "connection lost, backoff exhausted");
                        Vec::new()
                    }
                }
            }
            CLOSE_GOING_AWAY => self.fatal(FatalReason::SessionExpired, code, reason),
            CLOSE_UNAUTHORIZED => self.fatal(FatalReason::Unauthorized, code, reason),
            _ => {
                info!(code, reason, "connection closed");
                self.state = ConnState::Disconnected;
                Vec::new()
            }
        }
    }

    fn fatal(&mut self, why: FatalReason, code: u16, reason: &str) -> Vec<Effect> {
        warn!(code, reason, %why, "session ended by server");
        self.state = ConnState::ClosedFatal(why);
        vec![Effect::EndSession(why)]
    }
}
