//! Transport seam between the sync driver and the network.
//!
//! The driver only sees [`TransportEvent`]s, so tests can script a connection
//! and production uses [`WsConnector`] over tokio-tungstenite.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use snapfile_core::{Session, SnapfileError, SnapfileResult};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::machine::CLOSE_ABNORMAL;

/// Close code reported when the peer sent a close frame without a status
const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// The connection failed. A `Closed` event follows.
    Error(String),
    Closed { code: u16, reason: String },
}

/// An open connection to `/ws`.
pub trait Connection: Send {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SnapfileError::Transport`] if the connection is gone.
    fn send(&mut self, text: String) -> impl Future<Output = SnapfileResult<()>> + Send;

    /// Wait for the next event. After `Closed` the connection is spent.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Close politely. Errors are swallowed: the connection is being dropped anyway.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens connections. Called once per (re)connect attempt.
pub trait Connector: Send {
    type Conn: Connection;

    fn connect(&mut self) -> impl Future<Output = SnapfileResult<Self::Conn>> + Send;
}

/// WebSocket connector for `ws(s)://host/ws`, sending the session cookie.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    cookie: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, cookie: Option<String>) -> Self {
        Self {
            url: url.into(),
            cookie,
        }
    }

    pub fn for_session(session: &Session) -> SnapfileResult<Self> {
        Ok(Self::new(
            session.ws_url()?,
            session.cookie().map(str::to_string),
        ))
    }
}

impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&mut self) -> SnapfileResult<WsConnection> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SnapfileError::Config(format!("websocket URL {}: {e}", self.url)))?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| SnapfileError::Config(format!("session cookie: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        debug!(url = %self.url, "opening websocket");
        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SnapfileError::Transport(format!("connecting {}: {e}", self.url)))?;
        Ok(WsConnection {
            stream,
            failed: false,
        })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
}

impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> SnapfileResult<()> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| SnapfileError::Transport(format!("websocket send: {e}")))
    }

    async fn next_event(&mut self) -> TransportEvent {
        if self.failed {
            return TransportEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: "connection failed".into(),
            };
        }
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return TransportEvent::Text(text.as_str().to_owned()),
                Some(Ok(WsMessage::Close(frame))) => {
                    return match frame {
                        Some(frame) => TransportEvent::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => TransportEvent::Closed {
                            code: CLOSE_NO_STATUS,
                            reason: String::new(),
                        },
                    };
                }
                // tungstenite answers pings itself
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!(len = data.len(), "unexpected binary frame skipped");
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    return TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection dropped".into(),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close");
        }
    }
}
