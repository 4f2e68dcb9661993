//! Wire types for the `/ws` JSON protocol and their terminal rendering

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snapfile_crypto::{decrypt_text, SessionKey};
use std::fmt;

use crate::error::{SnapfileError, SnapfileResult};

/// Message kind, serialized as the integer the server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MsgType {
    Text,
    File,
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> u8 {
        match t {
            MsgType::Text => 0,
            MsgType::File => 1,
        }
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MsgType::Text),
            1 => Ok(MsgType::File),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// A size as sent by the server: raw bytes or an already formatted string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplaySize {
    Bytes(u64),
    Formatted(String),
}

impl fmt::Display for DisplaySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplaySize::Bytes(n) => f.write_str(&format_size(*n)),
            DisplaySize::Formatted(s) => f.write_str(s),
        }
    }
}

/// Decimal size with one fractional digit, matching the server: `1.2MB`.
pub fn format_size(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if num.abs() < 1000.0 {
            return format!("{num:.1}{unit}B");
        }
        num /= 1000.0;
    }
    format!("{num:.1}YiB")
}

/// One entry of the folder's message list, exactly as the server serialises it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MsgType,
    /// Envelope for text messages, file name for file messages
    pub data: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<DisplaySize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_id: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    }))
}

impl Message {
    /// Decrypt (text) or describe (file) this message for display.
    ///
    /// Decryption failures become [`MessageBody::DecryptionFailed`].
    pub fn render(&self, key: &SessionKey) -> RenderedMessage {
        let body = match self.kind {
            MsgType::Text => match decrypt_text(key, &self.data) {
                Ok(text) => MessageBody::Text(text),
                Err(e) => {
                    tracing::warn!(error = %e, sender = ?self.sender, "message failed to decrypt");
                    MessageBody::DecryptionFailed
                }
            },
            MsgType::File => MessageBody::File {
                name: self.data.clone(),
                file_id: self.file_id.clone().unwrap_or_default(),
                size: self.size.as_ref().map(ToString::to_string),
            },
        };
        RenderedMessage {
            body,
            sender: self.sender.clone(),
            date: format_date(&self.date, &Local),
        }
    }
}

/// Render an ISO-8601 timestamp as `M-D HH:MM` in `tz`; unparsable input is
/// returned verbatim.
pub fn format_date<Tz: TimeZone>(raw: &str, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(tz).format("%-m-%-d %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    File {
        name: String,
        file_id: String,
        size: Option<String>,
    },
    DecryptionFailed,
    /// The server sent an entry this client cannot parse
    Malformed,
}

/// A message ready for the terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub body: MessageBody,
    pub sender: Option<String>,
    pub date: String,
}

impl fmt::Display for RenderedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.date)?;
        if let Some(sender) = &self.sender {
            write!(f, " {sender}:")?;
        }
        match &self.body {
            MessageBody::Text(text) => write!(f, " {text}"),
            MessageBody::File {
                name,
                file_id,
                size,
            } => {
                write!(f, " [file #{file_id}] {name}")?;
                if let Some(size) = size {
                    write!(f, " ({size})")?;
                }
                Ok(())
            }
            MessageBody::DecryptionFailed => f.write_str(" <decryption failed>"),
            MessageBody::Malformed => f.write_str(" <unreadable message>"),
        }
    }
}

/// One entry of a `send` batch.
///
/// Entries are parsed one by one so a bad entry cannot take its neighbours
/// down with it. Every entry still counts towards the pull offset.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntry {
    Message(Message),
    Malformed {
        raw: serde_json::Value,
        reason: String,
    },
}

impl BatchEntry {
    pub fn render(&self, key: &SessionKey) -> RenderedMessage {
        match self {
            BatchEntry::Message(msg) => msg.render(key),
            BatchEntry::Malformed { raw, reason } => {
                tracing::warn!(%reason, "malformed message skipped");
                let field = |name: &str| raw.get(name).and_then(|v| v.as_str());
                RenderedMessage {
                    body: MessageBody::Malformed,
                    sender: field("sender").map(str::to_string),
                    date: field("date")
                        .map(|d| format_date(d, &Local))
                        .unwrap_or_default(),
                }
            }
        }
    }
}

impl From<Message> for BatchEntry {
    fn from(msg: Message) -> Self {
        BatchEntry::Message(msg)
    }
}

impl<'de> Deserialize<'de> for BatchEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(match Message::deserialize(&raw) {
            Ok(msg) => BatchEntry::Message(msg),
            Err(e) => BatchEntry::Malformed {
                raw,
                reason: e.to_string(),
            },
        })
    }
}

impl Serialize for BatchEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BatchEntry::Message(msg) => msg.serialize(serializer),
            BatchEntry::Malformed { raw, .. } => raw.serialize(serializer),
        }
    }
}

/// Folder status pushed by the server on connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub expire_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    /// Folder lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<DisplaySize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_size: Option<DisplaySize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_percentage: Option<String>,
    /// Display name the server assigned to this client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl fmt::Display for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expires {}", format_date(&self.expire_at, &Local))?;
        if let (Some(used), Some(limit)) = (&self.current_size, &self.storage_limit) {
            write!(f, ", {used} of {limit} used")?;
        }
        if let Some(pct) = &self.usage_percentage {
            write!(f, " ({pct})")?;
        }
        if let Some(name) = &self.name {
            write!(f, ", connected as {name}")?;
        }
        Ok(())
    }
}

/// Client → server frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    /// Ask for every message from `offset` on
    Pull { offset: u64 },
    /// Post an encrypted text envelope
    Send { data: String },
}

impl ClientAction {
    pub fn to_json(&self) -> SnapfileResult<String> {
        serde_json::to_string(self)
            .map_err(|e| SnapfileError::Protocol(format!("serializing client frame: {e}")))
    }
}

/// Server → client frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerAction {
    Connect { info: ConnectInfo },
    Send { msgs: Vec<BatchEntry> },
}

impl ServerAction {
    pub fn from_json(text: &str) -> SnapfileResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| SnapfileError::Protocol(format!("deserializing server frame: {e}")))
    }
}
