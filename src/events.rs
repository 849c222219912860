// ABOUTME: Named events exchanged with browser connections and the per-connection outbound queue
//
// The transport that carries these events is not part of this crate; it only
// has to decode `InboundEvent`s and drain the receiver returned by
// `Connection::channel` in a single writer loop.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    #[serde(rename_all = "camelCase")]
    InitTerminal {
        room_id: String,
        user_id: String,
        session_key: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalInput { session_key: String, data: String },
    #[serde(rename_all = "camelCase")]
    ResizeTerminal {
        room_id: String,
        user_id: String,
        cols: u16,
        rows: u16,
    },
    #[serde(rename_all = "camelCase")]
    RunFile {
        file: FileRef,
        room_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    LeaveTerminal { room_id: String, user_id: String },
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Shell or exec output; lossy UTF-8 on the wire
    TerminalOutput(#[serde(with = "lossy_bytes")] Bytes),
    TerminalError(ErrorPayload),
}

impl OutboundEvent {
    pub fn output(data: impl Into<Bytes>) -> Self {
        Self::TerminalOutput(data.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::TerminalError(ErrorPayload {
            error: message.into(),
        })
    }
}

mod lossy_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        Ok(Bytes::from(String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of one browser connection's outbound queue
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundEvent>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event. Returns false once the connection's writer is gone.
    pub async fn send(&self, event: OutboundEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            debug!(connection = %self.id, "Dropping event for closed connection");
            return false;
        }
        true
    }

    pub async fn output(&self, data: impl Into<Bytes>) -> bool {
        self.send(OutboundEvent::output(data)).await
    }

    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.send(OutboundEvent::error(message)).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
