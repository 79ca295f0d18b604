//! Wire format for cross-tab broadcast.
//!
//! ```text
//! ┌──────────┬────────────┬────────────┬──────────┬──────────────────────┐
//! │ msg_type │ sender_tag │ client_id  │ clock    │ payload              │
//! │ 1 byte   │ 16 bytes   │ 16 bytes   │ varint   │ JSON BroadcastMessage│
//! └──────────┴────────────┴────────────┴──────────┴──────────────────────┘
//! ```
//!
//! The envelope is bincode-encoded. The body stays JSON: graph properties
//! are arbitrary JSON values, which bincode cannot decode without a schema.

use pagegraph_core::RemoteUpdate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// A graph change confirmed by the server
    Update = 1,
    /// A session joined the hub
    SessionJoined = 2,
    /// A session left the hub
    SessionLeft = 3,
}

/// Broadcast body: `{ updateVertex | updateEdge | deleteVertex | deleteEdge: …, senderTag }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(flatten)]
    pub update: RemoteUpdate,
    pub sender_tag: Uuid,
}

impl BroadcastMessage {
    pub fn new(update: RemoteUpdate, sender_tag: Uuid) -> Self {
        Self { update, sender_tag }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Top-level frame on the hub channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub sender_tag: Uuid,
    pub client_id: Uuid,
    /// Per-sender sequence number
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap a graph update.
    pub fn update(client_id: Uuid, clock: u64, message: &BroadcastMessage) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::Update,
            sender_tag: message.sender_tag,
            client_id,
            clock,
            payload: message.to_json()?,
        })
    }

    pub fn session_joined(client_id: Uuid, sender_tag: Uuid) -> Self {
        Self {
            msg_type: MessageType::SessionJoined,
            sender_tag,
            client_id,
            clock: 0,
            payload: Vec::new(),
        }
    }

    pub fn session_left(client_id: Uuid, sender_tag: Uuid) -> Self {
        Self {
            msg_type: MessageType::SessionLeft,
            sender_tag,
            client_id,
            clock: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (envelope, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(envelope)
    }

    /// Parse the update body.
    pub fn message(&self) -> Result<BroadcastMessage, ProtocolError> {
        if self.msg_type != MessageType::Update {
            return Err(ProtocolError::InvalidMessageType);
        }
        BroadcastMessage::from_json(&self.payload)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    /// The remote database refused the request outright
    Transport(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
