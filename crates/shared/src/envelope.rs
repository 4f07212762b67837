//! Envelope wire protocol
//!
//! Every frame exchanged over a session socket is a typed envelope:
//!
//! ```text
//! { "type": "...", "session_id": "...", "data": { ... }, "timestamp": "<RFC 3339>" }
//! ```
//!
//! Decoding is exhaustive over the known `type` values. Unknown types decode into
//! [`Payload::Unknown`] so newer servers can add event types without breaking
//! older clients; malformed frames produce a [`ProtocolError`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{
    ConnectionStatus, Message, ParticipantRole, SenderType, SessionStatus, DEFAULT_MESSAGE_TYPE,
};

// =============================================================================
// Envelope
// =============================================================================

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub session_id: String,
    pub timestamp: OffsetDateTime,
    pub payload: Payload,
}

/// Type-specific envelope payloads
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Client asks to attach to a session
    JoinSession(JoinSession),
    /// Server acknowledges the join
    JoinedSession(JoinedSession),
    NewMessage(NewMessage),
    TypingIndicator(TypingIndicator),
    SessionUpdate(SessionUpdate),
    UserJoined(UserJoined),
    ConnectionStatusUpdate(ConnectionStatusUpdate),
    /// A type this build does not know about; consumers ignore it
    Unknown { kind: String, data: Value },
}

impl Payload {
    /// Wire name of this payload's `type`
    pub fn kind(&self) -> &str {
        match self {
            Payload::JoinSession(_) => "join_session",
            Payload::JoinedSession(_) => "joined_session",
            Payload::NewMessage(_) => "new_message",
            Payload::TypingIndicator(_) => "typing_indicator",
            Payload::SessionUpdate(_) => "session_update",
            Payload::UserJoined(_) => "user_joined",
            Payload::ConnectionStatusUpdate(_) => "connection_status_update",
            Payload::Unknown { kind, .. } => kind,
        }
    }

    fn to_data(&self) -> ProtocolResult<Value> {
        let data = match self {
            Payload::JoinSession(p) => serde_json::to_value(p),
            Payload::JoinedSession(p) => serde_json::to_value(p),
            Payload::NewMessage(p) => serde_json::to_value(p),
            Payload::TypingIndicator(p) => serde_json::to_value(p),
            Payload::SessionUpdate(p) => serde_json::to_value(p),
            Payload::UserJoined(p) => serde_json::to_value(p),
            Payload::ConnectionStatusUpdate(p) => serde_json::to_value(p),
            Payload::Unknown { data, .. } => Ok(data.clone()),
        };
        data.map_err(ProtocolError::Encode)
    }

    fn from_data(kind: String, data: Value) -> ProtocolResult<Self> {
        let payload = match kind.as_str() {
            "join_session" => Payload::JoinSession(parse_data(&kind, data)?),
            "joined_session" => Payload::JoinedSession(parse_data(&kind, data)?),
            "new_message" => Payload::NewMessage(parse_data(&kind, data)?),
            "typing_indicator" => Payload::TypingIndicator(parse_data(&kind, data)?),
            "session_update" => Payload::SessionUpdate(parse_data(&kind, data)?),
            "user_joined" => Payload::UserJoined(parse_data(&kind, data)?),
            "connection_status_update" => {
                Payload::ConnectionStatusUpdate(parse_data(&kind, data)?)
            }
            _ => Payload::Unknown { kind, data },
        };
        Ok(payload)
    }
}

fn parse_data<T: DeserializeOwned>(kind: &str, data: Value) -> ProtocolResult<T> {
    // Acknowledgements may omit `data` entirely
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

/// Loosely-typed frame used for the first decoding pass
#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    data: Value,
    timestamp: Option<String>,
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(session_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: OffsetDateTime::now_utc(),
            payload,
        }
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Decode a text frame
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

        let kind = raw.kind.ok_or(ProtocolError::MissingField("type"))?;
        let session_id = raw.session_id.ok_or(ProtocolError::MissingField("session_id"))?;
        let timestamp = raw
            .timestamp
            .ok_or(ProtocolError::MissingField("timestamp"))?;
        let timestamp = OffsetDateTime::parse(&timestamp, &Rfc3339)
            .map_err(|e| ProtocolError::InvalidTimestamp(format!("{}: {}", timestamp, e)))?;

        Ok(Self {
            session_id,
            timestamp,
            payload: Payload::from_data(kind, raw.data)?,
        })
    }

    /// Encode as a text frame
    pub fn encode(&self) -> ProtocolResult<String> {
        let timestamp = self
            .timestamp
            .format(&Rfc3339)
            .map_err(|e| ProtocolError::InvalidTimestamp(e.to_string()))?;
        let raw = RawEnvelope {
            kind: Some(self.kind().to_string()),
            session_id: Some(self.session_id.clone()),
            data: self.payload.to_data()?,
            timestamp: Some(timestamp),
        };
        serde_json::to_string(&raw).map_err(ProtocolError::Encode)
    }
}

// =============================================================================
// Payload Data Structures
// =============================================================================

/// `join_session` data: exactly one of the ids is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl JoinSession {
    pub fn for_participant(role: ParticipantRole, participant_id: impl Into<String>) -> Self {
        match role {
            ParticipantRole::Agent => Self {
                agent_id: Some(participant_id.into()),
                customer_id: None,
            },
            ParticipantRole::Customer => Self {
                agent_id: None,
                customer_id: Some(participant_id.into()),
            },
        }
    }

    /// Role and id of the joining participant, agent id taking precedence
    pub fn participant(&self) -> Option<(ParticipantRole, &str)> {
        self.agent_id
            .as_deref()
            .map(|id| (ParticipantRole::Agent, id))
            .or_else(|| {
                self.customer_id
                    .as_deref()
                    .map(|id| (ParticipantRole::Customer, id))
            })
    }
}

/// `joined_session` data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

/// `new_message` data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub message_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub sender_type: SenderType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl NewMessage {
    pub fn into_message(self) -> Message {
        Message {
            id: self.message_id,
            session_id: self.session_id,
            sender_type: self.sender_type,
            sender_id: self.sender_id,
            message: self.message,
            message_type: self
                .message_type
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            created_at: self.timestamp,
        }
    }
}

impl From<&Message> for NewMessage {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            session_id: message.session_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_type: message.sender_type,
            message: message.message.clone(),
            message_type: Some(message.message_type.clone()),
            timestamp: message.created_at,
        }
    }
}

/// `typing_indicator` data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub session_id: String,
    pub sender_type: ParticipantRole,
    pub is_typing: bool,
}

/// `session_update` data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session_id: String,
    pub status: SessionStatus,
}

/// `user_joined` data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJoined {
    pub session_id: String,
    pub user_type: ParticipantRole,
}

/// `connection_status_update` data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusUpdate {
    pub session_id: String,
    pub connection_status: ConnectionStatus,
}
