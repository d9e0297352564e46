//! Message envelopes and their wire representations.
//!
//! Clients send an [`InboundFrame`] naming only the receiver and the payload.
//! The server turns it into an [`Envelope`] by stamping the authenticated
//! sender, a fresh id, and the current time; client-supplied values for those
//! fields never survive decoding. Receivers get an [`OutboundFrame`].

use crate::identity::UserId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Opaque message body.
///
/// Accepted on the wire either as a JSON string or as an array of byte
/// values (what browser clients produce from a `Uint8Array`). Always
/// emitted as a byte array, whatever the content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Bytes(Vec<u8>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Self(text.into_bytes()),
            Repr::Bytes(bytes) => Self(bytes),
        })
    }
}

/// Client -> server frame. Unknown fields (including any `id`, `sender_id`
/// or `created_at` the client sends) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboundFrame {
    pub receiver_id: UserId,
    pub payload: Payload,
}

/// A routed message. Immutable once stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Build an envelope from a decoded client frame, binding it to the
    /// authenticated sender with a server-generated id and timestamp.
    pub fn stamp(frame: InboundFrame, sender_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id: frame.receiver_id,
            payload: frame.payload,
            created_at: Utc::now(),
        }
    }
}

/// Server -> client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub payload: Payload,
    /// RFC 3339, UTC, millisecond precision.
    pub created_at: String,
}

impl From<&Envelope> for OutboundFrame {
    fn from(env: &Envelope) -> Self {
        Self {
            id: env.id,
            sender_id: env.sender_id,
            receiver_id: env.receiver_id,
            payload: env.payload.clone(),
            created_at: env.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
