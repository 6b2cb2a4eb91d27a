//! Inbound live-channel messages.
//!
//! Every frame on the channel is a JSON object `{"type": string, "payload": object}`.
//! Decoding is strict about the envelope and lenient about the payload: a missing
//! or `null` payload decodes as an empty object, since some kinds carry no data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::FrameError;

/// Kinds of message the client acts on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Another user invited this user to a challenge.
    NewChallengeInvite,
    /// An invite sent by this user was accepted.
    ChallengeAccepted,
    /// An invite sent by this user was declined.
    ChallengeDeclined,
    /// A pending challenge was cancelled by its sender.
    ChallengeCancelled,
    /// Any kind outside the fixed set.
    Other(String),
}

impl MessageKind {
    /// Classify a wire `type` string.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "new_challenge_invite" => Self::NewChallengeInvite,
            "challenge_accepted_notification" => Self::ChallengeAccepted,
            "challenge_declined_notification" => Self::ChallengeDeclined,
            "challenge_cancelled_notification" => Self::ChallengeCancelled,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Wire `type` string for this kind.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::NewChallengeInvite => "new_challenge_invite",
            Self::ChallengeAccepted => "challenge_accepted_notification",
            Self::ChallengeDeclined => "challenge_declined_notification",
            Self::ChallengeCancelled => "challenge_cancelled_notification",
            Self::Other(kind) => kind,
        }
    }
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Wire `type` of the message.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific fields.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl InboundMessage {
    /// Build a message from a kind and an object payload.
    pub fn new(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Classified kind.
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::from_wire(&self.kind)
    }

    /// Look up a string field by path, e.g. `["challenger", "username"]`.
    pub fn payload_str(&self, path: &[&str]) -> Option<&str> {
        let (first, rest) = path.split_first()?;
        let mut value = self.payload.get(*first)?;
        for key in rest {
            value = value.get(key)?;
        }
        value.as_str()
    }

    /// Serialize back into a wire frame.
    pub fn to_frame(&self) -> String {
        // Map<String, Value> always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<InboundMessage, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut envelope) = value else {
        return Err(FrameError::NotAnObject);
    };

    let kind = match envelope.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(FrameError::MissingType),
    };

    let payload = match envelope.remove("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(FrameError::PayloadNotObject { kind }),
    };

    Ok(InboundMessage { kind, payload })
}
