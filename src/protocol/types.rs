//! Identifiers and wire message types.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ProtocolError, ProtocolResult};

/// Number of random bytes in a server-assigned member id.
const MEMBER_ID_BYTES: usize = 16;

/// Opaque circle identifier.
///
/// Circle ids come from the join-token source (invite link, face scan).
/// They are treated as pre-validated and never inspected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircleId(String);

impl CircleId {
    /// Creates a circle id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CircleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of one connected member.
///
/// Member ids are totally ordered. The order decides which side of a pair
/// sends the offer: the lower id always offers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Creates a member id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random member id (32 hex characters).
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; MEMBER_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this member must send the offer to `remote`.
    #[must_use]
    pub fn offers_to(&self, remote: &Self) -> bool {
        self < remote
    }

    /// Short form for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Frames sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join a circle, creating it if unseen.
    JoinCircle { circle_id: CircleId },
    /// Leave a circle without disconnecting.
    LeaveCircle { circle_id: CircleId },
    /// Session offer addressed to one member.
    Offer {
        target: MemberId,
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        circle_id: Option<CircleId>,
    },
    /// Session answer addressed to one member.
    Answer {
        target: MemberId,
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        circle_id: Option<CircleId>,
    },
    /// Network candidate addressed to one member.
    IceCandidate {
        target: MemberId,
        candidate: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        circle_id: Option<CircleId>,
    },
    /// Publish the latest shared-state payload.
    ShareState { circle_id: CircleId, payload: Value },
    /// Withdraw the shared-state payload.
    StopSharing { circle_id: CircleId },
}

impl ClientMessage {
    /// Returns the wire tag of this message.
    #[must_use]
    pub const fn msg_type(&self) -> &'static str {
        match self {
            Self::JoinCircle { .. } => "join_circle",
            Self::LeaveCircle { .. } => "leave_circle",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice_candidate",
            Self::ShareState { .. } => "share_state",
            Self::StopSharing { .. } => "stop_sharing",
        }
    }

    /// Decodes a client frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if the frame is not a known message.
    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    /// Encodes this message as a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl From<NegotiationMessage> for ClientMessage {
    fn from(msg: NegotiationMessage) -> Self {
        let NegotiationMessage {
            circle_id,
            target,
            body,
            ..
        } = msg;
        match body {
            Negotiation::Offer { sdp } => Self::Offer {
                target,
                sdp,
                circle_id,
            },
            Negotiation::Answer { sdp } => Self::Answer {
                target,
                sdp,
                circle_id,
            },
            Negotiation::IceCandidate { candidate } => Self::IceCandidate {
                target,
                candidate,
                circle_id,
            },
        }
    }
}

/// Frames sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection: the id assigned to this client.
    Welcome { member_id: MemberId },
    /// Members already present when the recipient joined (recipient excluded).
    Roster {
        circle_id: CircleId,
        members: Vec<MemberId>,
    },
    /// Another member joined a circle the recipient is in.
    MemberJoined {
        circle_id: CircleId,
        member_id: MemberId,
    },
    /// Another member left a circle the recipient is in.
    MemberLeft {
        circle_id: CircleId,
        member_id: MemberId,
    },
    /// Relayed session offer.
    Offer {
        circle_id: CircleId,
        from: MemberId,
        sdp: String,
    },
    /// Relayed session answer.
    Answer {
        circle_id: CircleId,
        from: MemberId,
        sdp: String,
    },
    /// Relayed network candidate.
    IceCandidate {
        circle_id: CircleId,
        from: MemberId,
        candidate: Value,
    },
    /// A member published shared state.
    StateShared {
        circle_id: CircleId,
        member_id: MemberId,
        payload: Value,
        shared_at: DateTime<Utc>,
    },
    /// A member's shared state was withdrawn.
    StateStopped {
        circle_id: CircleId,
        member_id: MemberId,
    },
    /// A client frame could not be processed.
    Error { message: String },
}

impl ServerMessage {
    /// Returns the wire tag of this message.
    #[must_use]
    pub const fn msg_type(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Roster { .. } => "roster",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice_candidate",
            Self::StateShared { .. } => "state_shared",
            Self::StateStopped { .. } => "state_stopped",
            Self::Error { .. } => "error",
        }
    }

    /// Decodes a server frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if the frame is not a known message.
    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    /// Encodes this message as a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Body of an addressed negotiation message.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    /// Session offer.
    Offer { sdp: String },
    /// Session answer.
    Answer { sdp: String },
    /// Network candidate.
    IceCandidate { candidate: Value },
}

impl Negotiation {
    /// Returns the wire tag shared by the client and server forms.
    #[must_use]
    pub const fn msg_type(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice_candidate",
        }
    }
}

/// An offer, answer or candidate travelling from `source` to `target`.
///
/// The relay routes on `target` alone; `body` is forwarded untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationMessage {
    /// Circle the pair shares, if the sender named one.
    pub circle_id: Option<CircleId>,
    /// Sending member, stamped by the server.
    pub source: MemberId,
    /// Addressed member.
    pub target: MemberId,
    /// Opaque protocol payload.
    pub body: Negotiation,
}

impl NegotiationMessage {
    /// Creates a negotiation message.
    #[must_use]
    pub const fn new(source: MemberId, target: MemberId, body: Negotiation) -> Self {
        Self {
            circle_id: None,
            source,
            target,
            body,
        }
    }

    /// Pins the message to a circle.
    #[must_use]
    pub fn in_circle(mut self, circle_id: CircleId) -> Self {
        self.circle_id = Some(circle_id);
        self
    }

    /// Extracts a negotiation message from a client frame.
    ///
    /// Returns `None` for frames that are not offers, answers or candidates.
    #[must_use]
    pub fn from_client(source: MemberId, msg: ClientMessage) -> Option<Self> {
        let (target, body, circle_id) = match msg {
            ClientMessage::Offer {
                target,
                sdp,
                circle_id,
            } => (target, Negotiation::Offer { sdp }, circle_id),
            ClientMessage::Answer {
                target,
                sdp,
                circle_id,
            } => (target, Negotiation::Answer { sdp }, circle_id),
            ClientMessage::IceCandidate {
                target,
                candidate,
                circle_id,
            } => (target, Negotiation::IceCandidate { candidate }, circle_id),
            _ => return None,
        };
        Some(Self {
            circle_id,
            source,
            target,
            body,
        })
    }

    /// Builds the frame delivered to the target.
    #[must_use]
    pub fn into_delivery(self, circle_id: CircleId) -> ServerMessage {
        let from = self.source;
        match self.body {
            Negotiation::Offer { sdp } => ServerMessage::Offer {
                circle_id,
                from,
                sdp,
            },
            Negotiation::Answer { sdp } => ServerMessage::Answer {
                circle_id,
                from,
                sdp,
            },
            Negotiation::IceCandidate { candidate } => ServerMessage::IceCandidate {
                circle_id,
                from,
                candidate,
            },
        }
    }
}
