use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::PeerId;

/// One protocol event on the relay channel, serialized as a single JSON
/// object per frame. The relay fills in `from` and strips `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,

    #[serde(flatten)]
    pub body: EnvelopeBody,
}

/// All envelope kinds, keyed by the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeBody {
    /// Relay assigned our identity
    #[serde(rename_all = "camelCase")]
    Welcome { user_id: PeerId },

    /// Friend request carrying the requester's armored public key
    #[serde(alias = "ADD_FRIEND", rename_all = "camelCase")]
    FriendRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },

    /// Our acceptance of a friend request (outbound)
    #[serde(rename_all = "camelCase")]
    AcceptFriend { public_key: String },

    /// The remote side accepted our request
    #[serde(alias = "FRIEND_ACCEPT", rename_all = "camelCase")]
    FriendAccepted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },

    /// Encrypted and signed text message
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Ephemeral typing notification
    Typing,

    /// Start of a chunked file transfer (metadata travels in the clear)
    FileStart {
        name: String,
        size: u64,
        #[serde(default)]
        mime: String,
    },

    /// One slice of the armored file ciphertext
    FileChunk { chunk: String },

    /// Transfer complete
    FileEnd,

    /// Relay-originated error
    Error { message: String },
}

impl Envelope {
    /// Build an outbound envelope addressed to `to`.
    pub fn to(to: &PeerId, body: EnvelopeBody) -> Self {
        Self {
            from: None,
            to: Some(to.clone()),
            body,
        }
    }

    /// Parse one JSON frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Serialize to one JSON frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The sender of a directional inbound envelope.
    pub fn sender(&self) -> Result<&PeerId, ProtocolError> {
        self.from.as_ref().ok_or_else(|| {
            ProtocolError::Violation(format!("{} envelope without `from`", self.kind()))
        })
    }

    /// Wire name of the envelope type, for logging.
    pub fn kind(&self) -> &'static str {
        match self.body {
            EnvelopeBody::Welcome { .. } => "WELCOME",
            EnvelopeBody::FriendRequest { .. } => "FRIEND_REQUEST",
            EnvelopeBody::AcceptFriend { .. } => "ACCEPT_FRIEND",
            EnvelopeBody::FriendAccepted { .. } => "FRIEND_ACCEPTED",
            EnvelopeBody::Message { .. } => "MESSAGE",
            EnvelopeBody::Typing => "TYPING",
            EnvelopeBody::FileStart { .. } => "FILE_START",
            EnvelopeBody::FileChunk { .. } => "FILE_CHUNK",
            EnvelopeBody::FileEnd => "FILE_END",
            EnvelopeBody::Error { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_welcome() {
        let env = Envelope::from_json(r#"{"type":"WELCOME","userId":"AAA111"}"#).unwrap();
        assert_eq!(
            env.body,
            EnvelopeBody::Welcome {
                user_id: PeerId::new("AAA111")
            }
        );
        assert!(env.from.is_none());
    }

    #[test]
    fn test_parse_friend_accept_alias() {
        let env = Envelope::from_json(
            r#"{"type":"FRIEND_ACCEPT","from":"BBB222","publicKey":"-----BEGIN"}"#,
        )
        .unwrap();
        assert_eq!(env.sender().unwrap().as_str(), "BBB222");
        assert!(matches!(
            env.body,
            EnvelopeBody::FriendAccepted { public_key: Some(_) }
        ));
    }

    #[test]
    fn test_friend_request_without_key_still_parses() {
        let env = Envelope::from_json(r#"{"type":"FRIEND_REQUEST","from":"BBB222"}"#).unwrap();
        assert_eq!(env.body, EnvelopeBody::FriendRequest { public_key: None });
    }

    #[test]
    fn test_unknown_type_is_violation() {
        let err = Envelope::from_json(r#"{"type":"SHRUG","from":"X"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Violation(_)));
    }

    #[test]
    fn test_missing_required_field_is_violation() {
        let err = Envelope::from_json(r#"{"type":"FILE_CHUNK","from":"X"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Violation(_)));

        let err = Envelope::from_json("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Violation(_)));
    }

    #[test]
    fn test_file_end_wire_shape() {
        let env = Envelope::to(&PeerId::new("BBB222"), EnvelopeBody::FileEnd);
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "FILE_END", "to": "BBB222" })
        );
    }

    #[test]
    fn test_file_start_wire_shape() {
        let env = Envelope::to(
            &PeerId::new("BBB222"),
            EnvelopeBody::FileStart {
                name: "a.png".into(),
                size: 1000,
                mime: "image/png".into(),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "FILE_START",
                "to": "BBB222",
                "name": "a.png",
                "size": 1000,
                "mime": "image/png"
            })
        );
    }

    #[test]
    fn test_message_without_timestamp() {
        let env =
            Envelope::from_json(r#"{"type":"MESSAGE","from":"A","content":"xyz"}"#).unwrap();
        assert_eq!(
            env.body,
            EnvelopeBody::Message {
                content: "xyz".into(),
                timestamp: None
            }
        );
    }

    #[test]
    fn test_sender_required() {
        let env = Envelope::from_json(r#"{"type":"TYPING"}"#).unwrap();
        assert!(env.sender().is_err());
    }
}
