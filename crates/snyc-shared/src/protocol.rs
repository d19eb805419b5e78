use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_CONTENT_SIZE;
use crate::error::ProtocolError;

/// Messages a collaborator sends over a live note session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Full replacement of the note content (last write wins).
    ContentUpdate { content: String },
}

impl ClientMessage {
    /// Every `type` tag this enum accepts. Keep in sync with the variants.
    pub const KNOWN_TYPES: &'static [&'static str] = &["content_update"];

    /// Parse an inbound text frame.
    ///
    /// Distinguishes unparseable JSON, a missing `type`, and a `type` this
    /// server does not understand.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if !Self::KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        let message: Self =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match &message {
            Self::ContentUpdate { content } if content.len() > MAX_CONTENT_SIZE => {
                Err(ProtocolError::ContentTooLarge {
                    size: content.len(),
                    max: MAX_CONTENT_SIZE,
                })
            }
            _ => Ok(message),
        }
    }
}

/// Messages the server pushes to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Another collaborator replaced the content.
    ContentUpdate { content: String },
    /// Sent only to the session whose action failed.
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Both variants are plain string fields.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_update() {
        let msg = ClientMessage::parse(r#"{"type":"content_update","content":"hello world"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ContentUpdate {
                content: "hello world".into()
            }
        );
    }

    #[test]
    fn test_unknown_type_is_distinct() {
        let err = ClientMessage::parse(r#"{"type":"cursor_move","pos":3}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("cursor_move".into()));
    }

    #[test]
    fn test_missing_type() {
        let err = ClientMessage::parse(r#"{"content":"x"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingType);
    }

    #[test]
    fn test_malformed_json_and_missing_field() {
        assert!(matches!(
            ClientMessage::parse("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"content_update"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_content_rejected() {
        let big = "a".repeat(MAX_CONTENT_SIZE + 1);
        let frame = serde_json::json!({"type": "content_update", "content": big}).to_string();
        assert!(matches!(
            ClientMessage::parse(&frame),
            Err(ProtocolError::ContentTooLarge { .. })
        ));
    }

    #[test]
    fn test_broadcast_shape_matches_inbound() {
        let out = ServerMessage::ContentUpdate {
            content: "hello world".into(),
        };
        let value: Value = serde_json::from_str(&out.to_json()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "content_update", "content": "hello world"})
        );
    }

    #[test]
    fn test_error_frame_shape() {
        let value: Value =
            serde_json::from_str(&ServerMessage::error("Note not found").to_json()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Note not found");
    }
}
