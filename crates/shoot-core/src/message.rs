//! Greeting message wire types.
//!
//! Requests and responses share one payload shape: the sender's instance
//! identifier as raw UTF-8, with no framing beyond what the transport gives.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GreetingRequest,
    GreetingResponse,
}

impl MessageKind {
    pub const GREETING_REQUEST: u8 = 1;
    pub const GREETING_RESPONSE: u8 = 2;

    pub fn id(self) -> u8 {
        match self {
            MessageKind::GreetingRequest => Self::GREETING_REQUEST,
            MessageKind::GreetingResponse => Self::GREETING_RESPONSE,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = MessageError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            Self::GREETING_REQUEST => Ok(MessageKind::GreetingRequest),
            Self::GREETING_RESPONSE => Ok(MessageKind::GreetingResponse),
            other => Err(MessageError::UnknownKind(other)),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageError {
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("payload is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingMessage {
    pub user_name: String,
}

impl GreetingMessage {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self { user_name: user_name.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.user_name.as_bytes().to_vec()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, MessageError> {
        let user_name = std::str::from_utf8(buf).map_err(|_| MessageError::InvalidUtf8)?;
        Ok(Self::new(user_name))
    }
}

/// Decode a raw overlay message into its kind and greeting payload.
pub fn decode(kind_id: u8, payload: &[u8]) -> Result<(MessageKind, GreetingMessage), MessageError> {
    let kind = MessageKind::try_from(kind_id)?;
    let message = GreetingMessage::from_bytes(payload)?;
    Ok((kind, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_plain_utf8() {
        let msg = GreetingMessage::new("bob@laptop");
        assert_eq!(msg.to_bytes(), b"bob@laptop".to_vec());
        assert_eq!(GreetingMessage::from_bytes(&msg.to_bytes()), Ok(msg));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode(9, b"x"), Err(MessageError::UnknownKind(9)));
        assert_eq!(
            decode(MessageKind::GREETING_REQUEST, &[0xff, 0xfe]),
            Err(MessageError::InvalidUtf8)
        );

        let (kind, msg) = decode(MessageKind::GREETING_RESPONSE, b"").unwrap();
        assert_eq!(kind, MessageKind::GreetingResponse);
        assert_eq!(msg.user_name, "");
    }
}
