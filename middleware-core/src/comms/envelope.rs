//! The control-plane message envelope.
//!
//! Every message on the bus is a `MessageKind` tag, an optional reply-to
//! routing key and a JSON payload. The reply-to key points at the sender's
//! own inbound queue for the response kind; there is no blocking wait
//! anywhere in the protocol.

use middleware_api::model::MessageKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Routing key the receiver should publish any response to.
    pub reply_to: Option<String>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: MessageKind, reply_to: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            reply_to,
            payload,
        }
    }

    /// Serializes the envelope for the wire.
    pub fn encode(&self) -> Vec<u8> {
        // Envelope fields are all serializable; this cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parses an envelope from raw frame bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Deserializes the payload into a concrete message type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleware_api::model::HeartbeatPayload;

    #[test]
    fn encode_decode() {
        let payload = HeartbeatPayload {
            app_id: "APP1".into(),
            interval_ms: 2500,
        };
        let env = Envelope::new(
            MessageKind::Heartbeat,
            Some("APP1.client.admin".into()),
            serde_json::to_value(&payload).unwrap(),
        );

        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded.kind, MessageKind::Heartbeat);
        assert_eq!(decoded.reply_to.as_deref(), Some("APP1.client.admin"));
        assert_eq!(decoded.payload_as::<HeartbeatPayload>().unwrap(), payload);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Envelope::decode(b"not json").is_err());
    }
}
