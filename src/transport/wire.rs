//! Broker-agnostic wire envelope.
//!
//! A [`WireMessage`] is what a broker-backed transport actually puts on the
//! wire: the routing key (channel), the headers, a content type and an encoded
//! body. Payloads round-trip: JSON strings travel as `text/plain`, every other
//! JSON value as `application/json`.
//!
//! Two framings are provided for transports that need the whole envelope as a
//! single blob: a compact binary frame (bitcode) and a JSON text frame with a
//! base64 body for text-only brokers.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::TransportError;
use super::message::Headers;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_BYTES: &str = "application/octet-stream";

/// How a transport carries messages between publish and delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Hand the payload over as-is (in-process only).
    #[default]
    Native,
    /// Encode the envelope as a bitcode binary frame.
    Binary,
    /// Encode the envelope as JSON text with a base64 body.
    Text,
}

impl WireFormat {
    /// Send a message through this framing and back, as a broker would.
    pub fn carry(self, message: WireMessage) -> Result<WireMessage, TransportError> {
        match self {
            WireFormat::Native => Ok(message),
            WireFormat::Binary => WireMessage::from_frame(&message.to_frame()?),
            WireFormat::Text => WireMessage::from_text(&message.to_text()?),
        }
    }
}

/// A message as it travels through a broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub routing_key: String,
    pub headers: Headers,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct TextFrame {
    routing_key: String,
    headers: Headers,
    content_type: String,
    body: String,
}

impl WireMessage {
    /// Encode a payload for the given channel.
    pub fn encode(
        channel: impl Into<String>,
        payload: &Value,
        headers: &Headers,
    ) -> Result<Self, TransportError> {
        let (content_type, body) = match payload {
            Value::String(text) => (CONTENT_TYPE_TEXT, text.as_bytes().to_vec()),
            other => (CONTENT_TYPE_JSON, serde_json::to_vec(other)?),
        };
        Ok(Self {
            routing_key: channel.into(),
            headers: headers.clone(),
            content_type: content_type.to_string(),
            body,
        })
    }

    /// Decode the body back into a payload according to its content type.
    pub fn decode_payload(&self) -> Result<Value, TransportError> {
        match self.mime_type() {
            CONTENT_TYPE_JSON => Ok(serde_json::from_slice(&self.body)?),
            CONTENT_TYPE_TEXT => String::from_utf8(self.body.clone())
                .map(Value::String)
                .map_err(|e| TransportError::Codec(e.to_string())),
            CONTENT_TYPE_BYTES => Ok(Value::Array(
                self.body.iter().map(|byte| Value::from(*byte)).collect(),
            )),
            other => Err(TransportError::Codec(format!(
                "unsupported content type: {}",
                other
            ))),
        }
    }

    /// Binary frame (bitcode).
    pub fn to_frame(&self) -> Result<Vec<u8>, TransportError> {
        Ok(bitcode::serialize(self)?)
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, TransportError> {
        Ok(bitcode::deserialize(frame)?)
    }

    /// Text frame: JSON with the body base64-encoded.
    pub fn to_text(&self) -> Result<String, TransportError> {
        let frame = TextFrame {
            routing_key: self.routing_key.clone(),
            headers: self.headers.clone(),
            content_type: self.content_type.clone(),
            body: STANDARD.encode(&self.body),
        };
        Ok(serde_json::to_string(&frame)?)
    }

    pub fn from_text(text: &str) -> Result<Self, TransportError> {
        let frame: TextFrame = serde_json::from_str(text)?;
        Ok(Self {
            routing_key: frame.routing_key,
            headers: frame.headers,
            content_type: frame.content_type,
            body: STANDARD.decode(frame.body.as_bytes())?,
        })
    }

    // Content type without parameters such as `; charset=utf-8`.
    fn mime_type(&self) -> &str {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
    }
}
