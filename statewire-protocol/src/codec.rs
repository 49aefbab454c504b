//! Datagram encoding and decoding.

use crate::error::ProtocolError;
use crate::message::{InboundMessage, OutboundMessage};

/// Encodes messages into datagram payloads.
pub struct Encoder;

impl Encoder {
    /// Encodes a status message.
    pub fn encode_outbound(message: &OutboundMessage) -> Vec<u8> {
        message.to_string().into_bytes()
    }

    /// Encodes an observer message.
    pub fn encode_inbound(message: &InboundMessage) -> Vec<u8> {
        message.to_string().into_bytes()
    }
}

/// Decodes datagram payloads into messages.
pub struct Decoder;

impl Decoder {
    /// Decodes an observer datagram.
    pub fn decode_inbound(datagram: &[u8]) -> Result<InboundMessage, ProtocolError> {
        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::InvalidUtf8)?;
        InboundMessage::parse(text)
    }

    /// Decodes a status datagram.
    pub fn decode_outbound(datagram: &[u8]) -> Result<OutboundMessage, ProtocolError> {
        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::InvalidUtf8)?;
        OutboundMessage::parse(text)
    }
}
