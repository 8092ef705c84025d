//! Protocol message definitions
//!
//! Every frame is a JSON object carrying an `event` discriminator with the
//! payload fields flattened beside it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────

/// Messages sent by an observer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMessage {
    /// Keep-alive; answered with `HeartbeatAck`
    #[serde(rename = "observer:heartbeat")]
    Heartbeat,
}

// ─────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────

/// Messages sent by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// Sent once, right after the session is counted
    #[serde(rename = "observer:welcome")]
    Welcome { ordinal: u64, count: u64 },

    /// Coalesced presence update
    #[serde(rename = "observer:update")]
    Update { count: u64, threshold: u64 },

    #[serde(rename = "observer:heartbeat-response")]
    HeartbeatAck,
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Heartbeat => "observer:heartbeat",
        }
    }
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "observer:welcome",
            ServerMessage::Update { .. } => "observer:update",
            ServerMessage::HeartbeatAck => "observer:heartbeat-response",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────

/// Serialize a message into a text frame payload
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|e| Error::Protocol(e.to_string()))
}

/// Decode a text or binary frame payload
pub fn decode<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::ProtocolMalformed {
        message: e.to_string(),
    })
}

/// Parse a non-negative observer count or pool size from user input
pub fn parse_count(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_target(input, "a number is required"));
    }
    if let Some(rest) = trimmed.strip_prefix('-') {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::invalid_target(input, "must not be negative"));
        }
    }

    trimmed
        .parse::<u64>()
        .map_err(|_| Error::invalid_target(input, "not a whole number"))
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_wire_format() {
        let json = encode(&ClientMessage::Heartbeat).unwrap();
        assert_eq!(json, r#"{"event":"observer:heartbeat"}"#);
    }

    #[test]
    fn test_welcome_wire_format() {
        let json = encode(&ServerMessage::Welcome { ordinal: 7, count: 7 }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "observer:welcome");
        assert_eq!(value["ordinal"], 7);
        assert_eq!(value["count"], 7);
    }

    #[test]
    fn test_decode_update() {
        let msg: ServerMessage =
            decode(br#"{"event":"observer:update","count":12,"threshold":10}"#).unwrap();
        assert_eq!(msg, ServerMessage::Update { count: 12, threshold: 10 });
        assert_eq!(msg.event_name(), "observer:update");
    }

    #[test]
    fn test_decode_heartbeat_ack_without_payload() {
        let msg: ServerMessage = decode(br#"{"event":"observer:heartbeat-response"}"#).unwrap();
        assert_eq!(msg, ServerMessage::HeartbeatAck);
    }

    #[test]
    fn test_unknown_event_is_malformed() {
        let err = decode::<ClientMessage>(br#"{"event":"observer:dance"}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolMalformed { .. }));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("0").unwrap(), 0);
        assert_eq!(parse_count(" 250 ").unwrap(), 250);

        for bad in ["", "-1", "12abc", "1.5", "many", "-"] {
            let err = parse_count(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidTarget { .. }), "accepted {:?}", bad);
        }
        let err = parse_count("-7").unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = decode::<ServerMessage>(b"not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolMalformed { .. }));

        let err = decode::<ServerMessage>(br#"{"event":"observer:update","count":"many"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolMalformed { .. }));
    }
}
