//! Codec for encoding and decoding Surge envelopes.
//!
//! Envelopes are JSON text frames sent verbatim over the transport. The
//! decoder parses the outer object only; application payloads stay opaque,
//! and the nested payload of a subscription-success event is decoded
//! lazily via [`decode_resume_after`].

use thiserror::Error;

use crate::envelope::{ControlEnvelope, Envelope};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Envelope encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed inbound envelope.
    #[error("Malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a subscribe envelope for a channel.
///
/// `resume_after` is included inside `data` only when a token is supplied.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn encode_subscribe(channel: &str, resume_after: Option<&str>) -> Result<String, ProtocolError> {
    let envelope = ControlEnvelope::subscribe(channel, resume_after);
    serde_json::to_string(&envelope).map_err(ProtocolError::Encode)
}

/// Encode an unsubscribe envelope for a channel.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn encode_unsubscribe(channel: &str) -> Result<String, ProtocolError> {
    let envelope = ControlEnvelope::unsubscribe(channel);
    serde_json::to_string(&envelope).map_err(ProtocolError::Encode)
}

/// Decode the outer envelope of an inbound message.
///
/// The `data` field is returned as an opaque string; callers decide
/// whether its contents need a second decode.
///
/// # Errors
///
/// Returns an error if the text is not a valid envelope. The caller
/// decides whether to drop the message or treat the connection as
/// compromised; no recovery is attempted here.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Extract the continuity token from a subscription-success payload.
///
/// The payload is the `data` string of the success envelope. An absent
/// `resume_after` key yields `None`.
///
/// # Errors
///
/// Returns an error if the payload is not a valid JSON object.
pub fn decode_resume_after(data: &str) -> Result<Option<String>, ProtocolError> {
    #[derive(serde::Deserialize)]
    struct SuccessData {
        #[serde(default)]
        resume_after: Option<String>,
    }

    let payload: SuccessData = serde_json::from_str(data).map_err(ProtocolError::Decode)?;
    Ok(payload.resume_after)
}
