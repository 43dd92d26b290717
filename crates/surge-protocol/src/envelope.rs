//! Envelope types for the Surge wire protocol.
//!
//! Every wire message is a JSON object wrapping an event name and its
//! payload. Control envelopes carry a nested `{channel, resume_after?}`
//! object; application envelopes carry an opaque `data` string that this
//! crate never inspects.

use serde::{Deserialize, Serialize};

/// Outbound subscribe control event.
pub const SUBSCRIBE_EVENT: &str = "pusher:subscribe";

/// Outbound unsubscribe control event.
pub const UNSUBSCRIBE_EVENT: &str = "pusher:unsubscribe";

/// Inbound event confirming a subscription.
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

/// Prefix reserved for protocol-internal events.
///
/// Application listeners may never bind to events under this prefix.
pub const INTERNAL_EVENT_PREFIX: &str = "pusher_internal:";

/// Check whether an event name is reserved for protocol-internal use.
#[must_use]
pub fn is_internal_event(name: &str) -> bool {
    name.starts_with(INTERNAL_EVENT_PREFIX)
}

/// A decoded inbound envelope.
///
/// `data` is the raw payload string. For application events it is passed
/// through to listeners unparsed; for subscription-success events it is
/// decoded a second time to extract the continuity token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Opaque payload string, if present.
    #[serde(default)]
    pub data: Option<String>,
    /// Server-assigned event ID, if present. Updates the continuity token.
    #[serde(default)]
    pub id: Option<String>,
}

/// An outbound control envelope (subscribe/unsubscribe).
///
/// Field declaration order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlEnvelope<'a> {
    /// Control event name.
    pub event: &'a str,
    /// Control payload.
    pub data: ControlData<'a>,
}

/// Payload of a control envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlData<'a> {
    /// Target channel name.
    pub channel: &'a str,
    /// Continuity token to resume delivery after, if one survived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_after: Option<&'a str>,
}

impl<'a> ControlEnvelope<'a> {
    /// Create a subscribe envelope.
    #[must_use]
    pub fn subscribe(channel: &'a str, resume_after: Option<&'a str>) -> Self {
        Self {
            event: SUBSCRIBE_EVENT,
            data: ControlData {
                channel,
                resume_after,
            },
        }
    }

    /// Create an unsubscribe envelope. Never carries a continuity token.
    #[must_use]
    pub fn unsubscribe(channel: &'a str) -> Self {
        Self {
            event: UNSUBSCRIBE_EVENT,
            data: ControlData {
                channel,
                resume_after: None,
            },
        }
    }
}
