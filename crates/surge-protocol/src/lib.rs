//! # surge-protocol
//!
//! Wire protocol definitions for the Surge realtime client.
//!
//! This crate defines the JSON text envelopes exchanged with the pub/sub
//! service: the control envelopes a client sends to subscribe and
//! unsubscribe, and the inbound envelopes wrapping application events.
//!
//! ## Envelope shapes
//!
//! - Control: `{"event": "...", "data": {"channel": "...", "resume_after"?: "..."}}`
//! - Application: `{"event": "...", "data": "<opaque>", "id"?: "..."}`
//!
//! ## Example
//!
//! ```rust
//! use surge_protocol::codec;
//!
//! let frame = codec::encode_subscribe("chat:lobby", None).unwrap();
//! let envelope = codec::decode(r#"{"event":"chat:message","data":"hi"}"#).unwrap();
//! assert_eq!(envelope.event, "chat:message");
//! # let _ = frame;
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, decode_resume_after, encode_subscribe, encode_unsubscribe, ProtocolError};
pub use envelope::{
    is_internal_event, Envelope, INTERNAL_EVENT_PREFIX, SUBSCRIPTION_SUCCEEDED,
};
