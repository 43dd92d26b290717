//! # surge-client
//!
//! Client-side channel core for the Surge realtime engine.
//!
//! This crate provides the pieces between a transport and application
//! code:
//!
//! - **Channel** - Per-topic subscription state machine and continuity
//!   token
//! - **ChannelRegistry** - Owns live channels, routes inbound envelopes
//! - **ListenerRegistry** - Event-name to listener-set bindings
//! - **Dispatcher** - Deferred, ordered execution of listener callbacks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│  Registry   │────▶│   Channel   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ┌─────────────┐
//!                                         │ Dispatcher  │──▶ listeners
//!                                         └─────────────┘
//! ```
//!
//! Inbound envelopes are decoded and interpreted on the transport's
//! context; listener callbacks always run on the dispatcher's context, so
//! slow or faulty application code never stalls protocol processing.

pub mod channel;
pub mod dispatch;
pub mod listeners;
pub mod registry;

pub use channel::{Channel, ChannelClass, ChannelError, ChannelState, RESTRICTED_PREFIXES};
pub use dispatch::{Dispatcher, EventQueue, InlineDispatcher, Task};
pub use listeners::{ChannelEventListener, ListenerRegistry, SubscriptionEventListener};
pub use registry::{ChannelRegistry, RegistryConfig, RegistryError};
