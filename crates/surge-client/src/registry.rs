//! Channel registry.
//!
//! Owns all live channels for one connection, routes inbound envelopes to
//! the matching channel, and rebuilds subscribe envelopes after a
//! reconnect. Channels are independent: no operation here coordinates
//! across them.

use std::sync::Arc;

use dashmap::DashMap;
use surge_protocol::ProtocolError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelClass, ChannelError, ChannelState};
use crate::dispatch::Dispatcher;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Channel construction or validation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Envelope encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Not subscribed to the channel.
    #[error("Not subscribed to channel: {0}")]
    NotSubscribed(String),

    /// Maximum channel count reached.
    #[error("Maximum channel count reached")]
    MaxChannels,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of concurrently subscribed channels.
    pub max_channels: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
        }
    }
}

/// The set of channels owned by one client connection.
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<Channel>>,
    dispatcher: Arc<dyn Dispatcher>,
    config: RegistryConfig,
}

impl ChannelRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_config(dispatcher, RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(dispatcher: Arc<dyn Dispatcher>, config: RegistryConfig) -> Self {
        Self {
            channels: DashMap::new(),
            dispatcher,
            config,
        }
    }

    /// Subscribe to a standard-class channel.
    ///
    /// Creates the channel if needed (reusing it, with its listeners and
    /// continuity token, if already present), builds the subscribe
    /// envelope, and marks the channel as sent. The returned envelope is
    /// handed to the transport verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the channel limit is
    /// reached, or encoding fails.
    pub fn subscribe(&self, name: &str) -> Result<(Arc<Channel>, String), RegistryError> {
        self.subscribe_with_class(name, ChannelClass::Standard)
    }

    /// Subscribe to a channel of a specific class.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ChannelRegistry::subscribe`].
    pub fn subscribe_with_class(
        &self,
        name: &str,
        class: ChannelClass,
    ) -> Result<(Arc<Channel>, String), RegistryError> {
        let channel = match self.channels.get(name) {
            Some(existing) => Arc::clone(&existing),
            None => {
                if self.channels.len() >= self.config.max_channels {
                    return Err(RegistryError::MaxChannels);
                }
                let created = Arc::new(Channel::with_class(
                    name,
                    class,
                    Arc::clone(&self.dispatcher),
                )?);
                // Two racing subscribes keep whichever channel landed first.
                Arc::clone(
                    self.channels
                        .entry(name.to_string())
                        .or_insert(created)
                        .value(),
                )
            }
        };

        let envelope = channel.subscribe_envelope()?;
        channel.mark_subscribe_sent();
        debug!(channel = %name, "Subscribing");

        Ok((channel, envelope))
    }

    /// Unsubscribe from a channel.
    ///
    /// The channel enters its terminal state, is removed from the
    /// registry, and its unsubscribe envelope is returned for the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns `NotSubscribed` for an unknown channel, or an encoding
    /// error.
    pub fn unsubscribe(&self, name: &str) -> Result<String, RegistryError> {
        let (_, channel) = self
            .channels
            .remove(name)
            .ok_or_else(|| RegistryError::NotSubscribed(name.to_string()))?;

        let envelope = channel.unsubscribe_envelope()?;
        debug!(channel = %name, "Unsubscribed");
        Ok(envelope)
    }

    /// Route an inbound envelope to the matching channel.
    ///
    /// Messages for unknown channels (e.g. arriving after an unsubscribe)
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope is malformed.
    pub fn deliver(&self, channel_name: &str, event: &str, raw: &str) -> Result<(), ProtocolError> {
        match self.channels.get(channel_name) {
            Some(channel) => channel.handle_message(event, raw),
            None => {
                warn!(channel = %channel_name, event, "Message for unknown channel dropped");
                Ok(())
            }
        }
    }

    /// Rebuild subscribe envelopes for every live channel after a
    /// reconnect.
    ///
    /// Envelopes carry each channel's surviving continuity token, so
    /// delivery resumes where it left off.
    #[must_use]
    pub fn resubscribe_all(&self) -> Vec<String> {
        let mut envelopes = Vec::new();

        for entry in self.channels.iter() {
            let channel = entry.value();
            if channel.state() == ChannelState::Unsubscribed {
                continue;
            }
            match channel.subscribe_envelope() {
                Ok(text) => {
                    channel.mark_subscribe_sent();
                    envelopes.push(text);
                }
                Err(error) => {
                    warn!(channel = %channel.name(), %error, "Skipping resubscribe");
                }
            }
        }

        envelopes
    }

    /// Look up a channel by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Number of channels in the registry.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
