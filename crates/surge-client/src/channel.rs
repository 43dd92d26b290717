//! Channel subscription state machine.
//!
//! A [`Channel`] owns one named topic on the pub/sub service: its
//! lifecycle state, the continuity token used to resume delivery across
//! reconnects, the listeners bound to its events, and the construction of
//! its outbound control envelopes. Inbound protocol handling runs on the
//! transport's context and never invokes listener code directly; all
//! callbacks are deferred to the injected [`Dispatcher`].

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use surge_protocol::codec;
use surge_protocol::envelope::{is_internal_event, SUBSCRIPTION_SUCCEEDED};
use surge_protocol::ProtocolError;
use thiserror::Error;
use tracing::{debug, trace};

use crate::dispatch::Dispatcher;
use crate::listeners::{ChannelEventListener, ListenerRegistry, SubscriptionEventListener};

/// Name prefixes reserved for the restricted channel class.
pub const RESTRICTED_PREFIXES: [&str; 2] = ["private-", "presence-"];

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel name is empty or violates its class's name policy.
    #[error("Invalid channel name: {0}")]
    InvalidName(String),

    /// The event name is empty or reserved for internal protocol use.
    #[error("Invalid event name: {0}")]
    InvalidEvent(String),

    /// The channel reached its terminal state; resubscribe to use it again.
    #[error("Channel {0} has been unsubscribed")]
    Unsubscribed(String),
}

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Constructed, no subscribe envelope sent yet.
    Initial = 0,
    /// The subscribe envelope was handed to the transport.
    SubscribeSent = 1,
    /// The server confirmed the subscription.
    Subscribed = 2,
    /// Terminal. Entered on explicit unsubscribe and sticky thereafter.
    Unsubscribed = 3,
}

impl ChannelState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ChannelState::Initial,
            1 => ChannelState::SubscribeSent,
            2 => ChannelState::Subscribed,
            _ => ChannelState::Unsubscribed,
        }
    }
}

/// Validation class for channel names.
///
/// `Restricted` covers the channel families that require an authorization
/// step before subscription; that step happens outside this crate, so the
/// class only carries the name policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelClass {
    /// Plain channels. Names must not carry a restricted-class prefix.
    #[default]
    Standard,
    /// Restricted channels. Names must carry a restricted-class prefix.
    Restricted,
}

impl ChannelClass {
    fn validate(self, name: &str) -> Result<(), ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::InvalidName("name is empty".to_string()));
        }

        let restricted = RESTRICTED_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix));

        match self {
            ChannelClass::Standard if restricted => Err(ChannelError::InvalidName(format!(
                "{name} belongs to a restricted channel class"
            ))),
            ChannelClass::Restricted if !restricted => Err(ChannelError::InvalidName(format!(
                "{name} lacks a restricted channel class prefix"
            ))),
            _ => Ok(()),
        }
    }
}

/// A subscription to one named channel.
pub struct Channel {
    name: String,
    class: ChannelClass,
    state: AtomicU8,
    resume_after: Mutex<Option<String>>,
    listeners: ListenerRegistry,
    lifecycle: Mutex<Option<Arc<dyn ChannelEventListener>>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Channel {
    /// Create a standard-class channel.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name is empty or carries a
    /// restricted-class prefix.
    pub fn new(
        name: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ChannelError> {
        Self::with_class(name, ChannelClass::Standard, dispatcher)
    }

    /// Create a channel of a specific class.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name violates the class's name policy.
    pub fn with_class(
        name: impl Into<String>,
        class: ChannelClass,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ChannelError> {
        let name = name.into();
        class.validate(&name)?;

        Ok(Self {
            name,
            class,
            state: AtomicU8::new(ChannelState::Initial as u8),
            resume_after: Mutex::new(None),
            listeners: ListenerRegistry::new(),
            lifecycle: Mutex::new(None),
            dispatcher,
        })
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the channel class.
    #[must_use]
    pub fn class(&self) -> ChannelClass {
        self.class
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Get the continuity token, if one has been observed.
    #[must_use]
    pub fn resume_after(&self) -> Option<String> {
        self.lock_token().clone()
    }

    /// Restore a continuity token that survived a reconnect.
    pub fn set_resume_after(&self, token: impl Into<String>) {
        *self.lock_token() = Some(token.into());
    }

    /// Build the subscribe envelope for this channel.
    ///
    /// Carries the current continuity token when one is present (only on a
    /// resubscribe after a disconnect that left the token intact).
    ///
    /// # Errors
    ///
    /// Returns an error if envelope encoding fails.
    pub fn subscribe_envelope(&self) -> Result<String, ProtocolError> {
        let token = self.lock_token().clone();
        codec::encode_subscribe(&self.name, token.as_deref())
    }

    /// Build the unsubscribe envelope and enter the terminal state.
    ///
    /// Registered listeners are kept so a later resubscribe can reuse
    /// them.
    ///
    /// # Errors
    ///
    /// Returns an error if envelope encoding fails.
    pub fn unsubscribe_envelope(&self) -> Result<String, ProtocolError> {
        let text = codec::encode_unsubscribe(&self.name)?;
        self.set_state(ChannelState::Unsubscribed);
        Ok(text)
    }

    /// Record that the subscribe envelope was handed to the transport.
    ///
    /// Driven by the owning client; this core has no visibility into
    /// transport success. No effect once the channel is unsubscribed.
    pub fn mark_subscribe_sent(&self) {
        let updated = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (ChannelState::from_raw(raw) != ChannelState::Unsubscribed)
                    .then_some(ChannelState::SubscribeSent as u8)
            });
        if updated.is_ok() {
            debug!(channel = %self.name, state = ?ChannelState::SubscribeSent, "Channel state changed");
        }
    }

    /// Bind a listener to an application event.
    ///
    /// Idempotent: binding the same handle twice yields a single
    /// registration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent` for an empty or internal event name, or
    /// `Unsubscribed` once the channel is terminal.
    pub fn bind(
        &self,
        event: &str,
        listener: Arc<dyn SubscriptionEventListener>,
    ) -> Result<(), ChannelError> {
        self.check_bind_args(event)?;
        self.listeners.bind(event, listener);
        Ok(())
    }

    /// Unbind a listener from an application event.
    ///
    /// Unbinding a listener that was never bound is a no-op.
    ///
    /// # Errors
    ///
    /// Same validation as [`Channel::bind`].
    pub fn unbind(
        &self,
        event: &str,
        listener: &Arc<dyn SubscriptionEventListener>,
    ) -> Result<(), ChannelError> {
        self.check_bind_args(event)?;
        self.listeners.unbind(event, listener);
        Ok(())
    }

    /// Set the lifecycle listener. Single slot, last write wins.
    pub fn set_lifecycle_listener(&self, listener: Arc<dyn ChannelEventListener>) {
        *self.lock_lifecycle() = Some(listener);
    }

    /// Get the lifecycle listener, if one is set.
    #[must_use]
    pub fn lifecycle_listener(&self) -> Option<Arc<dyn ChannelEventListener>> {
        self.lock_lifecycle().clone()
    }

    /// Handle an inbound envelope addressed to this channel.
    ///
    /// Runs on the transport's inbound context: fast, non-blocking, and
    /// never invoking listener code directly. Callbacks go through the
    /// dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope (or, for a subscription-success
    /// event, its nested payload) is malformed. The caller decides whether
    /// to drop the message or tear down the connection.
    pub fn handle_message(&self, event: &str, raw: &str) -> Result<(), ProtocolError> {
        let envelope = codec::decode(raw)?;

        if event == SUBSCRIPTION_SUCCEEDED {
            self.set_state(ChannelState::Subscribed);

            if let Some(listener) = self.lifecycle_listener() {
                let channel = self.name.clone();
                self.dispatcher
                    .submit(Box::new(move || listener.on_subscription_succeeded(&channel)));
            }

            let token = match envelope.data.as_deref() {
                Some(data) => codec::decode_resume_after(data)?,
                None => None,
            };
            *self.lock_token() = token;
            return Ok(());
        }

        if let Some(id) = envelope.id {
            // Last seen wins; a redelivered event moves the marker backwards.
            *self.lock_token() = Some(id);
        }

        let listeners = self.listeners.listeners_for(event);
        trace!(
            channel = %self.name,
            event,
            listeners = listeners.len(),
            "Dispatching event"
        );

        for listener in listeners {
            let channel = self.name.clone();
            let event = event.to_string();
            let data = envelope.data.clone();
            self.dispatcher
                .submit(Box::new(move || listener.on_event(&channel, &event, data.as_deref())));
        }

        Ok(())
    }

    fn check_bind_args(&self, event: &str) -> Result<(), ChannelError> {
        if event.is_empty() {
            return Err(ChannelError::InvalidEvent("event name is empty".to_string()));
        }
        if is_internal_event(event) {
            return Err(ChannelError::InvalidEvent(format!(
                "{event} is reserved for internal protocol use"
            )));
        }
        if self.state() == ChannelState::Unsubscribed {
            return Err(ChannelError::Unsubscribed(self.name.clone()));
        }
        Ok(())
    }

    fn set_state(&self, next: ChannelState) {
        self.state.store(next as u8, Ordering::Release);
        debug!(channel = %self.name, state = ?next, "Channel state changed");
    }

    fn lock_token(&self) -> MutexGuard<'_, Option<String>> {
        self.resume_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Option<Arc<dyn ChannelEventListener>>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InlineDispatcher;
    use std::sync::Mutex;

    const SUCCESS_WITH_TOKEN: &str =
        r#"{"event":"pusher_internal:subscription_succeeded","data":"{\"resume_after\":\"42\"}"}"#;

    fn standard(name: &str) -> Channel {
        Channel::new(name, Arc::new(InlineDispatcher)).unwrap()
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<(String, String, Option<String>)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SubscriptionEventListener for RecordingListener {
        fn on_event(&self, channel: &str, event: &str, data: Option<&str>) {
            self.events.lock().unwrap().push((
                channel.to_string(),
                event.to_string(),
                data.map(ToString::to_string),
            ));
        }
    }

    #[derive(Default)]
    struct RecordingLifecycle {
        succeeded: Mutex<Vec<String>>,
    }

    impl SubscriptionEventListener for RecordingLifecycle {
        fn on_event(&self, _channel: &str, _event: &str, _data: Option<&str>) {}
    }

    impl ChannelEventListener for RecordingLifecycle {
        fn on_subscription_succeeded(&self, channel: &str) {
            self.succeeded.lock().unwrap().push(channel.to_string());
        }
    }

    #[test]
    fn test_new_channel_starts_fresh() {
        let channel = standard("chat:lobby");

        assert_eq!(channel.name(), "chat:lobby");
        assert_eq!(channel.state(), ChannelState::Initial);
        assert!(channel.resume_after().is_none());
        assert!(channel.lifecycle_listener().is_none());
    }

    #[test]
    fn test_standard_class_rejects_restricted_names() {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(InlineDispatcher);

        for name in ["private-account", "presence-room"] {
            assert!(matches!(
                Channel::new(name, Arc::clone(&dispatcher)),
                Err(ChannelError::InvalidName(_))
            ));
        }
        assert!(matches!(
            Channel::new("", Arc::clone(&dispatcher)),
            Err(ChannelError::InvalidName(_))
        ));
    }

    #[test]
    fn test_restricted_class_requires_prefix() {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(InlineDispatcher);

        assert!(Channel::with_class(
            "private-account",
            ChannelClass::Restricted,
            Arc::clone(&dispatcher)
        )
        .is_ok());
        assert!(Channel::with_class(
            "presence-room",
            ChannelClass::Restricted,
            Arc::clone(&dispatcher)
        )
        .is_ok());
        assert!(matches!(
            Channel::with_class("chat:lobby", ChannelClass::Restricted, dispatcher),
            Err(ChannelError::InvalidName(_))
        ));
    }

    #[test]
    fn test_bind_rejects_internal_and_empty_events() {
        let channel = standard("chat:lobby");
        let listener: Arc<dyn SubscriptionEventListener> = Arc::new(RecordingListener::default());

        assert!(matches!(
            channel.bind("pusher_internal:subscription_succeeded", Arc::clone(&listener)),
            Err(ChannelError::InvalidEvent(_))
        ));
        assert!(matches!(
            channel.bind("", Arc::clone(&listener)),
            Err(ChannelError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_bind_unbind_round_trip_clears_event() {
        let channel = standard("chat:lobby");
        let listener: Arc<dyn SubscriptionEventListener> = Arc::new(RecordingListener::default());

        channel.bind("message", Arc::clone(&listener)).unwrap();
        channel.unbind("message", &listener).unwrap();

        assert!(!channel.listeners.has_event("message"));
    }

    #[test]
    fn test_duplicate_bind_delivers_once() {
        let channel = standard("chat:lobby");
        let recorder = Arc::new(RecordingListener::default());
        let listener: Arc<dyn SubscriptionEventListener> = recorder.clone();

        channel.bind("message", Arc::clone(&listener)).unwrap();
        channel.bind("message", Arc::clone(&listener)).unwrap();

        channel
            .handle_message("message", r#"{"event":"message","data":"hello"}"#)
            .unwrap();

        assert_eq!(recorder.events().len(), 1);
    }

    #[test]
    fn test_subscription_succeeded_updates_state_and_token() {
        let channel = standard("chat:lobby");
        let lifecycle = Arc::new(RecordingLifecycle::default());
        channel.set_lifecycle_listener(lifecycle.clone());

        channel
            .handle_message(SUBSCRIPTION_SUCCEEDED, SUCCESS_WITH_TOKEN)
            .unwrap();

        assert_eq!(channel.state(), ChannelState::Subscribed);
        assert_eq!(channel.resume_after().as_deref(), Some("42"));
        assert_eq!(
            *lifecycle.succeeded.lock().unwrap(),
            vec!["chat:lobby".to_string()]
        );
    }

    #[test]
    fn test_subscription_succeeded_without_token() {
        let channel = standard("chat:lobby");
        channel.set_resume_after("stale");

        channel
            .handle_message(
                SUBSCRIPTION_SUCCEEDED,
                r#"{"event":"pusher_internal:subscription_succeeded","data":"{}"}"#,
            )
            .unwrap();

        assert_eq!(channel.state(), ChannelState::Subscribed);
        assert!(channel.resume_after().is_none());
    }

    #[test]
    fn test_event_id_overwrites_token_unconditionally() {
        let channel = standard("chat:lobby");
        channel.set_resume_after("41");

        channel
            .handle_message("message", r#"{"event":"message","data":"x","id":"7"}"#)
            .unwrap();

        assert_eq!(channel.resume_after().as_deref(), Some("7"));
    }

    #[test]
    fn test_event_without_id_keeps_token() {
        let channel = standard("chat:lobby");
        channel.set_resume_after("41");

        channel
            .handle_message("message", r#"{"event":"message","data":"x"}"#)
            .unwrap();

        assert_eq!(channel.resume_after().as_deref(), Some("41"));
    }

    #[test]
    fn test_event_without_listeners_is_dropped_silently() {
        let channel = standard("chat:lobby");

        channel
            .handle_message("message", r#"{"event":"message","data":"x"}"#)
            .unwrap();
    }

    #[test]
    fn test_listener_receives_channel_event_and_payload() {
        let channel = standard("chat:lobby");
        let recorder = Arc::new(RecordingListener::default());
        channel.bind("message", recorder.clone()).unwrap();

        channel
            .handle_message("message", r#"{"event":"message","data":"{\"body\":\"hi\"}"}"#)
            .unwrap();

        assert_eq!(
            recorder.events(),
            vec![(
                "chat:lobby".to_string(),
                "message".to_string(),
                Some(r#"{"body":"hi"}"#.to_string())
            )]
        );
    }

    #[test]
    fn test_malformed_envelope_propagates() {
        let channel = standard("chat:lobby");
        assert!(channel.handle_message("message", "not json").is_err());
    }

    #[test]
    fn test_unsubscribe_is_terminal_for_bind() {
        let channel = standard("chat:lobby");
        let listener: Arc<dyn SubscriptionEventListener> = Arc::new(RecordingListener::default());

        channel.unsubscribe_envelope().unwrap();
        assert_eq!(channel.state(), ChannelState::Unsubscribed);

        assert!(matches!(
            channel.bind("message", Arc::clone(&listener)),
            Err(ChannelError::Unsubscribed(_))
        ));
        assert!(matches!(
            channel.unbind("message", &listener),
            Err(ChannelError::Unsubscribed(_))
        ));
    }

    #[test]
    fn test_unsubscribe_keeps_listeners() {
        let channel = standard("chat:lobby");
        let listener: Arc<dyn SubscriptionEventListener> = Arc::new(RecordingListener::default());
        channel.bind("message", Arc::clone(&listener)).unwrap();

        channel.unsubscribe_envelope().unwrap();

        assert!(channel.listeners.has_event("message"));
    }

    #[test]
    fn test_mark_subscribe_sent_respects_terminal_state() {
        let channel = standard("chat:lobby");

        channel.mark_subscribe_sent();
        assert_eq!(channel.state(), ChannelState::SubscribeSent);

        channel.unsubscribe_envelope().unwrap();
        channel.mark_subscribe_sent();
        assert_eq!(channel.state(), ChannelState::Unsubscribed);
    }

    #[test]
    fn test_subscribe_envelope_layout() {
        let channel = standard("chat:lobby");
        assert_eq!(
            channel.subscribe_envelope().unwrap(),
            r#"{"event":"pusher:subscribe","data":{"channel":"chat:lobby"}}"#
        );

        channel.set_resume_after("42");
        assert_eq!(
            channel.subscribe_envelope().unwrap(),
            r#"{"event":"pusher:subscribe","data":{"channel":"chat:lobby","resume_after":"42"}}"#
        );
    }

    #[test]
    fn test_unsubscribe_envelope_layout() {
        let channel = standard("chat:lobby");
        channel.set_resume_after("42");

        assert_eq!(
            channel.unsubscribe_envelope().unwrap(),
            r#"{"event":"pusher:unsubscribe","data":{"channel":"chat:lobby"}}"#
        );
    }

    #[test]
    fn test_lifecycle_listener_last_write_wins() {
        let channel = standard("chat:lobby");
        let first = Arc::new(RecordingLifecycle::default());
        let second = Arc::new(RecordingLifecycle::default());

        channel.set_lifecycle_listener(first.clone());
        channel.set_lifecycle_listener(second.clone());

        channel
            .handle_message(SUBSCRIPTION_SUCCEEDED, SUCCESS_WITH_TOKEN)
            .unwrap();

        assert!(first.succeeded.lock().unwrap().is_empty());
        assert_eq!(second.succeeded.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_bind_unbind_with_dispatch() {
        let channel = Arc::new(standard("stress"));
        let raw = r#"{"event":"tick","data":"{}","id":"1"}"#;

        std::thread::scope(|scope| {
            let binder = Arc::clone(&channel);
            scope.spawn(move || {
                for _ in 0..1_000 {
                    let listener: Arc<dyn SubscriptionEventListener> =
                        Arc::new(|_: &str, _: &str, _: Option<&str>| {});
                    binder.bind("tick", Arc::clone(&listener)).unwrap();
                    binder.unbind("tick", &listener).unwrap();
                }
            });

            let decoder = Arc::clone(&channel);
            scope.spawn(move || {
                for _ in 0..1_000 {
                    decoder.handle_message("tick", raw).unwrap();
                }
            });
        });

        assert_eq!(channel.resume_after().as_deref(), Some("1"));
    }
}
