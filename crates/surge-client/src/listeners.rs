//! Listener registration and lookup.
//!
//! The registry maps event names to sets of listener handles. Handles are
//! compared by `Arc` pointer identity, so binding the same handle twice is
//! a no-op and unbinding removes exactly one logical registration.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// Receives application events for a channel.
pub trait SubscriptionEventListener: Send + Sync {
    /// Called with the channel name, event name, and opaque payload.
    fn on_event(&self, channel: &str, event: &str, data: Option<&str>);
}

impl<F> SubscriptionEventListener for F
where
    F: Fn(&str, &str, Option<&str>) + Send + Sync,
{
    fn on_event(&self, channel: &str, event: &str, data: Option<&str>) {
        self(channel, event, data);
    }
}

/// Channel-level lifecycle listener.
pub trait ChannelEventListener: SubscriptionEventListener {
    /// Called once the channel's subscription is confirmed by the server.
    fn on_subscription_succeeded(&self, channel: &str);
}

/// A registered listener, keyed by the allocation it points to.
#[derive(Clone)]
struct ListenerHandle(Arc<dyn SubscriptionEventListener>);

impl ListenerHandle {
    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ListenerHandle {}

impl Hash for ListenerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Mapping from event name to the set of bound listeners.
///
/// Reads and writes on the same event are mutually exclusive, so dispatch
/// never observes a partially mutated set; lookups return a snapshot.
#[derive(Default)]
pub struct ListenerRegistry {
    bindings: DashMap<String, HashSet<ListenerHandle>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener to an event. Idempotent per (event, handle) pair.
    ///
    /// Returns `true` if this is a new registration.
    pub fn bind(&self, event: &str, listener: Arc<dyn SubscriptionEventListener>) -> bool {
        let added = self
            .bindings
            .entry(event.to_string())
            .or_default()
            .insert(ListenerHandle(listener));
        if added {
            debug!(event, "Listener bound");
        }
        added
    }

    /// Unbind a listener from an event.
    ///
    /// Removing the last listener drops the event entry. Unbinding a
    /// listener that was never registered is a no-op.
    pub fn unbind(&self, event: &str, listener: &Arc<dyn SubscriptionEventListener>) {
        if let Some(mut entry) = self.bindings.get_mut(event) {
            let removed = entry.remove(&ListenerHandle(Arc::clone(listener)));
            let now_empty = entry.is_empty();
            drop(entry);

            if now_empty {
                self.bindings.remove_if(event, |_, set| set.is_empty());
            }
            if removed {
                debug!(event, "Listener unbound");
            }
        }
    }

    /// Snapshot of the listeners bound to an event (possibly empty).
    #[must_use]
    pub fn listeners_for(&self, event: &str) -> Vec<Arc<dyn SubscriptionEventListener>> {
        self.bindings
            .get(event)
            .map(|set| set.iter().map(|handle| Arc::clone(&handle.0)).collect())
            .unwrap_or_default()
    }

    /// Check whether any listener is bound to an event.
    #[must_use]
    pub fn has_event(&self, event: &str) -> bool {
        self.bindings.contains_key(event)
    }

    /// Number of event names with at least one listener.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.bindings.len()
    }

    /// Check whether the registry has no bindings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
