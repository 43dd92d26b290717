//! Event dispatch for listener callbacks.
//!
//! Inbound protocol processing must never run listener code synchronously:
//! every callback is handed to a [`Dispatcher`] as a task and executed on
//! the dispatcher's own context. The dispatcher is a single injectable
//! collaborator, so tests can substitute [`InlineDispatcher`] for
//! deterministic single-threaded execution.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::{error, warn};

/// A zero-argument unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes submitted tasks.
///
/// Implementations must preserve submission order for tasks submitted from
/// the same call site. There is no cancellation: a submitted task runs to
/// completion.
pub trait Dispatcher: Send + Sync {
    /// Enqueue a task for execution.
    fn submit(&self, task: Task);
}

/// Single-consumer FIFO dispatcher backed by a background worker.
///
/// Tasks execute on the worker context, never on the submitting thread, in
/// submission order. A panicking task is caught and logged; the worker
/// keeps draining the queue. Dropping the queue stops the worker once the
/// remaining tasks have run.
pub struct EventQueue {
    sender: mpsc::UnboundedSender<Task>,
}

impl EventQueue {
    /// Create an event queue and spawn its worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();

        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                    error!(
                        panic = panic_message(payload.as_ref()),
                        "Listener callback panicked"
                    );
                }
            }
        });

        Self { sender }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for EventQueue {
    fn submit(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!("Event queue worker stopped; dropping task");
        }
    }
}

/// Dispatcher that runs tasks immediately on the calling context.
///
/// Gives up the decode/dispatch decoupling; intended for deterministic
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn submit(&self, task: Task) {
        task();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
