//! # djorm-signals
//!
//! Signal dispatcher for djorm. A [`Signal`] holds named receivers that are
//! called in connection order with a shared reference to the payload.
//! [`ModelSignals`] groups the four write hooks (pre/post save, pre/post
//! delete) over one payload type; the query layer owns the global instance.
//!
//! ## Usage
//!
//! ```
//! use djorm_signals::Signal;
//! use std::sync::Arc;
//!
//! struct Saved(&'static str);
//!
//! let signal: Signal<Saved> = Signal::new();
//! signal.connect("audit", Arc::new(|event: &Saved| {
//!     println!("saved {}", event.0);
//! }));
//!
//! assert_eq!(signal.send(&Saved("todos")), 1);
//! ```

use std::sync::{Arc, PoisonError, RwLock};

/// The type signature for a signal receiver callback.
pub type SignalReceiver<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A signal that can be connected to and dispatched.
///
/// Receivers are identified by a string id; connecting twice with the same id
/// replaces the earlier receiver in place.
pub struct Signal<T: 'static> {
    name: &'static str,
    receivers: RwLock<Vec<(String, SignalReceiver<T>)>>,
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Signal<T> {
    /// Creates an unnamed signal with no receivers.
    pub const fn new() -> Self {
        Self::named("signal")
    }

    /// Creates a signal whose name shows up in dispatch logs.
    pub const fn named(name: &'static str) -> Self {
        Self {
            name,
            receivers: RwLock::new(Vec::new()),
        }
    }

    /// Returns the signal name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Connects a receiver, replacing any receiver with the same id.
    pub fn connect(&self, receiver_id: impl Into<String>, callback: SignalReceiver<T>) {
        let id = receiver_id.into();
        let mut receivers = self.receivers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = receivers.iter_mut().find(|(rid, _)| *rid == id) {
            entry.1 = callback;
        } else {
            receivers.push((id, callback));
        }
    }

    /// Disconnects the receiver with the given id. Returns `true` if one was removed.
    pub fn disconnect(&self, receiver_id: &str) -> bool {
        let mut receivers = self.receivers.write().unwrap_or_else(PoisonError::into_inner);
        let len_before = receivers.len();
        receivers.retain(|(id, _)| id != receiver_id);
        receivers.len() < len_before
    }

    /// Removes every receiver.
    pub fn disconnect_all(&self) {
        self.receivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Calls every receiver in connection order and returns how many ran.
    ///
    /// The receiver list is snapshotted first, so a receiver may connect or
    /// disconnect receivers without deadlocking.
    pub fn send(&self, payload: &T) -> usize {
        let receivers: Vec<SignalReceiver<T>> = self
            .receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        if !receivers.is_empty() {
            tracing::trace!(signal = self.name, receivers = receivers.len(), "dispatching");
        }
        for callback in &receivers {
            callback(payload);
        }
        receivers.len()
    }

    /// Returns the number of connected receivers.
    pub fn receiver_count(&self) -> usize {
        self.receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The write hooks fired around every persisted change.
pub struct ModelSignals<E: 'static> {
    /// Fired before an INSERT or UPDATE is executed.
    pub pre_save: Signal<E>,
    /// Fired after an INSERT or UPDATE succeeded.
    pub post_save: Signal<E>,
    /// Fired before a DELETE is executed.
    pub pre_delete: Signal<E>,
    /// Fired after a DELETE succeeded.
    pub post_delete: Signal<E>,
}

impl<E: 'static> Default for ModelSignals<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> ModelSignals<E> {
    /// Creates the four hooks with no receivers.
    pub const fn new() -> Self {
        Self {
            pre_save: Signal::named("pre_save"),
            post_save: Signal::named("post_save"),
            pre_delete: Signal::named("pre_delete"),
            post_delete: Signal::named("post_delete"),
        }
    }

    /// Disconnects every receiver on every hook.
    pub fn reset(&self) {
        self.pre_save.disconnect_all();
        self.post_save.disconnect_all();
        self.pre_delete.disconnect_all();
        self.post_delete.disconnect_all();
    }
}
