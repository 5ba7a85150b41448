//! Named-event publish/subscribe registry.
//!
//! Listeners are plain closures keyed by event name. `emit` snapshots the
//! listener list before calling anything, so a listener that subscribes or
//! unsubscribes during an emission only affects later emissions.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
  next_id: u64,
  by_event: HashMap<String, Vec<(u64, Callback<T>)>>,
}

impl<T> Listeners<T> {
  fn remove(&mut self, event: &str, id: u64) {
    if let Some(callbacks) = self.by_event.get_mut(event) {
      callbacks.retain(|(listener_id, _)| *listener_id != id);
      if callbacks.is_empty() {
        self.by_event.remove(event);
      }
    }
  }
}

/// Event registry shared by every clone.
pub struct EventBus<T> {
  listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: 'static> EventBus<T> {
  pub fn new() -> Self {
    Self {
      listeners: Arc::new(Mutex::new(Listeners {
        next_id: 0,
        by_event: HashMap::new(),
      })),
    }
  }

  /// Register `callback` for `event`.
  ///
  /// The returned [`Subscription`] removes the listener when
  /// [`Subscription::unsubscribe`] is called. Dropping it leaves the
  /// listener in place.
  pub fn on<F>(&self, event: &str, callback: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    let id = {
      let mut listeners = self.listeners.lock();
      listeners.next_id += 1;
      let id = listeners.next_id;
      listeners
        .by_event
        .entry(event.to_string())
        .or_default()
        .push((id, Arc::new(callback)));
      id
    };

    let listeners: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
    let event = event.to_string();
    Subscription {
      remove: Some(Box::new(move || {
        if let Some(listeners) = listeners.upgrade() {
          listeners.lock().remove(&event, id);
        }
      })),
    }
  }

  /// Call every listener currently registered for `event`.
  pub fn emit(&self, event: &str, payload: &T) {
    let snapshot: Vec<Callback<T>> = {
      let listeners = self.listeners.lock();
      match listeners.by_event.get(event) {
        Some(callbacks) => callbacks.iter().map(|(_, cb)| cb.clone()).collect(),
        None => return,
      }
    };

    for callback in snapshot {
      callback(payload);
    }
  }

  pub fn listener_count(&self, event: &str) -> usize {
    self
      .listeners
      .lock()
      .by_event
      .get(event)
      .map_or(0, Vec::len)
  }
}

impl<T: 'static> Default for EventBus<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for EventBus<T> {
  fn clone(&self) -> Self {
    Self {
      listeners: self.listeners.clone(),
    }
  }
}

/// Handle for removing a listener registered with [`EventBus::on`].
pub struct Subscription {
  remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  /// Remove the listener. Later emissions no longer reach it.
  pub fn unsubscribe(mut self) {
    if let Some(remove) = self.remove.take() {
      remove();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.remove.is_some())
      .finish()
  }
}
