//! Shutdown registry for live clients.
//!
//! Applications that spawn several players register each client here and
//! call [`ClientRegistry::close_all`] from their shutdown path (signal
//! handler, window close, ...). The registry holds weak references, so it
//! never keeps a client alive on its own.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::client::{Inner, MpvClient};

#[derive(Clone, Default)]
pub struct ClientRegistry {
  clients: Arc<Mutex<Vec<Weak<Inner>>>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, client: &MpvClient) {
    let mut clients = self.clients.lock();
    clients.retain(|c| c.strong_count() > 0);
    clients.push(client.downgrade());
  }

  /// Close every registered client that is still alive.
  ///
  /// Returns how many were open before this call.
  pub fn close_all(&self) -> usize {
    let clients: Vec<Weak<Inner>> = std::mem::take(&mut *self.clients.lock());
    let closed = clients
      .iter()
      .filter_map(Weak::upgrade)
      .filter(|inner| inner.close())
      .count();
    log::info!("Closed {} MPV client(s) on shutdown", closed);
    closed
  }

  /// Number of registered clients still alive.
  pub fn len(&self) -> usize {
    self
      .clients
      .lock()
      .iter()
      .filter(|c| c.strong_count() > 0)
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
