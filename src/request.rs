//! In-flight request tracking.
//!
//! Requests are keyed by a per-client, strictly increasing id. Frames are
//! written to the connection in id order, once each, as soon as an
//! outbound channel is attached. Responses are matched by id only.

use std::collections::BTreeMap;

use async_channel::Sender;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::MpvError;
use crate::ipc::WriteMessage;
use crate::protocol::{MpvCommand, MpvResponse};

/// Receiving half of a request's result.
pub type ResponseReceiver = oneshot::Receiver<Result<Value, MpvError>>;

struct Request {
  name: String,
  frame: Vec<u8>,
  sent: bool,
  reply: oneshot::Sender<Result<Value, MpvError>>,
}

pub(crate) struct RequestRegistry {
  next_id: i64,
  pending: BTreeMap<i64, Request>,
  outbound: Option<Sender<WriteMessage>>,
  closed: bool,
}

impl RequestRegistry {
  pub fn new() -> Self {
    Self {
      next_id: 0,
      pending: BTreeMap::new(),
      outbound: None,
      closed: false,
    }
  }

  /// Reserve an id that no other request or observer of this client uses.
  pub fn allocate_id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }

  /// Register a command and try to send it. Never waits on I/O.
  pub fn enqueue(&mut self, name: &str, args: Vec<Value>) -> Result<(i64, ResponseReceiver), MpvError> {
    if self.closed {
      return Err(MpvError::Closed);
    }

    let id = self.allocate_id();
    let command = MpvCommand::new(id, name, args);
    let mut frame = serde_json::to_vec(&command)?;
    frame.push(b'\n');

    let (reply, rx) = oneshot::channel();
    self.pending.insert(
      id,
      Request {
        name: name.to_string(),
        frame,
        sent: false,
        reply,
      },
    );
    self.flush();
    Ok((id, rx))
  }

  /// Start writing to a freshly connected socket.
  pub fn attach(&mut self, outbound: Sender<WriteMessage>) {
    if self.closed {
      return;
    }
    self.outbound = Some(outbound);
    let written = self.flush();
    if written > 0 {
      log::debug!("Flushed {} queued MPV command(s)", written);
    }
  }

  /// Write every unsent request, oldest first. No-op while disconnected.
  pub fn flush(&mut self) -> usize {
    let Some(outbound) = &self.outbound else {
      return 0;
    };

    let mut written = 0;
    for (id, request) in self.pending.iter_mut().filter(|(_, r)| !r.sent) {
      if outbound.try_send(WriteMessage::Frame(request.frame.clone())).is_err() {
        log::warn!("MPV writer gone, request_id={} stays queued", id);
        break;
      }
      log::debug!("MPV command queued for write: {} (request_id={})", request.name, id);
      request.sent = true;
      written += 1;
    }
    written
  }

  /// Complete the request a response belongs to.
  ///
  /// Returns false if no request with that id is pending.
  pub fn resolve(&mut self, response: MpvResponse) -> bool {
    let Some(request) = self.pending.remove(&response.request_id) else {
      log::debug!("Ignoring response for unknown request_id={}", response.request_id);
      return false;
    };

    let result = if response.is_success() {
      Ok(response.data.unwrap_or(Value::Null))
    } else {
      Err(MpvError::Command(response.error))
    };
    // The caller may have stopped waiting.
    let _ = request.reply.send(result);
    true
  }

  /// Drop a request whose caller gave up waiting.
  pub fn forget(&mut self, id: i64) {
    self.pending.remove(&id);
  }

  /// Refuse new requests and reject every outstanding one.
  pub fn close(&mut self) -> usize {
    self.closed = true;
    self.outbound = None;
    let pending = std::mem::take(&mut self.pending);
    let count = pending.len();
    for (_, request) in pending {
      let _ = request.reply.send(Err(MpvError::Closed));
    }
    count
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn unsent(&self) -> usize {
    self.pending.values().filter(|r| !r.sent).count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn frame(msg: WriteMessage) -> Value {
    match msg {
      WriteMessage::Frame(bytes) => {
        assert_eq!(bytes.last(), Some(&b'\n'));
        serde_json::from_slice(&bytes).unwrap()
      }
      WriteMessage::Close => panic!("Expected frame"),
    }
  }

  fn response(request_id: i64, error: &str, data: Option<Value>) -> MpvResponse {
    MpvResponse {
      request_id,
      error: error.to_string(),
      data,
    }
  }

  #[test]
  fn test_requests_queue_until_attached_then_flush_in_order() {
    let mut registry = RequestRegistry::new();
    registry.enqueue("get_version", vec![]).unwrap();
    registry.enqueue("set_property", vec![json!("volume"), json!(50)]).unwrap();
    registry.enqueue("get_property", vec![json!("volume")]).unwrap();
    assert_eq!(registry.unsent(), 3);

    let (tx, rx) = async_channel::unbounded();
    registry.attach(tx);
    assert_eq!(registry.unsent(), 0);

    let frames: Vec<Value> = std::iter::from_fn(|| rx.try_recv().ok()).map(frame).collect();
    assert_eq!(
      frames,
      vec![
        json!({"request_id": 1, "command": ["get_version"]}),
        json!({"request_id": 2, "command": ["set_property", "volume", 50]}),
        json!({"request_id": 3, "command": ["get_property", "volume"]}),
      ]
    );

    // Flushing again writes nothing new.
    assert_eq!(registry.flush(), 0);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_enqueue_after_attach_writes_immediately() {
    let mut registry = RequestRegistry::new();
    let (tx, rx) = async_channel::unbounded();
    registry.attach(tx);

    let (id, _rx) = registry.enqueue("get_version", vec![]).unwrap();
    assert_eq!(frame(rx.try_recv().unwrap())["request_id"], id);
    assert_eq!(registry.len(), 1);
  }

  #[tokio::test]
  async fn test_responses_resolve_by_id_not_order() {
    let mut registry = RequestRegistry::new();
    let (a, mut rx_a) = registry.enqueue("get_property", vec![json!("a")]).unwrap();
    let (b, rx_b) = registry.enqueue("get_property", vec![json!("b")]).unwrap();

    assert!(registry.resolve(response(b, "success", Some(json!("B")))));
    assert_eq!(rx_b.await.unwrap().unwrap(), json!("B"));
    assert!(rx_a.try_recv().is_err());
    assert_eq!(registry.len(), 1);

    assert!(registry.resolve(response(a, "success", Some(json!("A")))));
    assert_eq!(rx_a.await.unwrap().unwrap(), json!("A"));
    assert_eq!(registry.len(), 0);
  }

  #[tokio::test]
  async fn test_success_data_and_failure_message() {
    let mut registry = RequestRegistry::new();
    let (version, rx_version) = registry.enqueue("get_version", vec![]).unwrap();
    let (missing, rx_missing) = registry.enqueue("get_property", vec![json!("nope")]).unwrap();

    registry.resolve(response(version, "success", Some(json!(65637))));
    registry.resolve(response(missing, "property not found", None));

    assert_eq!(rx_version.await.unwrap().unwrap(), json!(65637));
    match rx_missing.await.unwrap() {
      Err(MpvError::Command(msg)) => assert_eq!(msg, "property not found"),
      other => panic!("Expected command failure, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_success_without_data_is_null() {
    let mut registry = RequestRegistry::new();
    let (id, rx) = registry.enqueue("set_property", vec![json!("pause"), json!(true)]).unwrap();
    registry.resolve(response(id, "success", None));
    assert_eq!(rx.await.unwrap().unwrap(), Value::Null);
  }

  #[test]
  fn test_unknown_and_duplicate_responses_are_ignored() {
    let mut registry = RequestRegistry::new();
    let (id, _rx) = registry.enqueue("get_version", vec![]).unwrap();

    assert!(!registry.resolve(response(999, "success", None)));
    assert!(registry.resolve(response(id, "success", None)));
    assert!(!registry.resolve(response(id, "success", None)));
  }

  #[tokio::test]
  async fn test_close_rejects_pending_and_refuses_new() {
    let mut registry = RequestRegistry::new();
    let (_, rx) = registry.enqueue("get_version", vec![]).unwrap();

    assert_eq!(registry.close(), 1);
    assert!(matches!(rx.await.unwrap(), Err(MpvError::Closed)));
    assert!(matches!(registry.enqueue("get_version", vec![]), Err(MpvError::Closed)));

    let (tx, rx) = async_channel::unbounded();
    registry.attach(tx);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_ids_are_unique_across_requests_and_observers() {
    let mut registry = RequestRegistry::new();
    let observer = registry.allocate_id();
    let (request, _rx) = registry.enqueue("observe_property", vec![json!(observer), json!("volume")]).unwrap();
    assert_ne!(observer, request);
  }
}
