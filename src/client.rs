//! High-level MPV client.
//!
//! One client owns one MPV process, one IPC connection and the requests
//! and observers multiplexed over it. Every unrecoverable failure goes
//! through `Inner::fatal`, which tears everything down once and then
//! emits a single `error` event.

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::MpvError;
use crate::events::{EventBus, Subscription};
use crate::ipc::{ConnectionManager, ConnectionOwner, ConnectionState, SocketHandle};
use crate::observe::{self, PropertyBus};
use crate::process::{self, ProcessError, ProcessHandle};
use crate::protocol::MpvMessage;
use crate::request::RequestRegistry;

/// Emitted once the socket is usable. Payload is `null`.
pub const CONNECT_EVENT: &str = "connect";
/// Emitted once on a fatal failure. Payload is the error message.
pub const ERROR_EVENT: &str = "error";

pub(crate) struct Inner {
  ipc_path: String,
  config: ClientConfig,
  state: Mutex<ConnectionState>,
  pub(crate) requests: Mutex<RequestRegistry>,
  events: EventBus<Value>,
  pub(crate) observables: PropertyBus,
  cancel: CancellationToken,
  process: Mutex<Option<ProcessHandle>>,
  socket: Mutex<Option<SocketHandle>>,
  connection: Mutex<Option<JoinHandle<()>>>,
  last_error: Mutex<Option<Arc<MpvError>>>,
}

/// High-level MPV client.
///
/// Cloning is cheap; clones share the same process and connection.
#[derive(Clone)]
pub struct MpvClient {
  pub(crate) inner: Arc<Inner>,
}

impl MpvClient {
  /// Spawn MPV and start connecting to its IPC socket in the background.
  ///
  /// Returns as soon as the process is launched. Commands issued before
  /// the connection is up are queued and sent in order once it is.
  /// Fails with [`MpvError::NoRuntime`] outside a tokio runtime.
  pub fn spawn(config: ClientConfig) -> Result<Self, MpvError> {
    config.validate().map_err(MpvError::Config)?;
    tokio::runtime::Handle::try_current().map_err(|_| MpvError::NoRuntime)?;

    let mpv_exe = config
      .mpv_path
      .clone()
      .or_else(process::find_mpv)
      .ok_or(ProcessError::NotFound)?;
    let ipc_path = config
      .ipc_path
      .clone()
      .unwrap_or_else(process::default_ipc_path);

    // Cleanup any existing socket
    process::remove_ipc_file(&ipc_path).map_err(|source| ProcessError::StaleSocket {
      path: ipc_path.clone(),
      source,
    })?;

    let events = EventBus::new();
    let observables = PropertyBus::new();
    // The relay holds only the two buses; it lives as long as they do.
    let _ = observe::relay_property_changes(&events, &observables);

    let inner = Arc::new(Inner {
      ipc_path,
      config,
      state: Mutex::new(ConnectionState::Initializing),
      requests: Mutex::new(RequestRegistry::new()),
      events,
      observables,
      cancel: CancellationToken::new(),
      process: Mutex::new(None),
      socket: Mutex::new(None),
      connection: Mutex::new(None),
      last_error: Mutex::new(None),
    });

    inner.transition(ConnectionState::Spawning);
    let child = match process::spawn_mpv(&mpv_exe, &inner.ipc_path, &inner.config.mpv_args) {
      Ok(child) => child,
      Err(e) => {
        inner.close();
        return Err(e.into());
      }
    };

    let weak = Arc::downgrade(&inner);
    let handle = process::supervise(child, inner.cancel.child_token(), move |status| {
      if let Some(inner) = weak.upgrade() {
        inner.fatal(MpvError::ProcessExited(status));
      }
    });
    *inner.process.lock() = Some(handle);

    let manager = ConnectionManager::new(
      Arc::downgrade(&inner),
      inner.ipc_path.clone(),
      inner.config.pipe_timeout(),
      inner.config.reconnect_delay(),
      inner.cancel.child_token(),
    );
    *inner.connection.lock() = Some(manager.start());

    Ok(Self { inner })
  }

  /// Send a command to MPV.
  ///
  /// The request is registered (and written, if connected) before this
  /// returns; the future resolves with the response `data`, or `null` if
  /// the response carried none.
  pub fn command(
    &self,
    name: &str,
    args: Vec<Value>,
  ) -> impl Future<Output = Result<Value, MpvError>> + Send + 'static {
    let enqueued = self.inner.requests.lock().enqueue(name, args);
    let inner = self.inner.clone();

    async move {
      let (request_id, reply) = enqueued?;
      let received = match inner.config.command_timeout() {
        Some(limit) => match tokio::time::timeout(limit, reply).await {
          Ok(received) => received,
          Err(_) => {
            log::error!(
              "MPV command timeout after {:?}, request_id={}",
              limit,
              request_id
            );
            inner.requests.lock().forget(request_id);
            return Err(MpvError::Timeout(limit));
          }
        },
        None => reply.await,
      };
      // A dropped sender means the registry was closed.
      received.unwrap_or(Err(MpvError::Closed))
    }
  }

  /// Get a property value.
  pub fn get(&self, property: &str) -> impl Future<Output = Result<Value, MpvError>> + Send + 'static {
    self.command("get_property", vec![property.into()])
  }

  /// Get a property and deserialize it.
  pub async fn get_as<T: DeserializeOwned>(&self, property: &str) -> Result<T, MpvError> {
    let value = self.get(property).await?;
    Ok(serde_json::from_value(value)?)
  }

  /// Set a property value.
  pub fn set(
    &self,
    property: &str,
    value: impl Into<Value>,
  ) -> impl Future<Output = Result<(), MpvError>> + Send + 'static {
    self.set_value(property, value.into())
  }

  fn set_value(&self, property: &str, value: Value) -> impl Future<Output = Result<(), MpvError>> + Send + 'static {
    let response = self.command("set_property", vec![property.into(), value]);
    async move { response.await.map(|_| ()) }
  }

  /// Listen for an MPV event (e.g. "file-loaded", "end-file") or for the
  /// client's own [`CONNECT_EVENT`] / [`ERROR_EVENT`].
  ///
  /// MPV events are delivered with the frame's fields minus `event`.
  pub fn on<F>(&self, event: &str, callback: F) -> Subscription
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    self.inner.events.on(event, callback)
  }

  /// Stop MPV and disconnect. Calling it again has no effect.
  pub fn close(&self) {
    self.inner.close();
  }

  pub fn state(&self) -> ConnectionState {
    *self.inner.state.lock()
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }

  pub fn is_closed(&self) -> bool {
    self.state() == ConnectionState::Closed
  }

  /// PID of the MPV process, while it is owned by this client.
  pub fn process_id(&self) -> Option<u32> {
    self.inner.process.lock().as_ref().and_then(ProcessHandle::pid)
  }

  /// Whether a socket is currently held.
  pub fn has_socket(&self) -> bool {
    self.inner.socket.lock().is_some()
  }

  pub fn ipc_path(&self) -> &str {
    &self.inner.ipc_path
  }

  /// Requests sent or queued that have not been answered yet.
  pub fn pending_requests(&self) -> usize {
    self.inner.requests.lock().len()
  }

  /// The failure that closed this client, if any.
  pub fn last_error(&self) -> Option<Arc<MpvError>> {
    self.inner.last_error.lock().clone()
  }

  pub(crate) fn downgrade(&self) -> Weak<Inner> {
    Arc::downgrade(&self.inner)
  }
}

impl std::fmt::Debug for MpvClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MpvClient")
      .field("ipc_path", &self.inner.ipc_path)
      .field("state", &self.state())
      .finish()
  }
}

impl Inner {
  /// Tear everything down. Returns false if already closed.
  pub(crate) fn close(&self) -> bool {
    {
      let mut state = self.state.lock();
      if *state == ConnectionState::Closed {
        return false;
      }
      *state = ConnectionState::Closed;
    }
    log::info!("Closing MPV client ({})", self.ipc_path);

    // Stops the pipe wait, connect retries and the process supervisor.
    self.cancel.cancel();
    if let Some(task) = self.connection.lock().take() {
      task.abort();
    }

    if let Some(socket) = self.socket.lock().take() {
      log::info!("Closing IPC connection");
      socket.destroy();
    }

    if let Some(process) = self.process.lock().take() {
      process.terminate();
    }

    let rejected = self.requests.lock().close();
    if rejected > 0 {
      log::debug!("Rejected {} pending MPV command(s) on close", rejected);
    }

    if let Err(e) = process::remove_ipc_file(&self.ipc_path) {
      log::debug!("Could not remove IPC socket {}: {}", self.ipc_path, e);
    }

    log::info!("MPV client stopped");
    true
  }

  /// Close, then tell listeners why. Later failures are ignored.
  fn fatal(&self, error: MpvError) {
    if !self.close() {
      log::debug!("Ignoring error after close: {}", error);
      return;
    }

    log::error!("MPV client failed: {}", error);
    let message = Value::String(error.to_string());
    *self.last_error.lock() = Some(Arc::new(error));
    self.events.emit(ERROR_EVENT, &message);
  }
}

impl ConnectionOwner for Inner {
  fn is_closed(&self) -> bool {
    *self.state.lock() == ConnectionState::Closed
  }

  fn transition(&self, next: ConnectionState) -> bool {
    let mut state = self.state.lock();
    if *state == ConnectionState::Closed {
      return false;
    }
    log::debug!("MPV connection state: {:?} -> {:?}", *state, next);
    *state = next;
    true
  }

  fn on_connected(&self, socket: SocketHandle) {
    {
      let mut state = self.state.lock();
      if *state == ConnectionState::Closed {
        drop(state);
        socket.destroy();
        return;
      }
      *state = ConnectionState::Connected;

      let mut requests = self.requests.lock();
      let queued = requests.unsent();
      requests.attach(socket.outbound());
      drop(requests);
      *self.socket.lock() = Some(socket);
      log::info!("MPV client connected, {} queued command(s) sent", queued);
    }

    self.events.emit(CONNECT_EVENT, &Value::Null);
  }

  fn on_frame(&self, frame: Value) {
    match MpvMessage::from_value(frame) {
      MpvMessage::Response(response) => {
        self.requests.lock().resolve(response);
      }
      MpvMessage::Event(event) => {
        self.events.emit(&event.name, &event.body);
      }
      MpvMessage::Unknown(value) => {
        log::warn!("Unrecognized message from MPV: {}", value);
      }
    }
  }

  fn on_fatal(&self, error: MpvError) {
    self.fatal(error);
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.close();
  }
}
