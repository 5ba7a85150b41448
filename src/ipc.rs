//! Async IPC connection to MPV.
//!
//! Handles platform-specific socket/pipe connections: waits for MPV to
//! create its IPC endpoint, connects (retrying until the first success),
//! then runs one reader and one writer task over the stream.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::MpvError;
use crate::frame::FrameDecoder;

const PIPE_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle of a client's connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Initializing,
  Spawning,
  AwaitingPipe,
  Connecting,
  Connected,
  Reconnecting,
  Closed,
}

/// Writer channel message.
#[derive(Debug)]
pub(crate) enum WriteMessage {
  /// A complete, newline-terminated frame.
  Frame(Vec<u8>),
  Close,
}

/// What the connection tasks report back to.
pub(crate) trait ConnectionOwner: Send + Sync + 'static {
  fn is_closed(&self) -> bool;
  /// Move to `state` unless closed. Returns false once closed.
  fn transition(&self, state: ConnectionState) -> bool;
  /// The socket is usable. Must tear `socket` down if already closed.
  fn on_connected(&self, socket: SocketHandle);
  fn on_frame(&self, frame: Value);
  fn on_fatal(&self, error: MpvError);
}

/// Reader and writer tasks of one open socket.
pub(crate) struct SocketHandle {
  outbound: Sender<WriteMessage>,
  reader: JoinHandle<()>,
  _writer: JoinHandle<()>,
}

impl SocketHandle {
  pub fn outbound(&self) -> Sender<WriteMessage> {
    self.outbound.clone()
  }

  /// Let queued frames drain, then drop the stream; stop reading now.
  pub fn destroy(self) {
    let _ = self.outbound.try_send(WriteMessage::Close);
    self.outbound.close();
    self.reader.abort();
  }
}

/// Drives one client from "process spawned" to "socket connected".
pub(crate) struct ConnectionManager<O> {
  owner: Weak<O>,
  path: String,
  pipe_timeout: Duration,
  reconnect_delay: Duration,
  cancel: CancellationToken,
}

impl<O: ConnectionOwner> ConnectionManager<O> {
  pub fn new(
    owner: Weak<O>,
    path: String,
    pipe_timeout: Duration,
    reconnect_delay: Duration,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      owner,
      path,
      pipe_timeout,
      reconnect_delay,
      cancel,
    }
  }

  pub fn start(self) -> JoinHandle<()> {
    tokio::spawn(self.run())
  }

  fn transition(&self, state: ConnectionState) -> bool {
    self
      .owner
      .upgrade()
      .map_or(false, |owner| owner.transition(state))
  }

  async fn run(self) {
    if !self.transition(ConnectionState::AwaitingPipe) {
      return;
    }

    let appeared = tokio::select! {
      _ = self.cancel.cancelled() => return,
      appeared = wait_for_path(&self.path, self.pipe_timeout) => appeared,
    };
    if !appeared {
      if let Some(owner) = self.owner.upgrade() {
        owner.on_fatal(MpvError::PipeTimeout {
          path: self.path.clone(),
          timeout: self.pipe_timeout,
        });
      }
      return;
    }

    let mut attempt: u32 = 0;
    loop {
      if !self.transition(ConnectionState::Connecting) {
        return;
      }
      attempt += 1;

      let connected = tokio::select! {
        _ = self.cancel.cancelled() => return,
        connected = connect(&self.path) => connected,
      };

      match connected {
        Ok(stream) => {
          log::info!("MPV IPC connected on attempt {}", attempt);
          self.establish(stream);
          return;
        }
        Err(e) => {
          log::debug!(
            "IPC connect attempt {} failed, retrying in {:?}: {}",
            attempt,
            self.reconnect_delay,
            e
          );
          if !self.transition(ConnectionState::Reconnecting) {
            return;
          }
          tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.reconnect_delay) => {}
          }
        }
      }
    }
  }

  fn establish<S>(&self, stream: S)
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let Some(owner) = self.owner.upgrade() else {
      return;
    };

    let (reader, writer) = tokio::io::split(stream);
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let writer_owner = self.owner.clone();
    let writer_handle = tokio::spawn(async move {
      writer_loop(writer, write_rx, writer_owner).await;
    });

    // Reading starts once the owner holds the socket.
    let (start_tx, start_rx) = tokio::sync::oneshot::channel::<()>();
    let reader_owner = self.owner.clone();
    let reader_handle = tokio::spawn(async move {
      if start_rx.await.is_ok() {
        reader_loop(reader, reader_owner).await;
      }
    });

    owner.on_connected(SocketHandle {
      outbound: write_tx,
      reader: reader_handle,
      _writer: writer_handle,
    });
    let _ = start_tx.send(());
  }
}

/// Poll until `path` exists. Returns false on timeout.
pub(crate) async fn wait_for_path(path: &str, timeout: Duration) -> bool {
  let path = Path::new(path);
  let poll = async {
    while !path.exists() {
      tokio::time::sleep(PIPE_POLL_INTERVAL).await;
    }
  };
  tokio::time::timeout(timeout, poll).await.is_ok()
}

#[cfg(windows)]
async fn connect(path: &str) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
  use tokio::net::windows::named_pipe::ClientOptions;

  ClientOptions::new().open(path)
}

#[cfg(not(windows))]
async fn connect(path: &str) -> std::io::Result<tokio::net::UnixStream> {
  tokio::net::UnixStream::connect(path).await
}

async fn reader_loop<R, O>(mut reader: R, owner: Weak<O>)
where
  R: AsyncRead + Unpin,
  O: ConnectionOwner,
{
  log::info!("MPV IPC reader loop started");
  let mut decoder = FrameDecoder::new();
  let mut chunk = vec![0u8; READ_CHUNK];

  loop {
    let read = reader.read(&mut chunk).await;
    let Some(owner) = owner.upgrade() else {
      return;
    };

    match read {
      Ok(0) => {
        log::info!("MPV IPC connection closed");
        owner.on_fatal(MpvError::ConnectionLost("socket closed by MPV".into()));
        return;
      }
      Ok(n) => {
        decoder.push(&chunk[..n]);
        if !dispatch_frames(&mut decoder, &owner) {
          return;
        }
      }
      Err(e) => {
        log::error!("MPV IPC read error: {}", e);
        owner.on_fatal(MpvError::ConnectionLost(e.to_string()));
        return;
      }
    }
  }
}

/// Hand every complete frame to the owner. Returns false once the owner
/// is closed or a frame fails to decode.
fn dispatch_frames<O: ConnectionOwner>(decoder: &mut FrameDecoder, owner: &Arc<O>) -> bool {
  while let Some(frame) = decoder.next_frame() {
    if owner.is_closed() {
      return false;
    }
    match frame {
      Ok(value) => {
        log::debug!("MPV sent: {}", value);
        owner.on_frame(value);
      }
      Err(e) => {
        log::error!("Failed to parse MPV message: {}", e);
        owner.on_fatal(e.into());
        return false;
      }
    }
  }
  true
}

async fn writer_loop<W, O>(mut writer: W, write_rx: Receiver<WriteMessage>, owner: Weak<O>)
where
  W: AsyncWrite + Unpin,
  O: ConnectionOwner,
{
  log::info!("MPV IPC writer loop started");

  while let Ok(msg) = write_rx.recv().await {
    match msg {
      WriteMessage::Frame(data) => {
        let written = async {
          writer.write_all(&data).await?;
          writer.flush().await
        }
        .await;

        if let Err(e) = written {
          log::error!("MPV IPC write error: {}", e);
          if let Some(owner) = owner.upgrade() {
            owner.on_fatal(MpvError::ConnectionLost(e.to_string()));
          }
          return;
        }
      }
      WriteMessage::Close => break,
    }
  }

  log::info!("MPV IPC writer closing");
  let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;

  #[derive(Default)]
  struct Recorder {
    frames: Mutex<Vec<Value>>,
    fatal: Mutex<Vec<String>>,
  }

  impl ConnectionOwner for Recorder {
    fn is_closed(&self) -> bool {
      !self.fatal.lock().is_empty()
    }
    fn transition(&self, _state: ConnectionState) -> bool {
      true
    }
    fn on_connected(&self, socket: SocketHandle) {
      socket.destroy();
    }
    fn on_frame(&self, frame: Value) {
      self.frames.lock().push(frame);
    }
    fn on_fatal(&self, error: MpvError) {
      self.fatal.lock().push(error.to_string());
    }
  }

  #[tokio::test]
  async fn test_reader_dispatches_split_frames_then_reports_eof() {
    let recorder = Arc::new(Recorder::default());
    let (client, mut server) = tokio::io::duplex(64);

    let task = tokio::spawn(reader_loop(client, Arc::downgrade(&recorder)));
    server.write_all(b"{\"a\":1}\n{\"b\"").await.unwrap();
    server.write_all(b":2}\n").await.unwrap();
    drop(server);
    task.await.unwrap();

    assert_eq!(
      *recorder.frames.lock(),
      vec![serde_json::json!({"a": 1}), serde_json::json!({"b": 2})]
    );
    let fatal = recorder.fatal.lock();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].contains("lost"));
  }

  #[tokio::test]
  async fn test_reader_stops_on_malformed_frame() {
    let recorder = Arc::new(Recorder::default());
    let (client, mut server) = tokio::io::duplex(64);

    let task = tokio::spawn(reader_loop(client, Arc::downgrade(&recorder)));
    server.write_all(b"{\"ok\":true}\ngarbage\n{\"late\":1}\n").await.unwrap();
    task.await.unwrap();

    assert_eq!(recorder.frames.lock().len(), 1);
    let fatal = recorder.fatal.lock();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].contains("desync"));
  }

  #[tokio::test]
  async fn test_writer_drains_before_close() {
    let recorder = Arc::new(Recorder::default());
    let (client, mut server) = tokio::io::duplex(256);
    let (tx, rx) = async_channel::unbounded();

    tx.try_send(WriteMessage::Frame(b"{\"one\":1}\n".to_vec())).unwrap();
    tx.try_send(WriteMessage::Frame(b"{\"two\":2}\n".to_vec())).unwrap();
    tx.try_send(WriteMessage::Close).unwrap();
    writer_loop(client, rx, Arc::downgrade(&recorder)).await;

    let mut received = String::new();
    server.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "{\"one\":1}\n{\"two\":2}\n");
    assert!(recorder.fatal.lock().is_empty());
  }

  /// Records callbacks in order and keeps the socket open.
  #[derive(Default)]
  struct Timeline {
    log: Mutex<Vec<String>>,
    socket: Mutex<Option<SocketHandle>>,
  }

  impl ConnectionOwner for Timeline {
    fn is_closed(&self) -> bool {
      false
    }
    fn transition(&self, _state: ConnectionState) -> bool {
      true
    }
    fn on_connected(&self, socket: SocketHandle) {
      self.log.lock().push("connected".into());
      *self.socket.lock() = Some(socket);
    }
    fn on_frame(&self, _frame: Value) {
      self.log.lock().push("frame".into());
    }
    fn on_fatal(&self, _error: MpvError) {
      self.log.lock().push("fatal".into());
    }
  }

  #[tokio::test]
  async fn test_immediate_eof_is_reported_after_connect() {
    let timeline = Arc::new(Timeline::default());
    let manager = ConnectionManager::new(
      Arc::downgrade(&timeline),
      String::new(),
      Duration::from_secs(1),
      Duration::from_millis(10),
      CancellationToken::new(),
    );

    let (client, server) = tokio::io::duplex(64);
    drop(server);
    manager.establish(client);

    tokio::time::timeout(Duration::from_secs(2), async {
      while timeline.log.lock().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .unwrap();
    assert_eq!(*timeline.log.lock(), vec!["connected", "fatal"]);
  }

  #[tokio::test]
  async fn test_wait_for_path_times_out_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let path_str = path.to_str().unwrap().to_string();

    assert!(!wait_for_path(&path_str, Duration::from_millis(60)).await);

    let create = path.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      std::fs::write(create, b"").unwrap();
    });
    assert!(wait_for_path(&path_str, Duration::from_secs(2)).await);
  }
}
