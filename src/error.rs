//! Client error types.

use std::time::Duration;

use thiserror::Error;

use crate::frame::DecodeError;
use crate::process::ProcessError;

/// Errors that can occur when driving an MPV process.
#[derive(Debug, Error)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Spawn(#[from] ProcessError),

  #[error("IPC socket {path} did not appear within {timeout:?}")]
  PipeTimeout { path: String, timeout: Duration },

  #[error("MPV process exited: {0}")]
  ProcessExited(String),

  #[error("Connection to MPV lost: {0}")]
  ConnectionLost(String),

  #[error("Protocol desync: {0}")]
  ProtocolDesync(#[from] DecodeError),

  #[error("MPV command failed: {0}")]
  Command(String),

  #[error("Command timed out after {0:?}")]
  Timeout(Duration),

  #[error("Client closed")]
  Closed,

  #[error("JSON serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error("No tokio runtime: MPV clients must be spawned from within one")]
  NoRuntime,
}

impl MpvError {
  /// Whether this error tears down the whole client rather than a single request.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      MpvError::Spawn(_)
        | MpvError::PipeTimeout { .. }
        | MpvError::ProcessExited(_)
        | MpvError::ConnectionLost(_)
        | MpvError::ProtocolDesync(_)
    )
  }
}
