//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for spawning and connecting to MPV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<PathBuf>,

  /// IPC socket/pipe address (None = unique per client).
  #[serde(default)]
  pub ipc_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// How long to wait for MPV to create the IPC socket.
  #[serde(default = "default_pipe_timeout_ms")]
  pub pipe_timeout_ms: u64,

  /// Delay between connection attempts before the first successful connect.
  #[serde(default = "default_reconnect_delay_ms")]
  pub reconnect_delay_ms: u64,

  /// Per-command response timeout (None = wait until answered or closed).
  #[serde(default)]
  pub command_timeout_ms: Option<u64>,
}

fn default_pipe_timeout_ms() -> u64 {
  5000
}

fn default_reconnect_delay_ms() -> u64 {
  200
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      ipc_path: None,
      mpv_args: Vec::new(),
      pipe_timeout_ms: default_pipe_timeout_ms(),
      reconnect_delay_ms: default_reconnect_delay_ms(),
      command_timeout_ms: None,
    }
  }
}

impl ClientConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.pipe_timeout_ms == 0 {
      return Err("Pipe timeout must be greater than zero".to_string());
    }
    if self.reconnect_delay_ms == 0 {
      return Err("Reconnect delay must be greater than zero".to_string());
    }
    if self.command_timeout_ms == Some(0) {
      return Err("Command timeout must be greater than zero".to_string());
    }
    if let Some(path) = &self.ipc_path {
      if path.trim().is_empty() {
        return Err("IPC path cannot be empty".to_string());
      }
    }
    if self.mpv_args.iter().any(|arg| arg.starts_with("--input-ipc-server")) {
      return Err("--input-ipc-server is managed by the client; set ipcPath instead".to_string());
    }
    Ok(())
  }

  pub fn pipe_timeout(&self) -> Duration {
    Duration::from_millis(self.pipe_timeout_ms)
  }

  pub fn reconnect_delay(&self) -> Duration {
    Duration::from_millis(self.reconnect_delay_ms)
  }

  pub fn command_timeout(&self) -> Option<Duration> {
    self.command_timeout_ms.map(Duration::from_millis)
  }
}
