//! MPV process detection, spawning and supervision.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn {path:?}: {source}")]
  SpawnFailed {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Could not remove stale IPC socket {path}: {source}")]
  StaleSocket {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Generate a fresh IPC socket/pipe address for one client.
pub fn default_ipc_path() -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  #[cfg(windows)]
  {
    format!(r"\\.\pipe\mpv-ipc-{}", suffix)
  }
  #[cfg(not(windows))]
  {
    let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    dir
      .join(format!("mpv-ipc-{}.sock", suffix))
      .to_string_lossy()
      .into_owned()
  }
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Arguments MPV is started with: idle, quiet, headless, no user config,
/// IPC server at `ipc_path`, followed by `extra_args`.
pub fn mpv_args(ipc_path: &str, extra_args: &[String]) -> Vec<String> {
  let mut args = vec![
    "--idle".to_string(),
    "--really-quiet".to_string(),
    "--no-terminal".to_string(),
    "--no-video".to_string(),
    "--no-config".to_string(),
    format!("--input-ipc-server={}", ipc_path),
  ];
  args.extend(extra_args.iter().cloned());
  args
}

/// Spawn MPV process with IPC server enabled.
pub fn spawn_mpv(mpv_exe: &Path, ipc_path: &str, extra_args: &[String]) -> Result<Child, ProcessError> {
  log::info!("Spawning MPV: {:?} with IPC: {}", mpv_exe, ipc_path);
  if !extra_args.is_empty() {
    log::info!("Extra MPV args: {:?}", extra_args);
  }

  let mut cmd = Command::new(mpv_exe);
  cmd
    .args(mpv_args(ipc_path, extra_args))
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .kill_on_drop(true);

  #[cfg(windows)]
  {
    // CREATE_NO_WINDOW
    cmd.creation_flags(0x0800_0000);
  }

  cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
    path: mpv_exe.to_path_buf(),
    source,
  })
}

/// Remove a leftover IPC socket file. A missing file is not an error.
pub fn remove_ipc_file(path: &str) -> std::io::Result<()> {
  #[cfg(not(windows))]
  {
    match std::fs::remove_file(path) {
      Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
      _ => {}
    }
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  let _ = path;
  Ok(())
}

/// A running MPV process watched by a supervisor task.
pub(crate) struct ProcessHandle {
  pid: Option<u32>,
  cancel: CancellationToken,
  _task: JoinHandle<()>,
}

impl ProcessHandle {
  pub fn pid(&self) -> Option<u32> {
    self.pid
  }

  /// Kill the process. The supervisor reaps it in the background.
  pub fn terminate(self) {
    log::info!("Killing MPV process (pid: {:?})", self.pid);
    self.cancel.cancel();
  }
}

/// Watch `child` until it exits or `cancel` fires.
///
/// `on_exit` runs only when the process ends on its own; a cancelled
/// supervisor kills the child and returns quietly.
pub(crate) fn supervise<F>(mut child: Child, cancel: CancellationToken, on_exit: F) -> ProcessHandle
where
  F: FnOnce(String) + Send + 'static,
{
  let pid = child.id();
  let token = cancel.clone();

  let task = tokio::spawn(async move {
    let exited: Option<std::io::Result<ExitStatus>> = tokio::select! {
      status = child.wait() => Some(status),
      _ = token.cancelled() => None,
    };

    match exited {
      Some(Ok(status)) => {
        log::warn!("MPV process exited with: {}", status);
        on_exit(status.to_string());
      }
      Some(Err(e)) => {
        log::error!("wait() failed: {}", e);
        on_exit(e.to_string());
      }
      None => match child.kill().await {
        Ok(()) => log::info!("MPV process killed"),
        Err(e) => log::error!("kill() failed: {}", e),
      },
    }
  });

  ProcessHandle {
    pid,
    cancel,
    _task: task,
  }
}
