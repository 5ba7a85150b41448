//! MPV IPC client - spawns and controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, spawning and exit supervision
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets elsewhere)
//! - `frame.rs` - Newline-delimited JSON framing
//! - `protocol.rs` - JSON command/response/event types
//! - `request.rs` - In-flight request correlation
//! - `events.rs` - Named-event listeners
//! - `observe.rs` - Property observation
//! - `client.rs` - High-level MPV client tying it together
//! - `registry.rs` - Closing every live client at shutdown
//!
//! ```no_run
//! # async fn demo() -> Result<(), mpv_ipc::MpvError> {
//! use mpv_ipc::{ClientConfig, MpvClient};
//!
//! let mpv = MpvClient::spawn(ClientConfig::default())?;
//! let version = mpv.command("get_version", vec![]).await?;
//! mpv.set("volume", 50).await?;
//! let watch = mpv.observe("volume", |v| println!("volume is now {}", v)).await?;
//! watch.unobserve().await?;
//! mpv.close();
//! # let _ = version;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod events;
mod frame;
mod ipc;
mod observe;
mod process;
mod protocol;
mod registry;
mod request;

pub use client::{MpvClient, CONNECT_EVENT, ERROR_EVENT};
pub use config::ClientConfig;
pub use error::MpvError;
pub use events::{EventBus, Subscription};
pub use frame::{DecodeError, FrameDecoder};
pub use ipc::ConnectionState;
pub use observe::Observation;
pub use process::{default_ipc_path, find_mpv, mpv_args, ProcessError};
pub use protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse, PropertyChange, PROPERTY_CHANGE};
pub use registry::ClientRegistry;
