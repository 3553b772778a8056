//! termhub: terminal sessions over a single resilient WebSocket
//!
//! The library half of the `termhub` binary. It wires the connection and
//! session crates into an async client runtime and hosts the companion PTY
//! server.

pub mod attach;
pub mod cli;
pub mod client;
pub mod config;
pub mod logging;
pub mod server;
pub mod storage;

pub use cli::{AttachArgs, Cli, Commands, ServeArgs};
pub use client::{ClientCommand, ClientEvent, ClientRuntime};
pub use config::{ClientSettings, ConfigError, FileConfig, ServerSettings};
pub use storage::FileStore;
