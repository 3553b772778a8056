//! Core types shared across all termhub crates
//!
//! Wire frames, connection states, geometry and the error taxonomy used by the
//! connection, routing and session layers.

use serde::{Deserialize, Serialize};

pub mod error;
pub mod protocol;

pub use error::{
    AuthorizationError, CapacityError, ProtocolError, ResourceDisposalError, TermhubError,
    TransportError,
};
pub use protocol::{
    stty_command, ChannelFrame, CommandRequest, ControlFrame, CorrelationId, ShellInput,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of concurrently open terminal sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Reconnect attempts allowed by a bare connection
pub const DEFAULT_RECONNECT_LIMIT: u32 = 3;

/// Delay between reconnect attempts of a bare connection
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;

/// Reconnect attempts used by the terminal client
pub const TERMINAL_RECONNECT_LIMIT: u32 = 10;

/// Reconnect delay used by the terminal client
pub const TERMINAL_RECONNECT_INTERVAL_MS: u64 = 10_000;

/// Window used to coalesce container resize bursts
pub const RESIZE_DEBOUNCE_MS: u64 = 600;

/// Path prefix under which socket endpoints are mounted
pub const DEFAULT_WS_PREFIX: &str = "ws";

/// Endpoint serving the interactive shell
pub const DEFAULT_TERMINAL_ENDPOINT: &str = "terminal/pty0/";

/// Label used for session tabs
pub const SHELL_LABEL: &str = "/bin/zsh";

/// Terminal size assumed before a view has been fitted
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle of the underlying socket, numbered like the WebSocket readyState
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Connecting => "Connecting",
            ReadyState::Open => "Open",
            ReadyState::Closing => "Closing",
            ReadyState::Closed => "Closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ReadyState::Open)
    }
}

impl Default for ReadyState {
    fn default() -> Self {
        ReadyState::Closed
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
