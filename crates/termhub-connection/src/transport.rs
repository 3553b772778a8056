//! The socket seam between the connection state machine and real I/O

use termhub_types::{AuthorizationError, TermhubError, TransportError};

/// Identity of one physical socket
///
/// Every open gets a fresh id, so events from a socket that has since been
/// replaced can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inbound payload, text frames and binary frames kept apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Binary(Vec<u8>),
}

impl Incoming {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Incoming::Text(text) => text.as_bytes(),
            Incoming::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Incoming::Text(text) => Some(text),
            Incoming::Binary(_) => None,
        }
    }
}

/// Why a socket failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFailure {
    Transport(TransportError),
    Unauthorized(AuthorizationError),
}

impl From<SocketFailure> for TermhubError {
    fn from(failure: SocketFailure) -> Self {
        match failure {
            SocketFailure::Transport(e) => e.into(),
            SocketFailure::Unauthorized(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(Incoming),
    Closed { code: Option<u16>, reason: String },
    Error(SocketFailure),
}

impl SocketEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SocketEvent::Opened => "open",
            SocketEvent::Message(_) => "message",
            SocketEvent::Closed { .. } => "close",
            SocketEvent::Error(_) => "error",
        }
    }
}

/// An event tagged with the socket it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub socket: SocketId,
    pub event: SocketEvent,
}

impl TransportEvent {
    pub fn new(socket: SocketId, event: SocketEvent) -> Self {
        Self { socket, event }
    }
}

/// Opens, writes and closes sockets on behalf of the connection manager
///
/// Implementations report progress asynchronously as [`TransportEvent`]s; an
/// `open` that fails is reported as an `Error` event, never as a return value.
/// A socket reports at most one terminal event (`Closed` or `Error`).
pub trait Transport: Send {
    fn open(&mut self, socket: SocketId, url: &str);
    fn send(&mut self, socket: SocketId, frame: &str) -> Result<(), TransportError>;
    fn close(&mut self, socket: SocketId);
}
