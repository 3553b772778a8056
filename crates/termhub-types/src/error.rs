use thiserror::Error;

/// Recoverable socket failure; the reconnect policy decides what happens next
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open socket to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("socket i/o failed: {0}")]
    Io(String),
    #[error("socket is not open")]
    NotOpen,
}

/// Permanent refusal by the server; further reconnects are suppressed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unauthorized: {reason}")]
pub struct AuthorizationError {
    pub reason: String,
}

/// Malformed or unroutable frame; dropped without touching the connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    InvalidJson(String),
    #[error("frame is missing routing field '{0}'")]
    MissingField(&'static str),
    #[error("routing field '{0}' has the wrong type")]
    InvalidField(&'static str),
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
}

/// Session creation refused because the registry is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("maximum concurrent sessions ({max}) reached")]
pub struct CapacityError {
    pub max: usize,
}

/// A terminal view failed while being torn down
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to dispose view of session {session_id}: {reason}")]
pub struct ResourceDisposalError {
    pub session_id: u64,
    pub reason: String,
}

/// Umbrella error covering the whole taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermhubError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Disposal(#[from] ResourceDisposalError),
}

impl TermhubError {
    /// Whether retrying can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, TermhubError::Authorization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authorization_is_permanent() {
        let auth: TermhubError = AuthorizationError {
            reason: "Unauthorized".into(),
        }
        .into();
        let transport: TermhubError = TransportError::NotOpen.into();
        let capacity: TermhubError = CapacityError { max: 10 }.into();

        assert!(auth.is_permanent());
        assert!(!transport.is_permanent());
        assert!(!capacity.is_permanent());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CapacityError { max: 10 }.to_string(),
            "maximum concurrent sessions (10) reached"
        );
        assert_eq!(
            ProtocolError::MissingField("command").to_string(),
            "frame is missing routing field 'command'"
        );
    }
}
