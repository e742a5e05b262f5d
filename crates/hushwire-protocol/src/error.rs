//! Protocol error types

use std::fmt;

use hushwire_crypto::CryptoError;
use thiserror::Error;

use crate::handshake::HandshakeState;

/// Result type alias
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why a session ended in the failed state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// Peer hello signature did not verify under its claimed identity
    AuthenticationRejected,
    /// Identity or ephemeral key generation failed
    KeyGeneration(String),
    /// Relay error or rejected connection
    Transport(String),
    /// Peer or relay ended the session
    Disconnected,
    /// Event arrived in a state that cannot accept it
    ProtocolViolation(String),
    /// Local side closed the session
    Closed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AuthenticationRejected => write!(f, "authentication-rejected"),
            FailureReason::KeyGeneration(msg) => write!(f, "key-generation: {}", msg),
            FailureReason::Transport(msg) => write!(f, "transport: {}", msg),
            FailureReason::Disconnected => write!(f, "disconnected"),
            FailureReason::ProtocolViolation(msg) => write!(f, "protocol-violation: {}", msg),
            FailureReason::Closed => write!(f, "closed"),
        }
    }
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Relay failure, rejected connection or peer disconnect
    #[error("Transport error: {0}")]
    Transport(String),

    /// Handshake could not be authenticated
    #[error("Authentication failed: {0}")]
    Authentication(FailureReason),

    /// Inbound envelope failed its integrity check
    #[error("Envelope failed integrity check")]
    Integrity,

    /// Key or entropy generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Operation not allowed in the current handshake state
    #[error("Operation {operation} not allowed in state {state:?}")]
    InvalidState {
        /// State the session was in
        state: HandshakeState,
        /// Rejected operation
        operation: &'static str,
    },

    /// Peer sent something the protocol does not allow
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Authenticated plaintext that does not decode as content
    #[error("Malformed content: {0}")]
    Malformed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session has failed or been closed
    #[error("Session closed")]
    SessionClosed,

    /// Other crypto error
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<CryptoError> for ProtocolError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::IntegrityCheckFailed => ProtocolError::Integrity,
            e if e.is_key_generation() => ProtocolError::KeyGeneration(e.to_string()),
            e => ProtocolError::Crypto(e),
        }
    }
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl ProtocolError {
    /// Whether the error ended the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(_)
                | ProtocolError::Authentication(_)
                | ProtocolError::KeyGeneration(_)
                | ProtocolError::ProtocolViolation(_)
                | ProtocolError::SessionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_classification() {
        assert!(matches!(
            ProtocolError::from(CryptoError::IntegrityCheckFailed),
            ProtocolError::Integrity
        ));
        assert!(matches!(
            ProtocolError::from(CryptoError::EntropyNotSeeded),
            ProtocolError::KeyGeneration(_)
        ));
        assert!(matches!(
            ProtocolError::from(CryptoError::StaleAdvance),
            ProtocolError::Crypto(CryptoError::StaleAdvance)
        ));
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::AuthenticationRejected.to_string(),
            "authentication-rejected"
        );
        let err = ProtocolError::Authentication(FailureReason::AuthenticationRejected);
        assert_eq!(err.to_string(), "Authentication failed: authentication-rejected");
        assert!(err.is_fatal());
        assert!(!ProtocolError::Integrity.is_fatal());
    }
}
