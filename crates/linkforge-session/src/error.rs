//! Error types for the session layer.

use linkforge_protocol::{ProtocolError, SessionId};

use crate::Job;

/// Errors that can occur during session management.
///
/// These cover the full lifecycle of a session: lookup, the token
/// validate/renew protocol, background jobs, and snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists with the given id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The token is malformed, was not signed by this server, or its
    /// signature doesn't match.
    #[error("invalid session token")]
    InvalidToken,

    /// The session behind the token has expired or was revoked because a
    /// superseded token was presented.
    #[error("session token expired")]
    ExpiredToken,

    /// A session was requested for an empty owner id.
    #[error("owner id must not be empty")]
    InvalidOwner,

    /// The background job is already running on this manager.
    #[error("{0} is already running")]
    AlreadyRunning(Job),

    /// The background job was asked to stop but isn't running.
    #[error("{0} is not running")]
    NotRunning(Job),

    /// Writing or reading a snapshot failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The requester tried to act on a session owned by someone else.
    #[error("session {0} belongs to another owner")]
    Forbidden(SessionId),

    /// An [`Authenticator`](crate::Authenticator) rejected a credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A background job was requested outside a Tokio runtime.
    #[error("no Tokio runtime available for background jobs")]
    NoRuntime,

    /// The token signing key could not be used.
    #[error("token signing key rejected: {0}")]
    Signing(hmac::digest::InvalidLength),

    /// A non-memory [`SessionStore`](crate::SessionStore) backend failed.
    #[error("session storage failed: {0}")]
    Storage(String),
}

impl SessionError {
    /// `true` for errors that mean "this caller is not authenticated", as
    /// opposed to the server being broken.
    ///
    /// The HTTP gate answers all of these with the same 401 so a caller
    /// can't tell a wrong owner from an expired or unknown session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::InvalidToken
                | Self::ExpiredToken
                | Self::Forbidden(_)
                | Self::AuthFailed(_)
        )
    }
}

/// Why a snapshot dump or restore failed.
///
/// Either way the previous snapshot file and the live store are left as
/// they were.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The file couldn't be read, written, synced, or renamed.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The records couldn't be encoded, or the file didn't decode.
    #[error("snapshot encoding failed: {0}")]
    Codec(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_auth_failure_splits_caller_faults_from_server_faults() {
        assert!(SessionError::InvalidToken.is_auth_failure());
        assert!(SessionError::ExpiredToken.is_auth_failure());
        assert!(SessionError::NotFound(SessionId::new("x")).is_auth_failure());
        assert!(SessionError::AuthFailed("nope".into()).is_auth_failure());

        assert!(!SessionError::NoRuntime.is_auth_failure());
        assert!(!SessionError::InvalidOwner.is_auth_failure());
        assert!(!SessionError::Storage("down".into()).is_auth_failure());
        let io = std::io::Error::other("disk full");
        assert!(!SessionError::from(PersistenceError::from(io)).is_auth_failure());
    }

    #[test]
    fn test_display_includes_job_name() {
        let err = SessionError::AlreadyRunning(Job::Gc);
        assert_eq!(err.to_string(), "auto-gc is already running");
    }
}
