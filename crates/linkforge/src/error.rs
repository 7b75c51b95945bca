//! Unified error type for the Linkforge workspace.

use linkforge_protocol::ProtocolError;
use linkforge_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `linkforge` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum LinkforgeError {
    /// A credential or snapshot failed to encode/decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (lookup, token, job, snapshot).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Binding the listener or serving HTTP failed.
    #[error("server I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
