//! Error types for the protocol layer.
//!
//! Each crate in Linkforge defines its own error enum. When you see a
//! `ProtocolError`, the problem is in encoding or decoding, not in session
//! bookkeeping or I/O.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes: truncated snapshot files, hand-edited JSON, or a file
    /// written by an incompatible build.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A credential presented at the HTTP boundary could not be decoded
    /// into a session reference.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}
