//! Codec trait and implementations for serializing/deserializing records.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! Snapshot persistence doesn't care HOW records are serialized; it just
//! needs something that implements the [`Codec`] trait.
//!
//! Currently we provide [`JsonCodec`]. Snapshot files are an opaque blob
//! understood by the same build, so swapping in a binary codec later only
//! touches the call site that picks the codec.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → safe to share between threads (the snapshot job runs
///   on Tokio's blocking pool while request handlers keep serving).
/// - `'static` → the codec owns everything it needs.
///
/// `DeserializeOwned` (vs plain `Deserialize`) means the result doesn't
/// borrow from the input bytes, so the read buffer can be dropped right
/// after decoding.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps snapshot files inspectable with ordinary tools, which is
/// handy when debugging a restore. It is behind the `json` feature flag
/// (enabled by default).
///
/// ## Example
///
/// ```rust
/// use linkforge_protocol::{Codec, JsonCodec, OwnerId};
///
/// let codec = JsonCodec;
/// let owner = OwnerId::new("u-42");
///
/// let bytes = codec.encode(&owner).unwrap();
/// let decoded: OwnerId = codec.decode(&bytes).unwrap();
/// assert_eq!(owner, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
