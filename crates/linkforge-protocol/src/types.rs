//! Identity types shared by every Linkforge layer.
//!
//! These travel in cookies, headers, signed tokens, and snapshot files, so
//! they live here rather than in the session crate.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// The opaque primary key of a session.
///
/// This is a "newtype wrapper" around `String`: you can't accidentally pass
/// an [`OwnerId`] where a `SessionId` is expected, even though both are
/// strings underneath.
///
/// Ids minted by the session manager are [`SessionId::LEN`] lowercase hex
/// characters (128 random bits). The fixed length is what lets the
/// `<session_id><owner_id>` credential be split without a delimiter.
///
/// `#[serde(transparent)]` serializes this as the bare string, not as
/// `{ "0": "..." }`.
///
/// A session id is half of a bearer credential, so `Display` and `Debug`
/// only print a short prefix. Use [`SessionId::as_str`] when the full value
/// is really needed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Length of a minted session id, in characters.
    pub const LEN: usize = 32;

    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the full id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if this looks like an id the manager could have minted:
    /// exactly [`Self::LEN`] lowercase hex characters.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    fn short(&self) -> &str {
        // `get` instead of slicing so a non-ASCII id can't panic here.
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.short())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionId").field(&self.short()).finish()
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// OwnerId
// ---------------------------------------------------------------------------

/// Identifier of the principal (user) that owns a session.
///
/// Linkforge never interprets it; the user store that issued it is an
/// external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wraps an owner id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the empty string, which never identifies an owner.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
