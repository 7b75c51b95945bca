//! Credentials as they arrive at the HTTP boundary.
//!
//! A caller proves who they are in one of two ways:
//!
//! - a **renewable token** (`Authorization: Bearer <token>`), which the
//!   session manager validates and rotates on every use;
//! - a **session pair** (cookie or `X-Auth` header) holding
//!   `<session_id><owner_id>` with no delimiter. Session ids have a fixed
//!   length ([`SessionId::LEN`]), so the first 32 characters are the
//!   session and the rest is the claimed owner.
//!
//! This module only decodes; deciding whether the credential is valid is
//! the session layer's job.

use crate::{OwnerId, ProtocolError, SessionId};

/// A decoded caller credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A renewable token, still opaque at this layer.
    Token(String),

    /// A session reference plus the owner the caller claims to be.
    SessionPair {
        session_id: SessionId,
        owner_id: OwnerId,
    },
}

impl Credential {
    /// Decodes a `<session_id><owner_id>` pair as carried in the auth
    /// cookie or the `X-Auth` header.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidCredential`] if the value is too
    /// short to contain a session id plus a non-empty owner id.
    ///
    /// ```rust
    /// use linkforge_protocol::{Credential, OwnerId};
    ///
    /// let raw = "0123456789abcdef0123456789abcdefu-42";
    /// let Credential::SessionPair { owner_id, .. } = Credential::parse_pair(raw).unwrap() else {
    ///     unreachable!()
    /// };
    /// assert_eq!(owner_id, OwnerId::new("u-42"));
    /// ```
    pub fn parse_pair(raw: &str) -> Result<Self, ProtocolError> {
        let raw = raw.trim();
        // `split_at_checked` refuses to cut inside a multi-byte character,
        // so hostile input can't panic us.
        let Some((session, owner)) = raw.split_at_checked(SessionId::LEN) else {
            return Err(ProtocolError::InvalidCredential(format!(
                "expected at least {} characters",
                SessionId::LEN + 1
            )));
        };
        if owner.is_empty() {
            return Err(ProtocolError::InvalidCredential("missing owner id".into()));
        }
        Ok(Self::SessionPair {
            session_id: SessionId::new(session),
            owner_id: OwnerId::new(owner),
        })
    }

    /// Encodes a session pair the way [`parse_pair`](Self::parse_pair)
    /// expects it.
    pub fn encode_pair(session_id: &SessionId, owner_id: &OwnerId) -> String {
        format!("{}{}", session_id.as_str(), owner_id.as_str())
    }

    /// Extracts the token from an `Authorization` header value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidCredential`] for any scheme other
    /// than `Bearer`, or an empty token.
    pub fn parse_bearer(header: &str) -> Result<Self, ProtocolError> {
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ProtocolError::InvalidCredential("expected Bearer scheme".into()))?
            .trim();
        if token.is_empty() {
            return Err(ProtocolError::InvalidCredential("empty bearer token".into()));
        }
        Ok(Self::Token(token.to_string()))
    }

    /// The session this credential points at, when it names one directly.
    /// Tokens have to be decoded by the session layer first.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Token(_) => None,
            Self::SessionPair { session_id, .. } => Some(session_id),
        }
    }
}
