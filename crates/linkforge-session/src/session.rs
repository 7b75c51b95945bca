//! Session types: the record the store keeps for every login.
//!
//! A "session" is the server's record of an authenticated principal. It
//! tracks:
//! - WHO owns it (`OwnerId`)
//! - WHEN it was created and when it stops being valid (epoch seconds)
//! - WHICH renewable token is currently the only accepted one
//!
//! Timestamps are wall-clock epoch seconds rather than `Instant`s because
//! they have to survive a snapshot and a process restart.

use std::fmt;
use std::time::Duration;

use linkforge_protocol::{OwnerId, SessionId};
use serde::{Deserialize, Serialize};

/// `expires_on` value for a session that never expires.
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Current wall-clock time in epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Absolute expiry for a session created at `now` that should live for
/// `ttl`. A zero `ttl` means "never expires". Sub-second remainders round
/// up, so a non-zero `ttl` never yields an already-dead session.
pub fn expiry_after(now: i64, ttl: Duration) -> i64 {
    if ttl.is_zero() {
        return NEVER_EXPIRES;
    }
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    now.saturating_add(secs)
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
///
/// `#[serde(default)]` lets a config file set only the fields it cares
/// about; everything else falls back to [`SessionConfig::default`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of sessions made with
    /// [`create_default`](crate::SessionManager::create_default), in
    /// seconds. 0 means sessions never expire.
    ///
    /// Default: 86400 (24 hours).
    pub default_ttl_secs: u64,

    /// HMAC key for renewable tokens.
    ///
    /// When empty, the manager generates a random 32-byte key at startup.
    /// Tokens signed with a random key stop verifying after a restart, so
    /// set this when tokens must outlive the process.
    pub token_secret: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 24 * 60 * 60,
            token_secret: String::new(),
        }
    }
}

impl SessionConfig {
    /// Set the default session lifetime.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the token signing secret.
    pub fn with_token_secret(mut self, secret: impl Into<String>) -> Self {
        self.token_secret = secret.into();
        self
    }

    /// The default lifetime as a `Duration`.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("default_ttl_secs", &self.default_ttl_secs)
            .field("token_secret", &redacted(&self.token_secret))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single login.
///
/// The store owns the canonical copy. Every accessor hands out clones, so
/// mutating a `Session` you got back changes nothing until you pass it to
/// `update`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Primary key, unique within a store.
    pub id: SessionId,

    /// The principal this session authenticates.
    pub owner_id: OwnerId,

    /// Creation time, epoch seconds.
    pub created_at: i64,

    /// Expiry time, epoch seconds. [`NEVER_EXPIRES`] for no expiry.
    pub expires_on: i64,

    /// The one renewable token currently accepted for this session, or
    /// empty if none has been issued.
    #[serde(default)]
    pub last_token: String,
}

impl Session {
    /// A fresh session with no token issued yet.
    pub fn new(id: SessionId, owner_id: OwnerId, created_at: i64, expires_on: i64) -> Self {
        Self {
            id,
            owner_id,
            created_at,
            expires_on,
            last_token: String::new(),
        }
    }

    /// `true` once `now` has reached `expires_on`. Expired sessions may
    /// still be stored until GC or the next authenticating read removes
    /// them, but they never authenticate.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_on <= now
    }

    /// `true` if this session has no expiry.
    pub fn never_expires(&self) -> bool {
        self.expires_on == NEVER_EXPIRES
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("created_at", &self.created_at)
            .field("expires_on", &self.expires_on)
            .field("last_token", &redacted(&self.last_token))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<none>" } else { "<redacted>" }
}
