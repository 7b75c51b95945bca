//! Signed renewable tokens.
//!
//! Wire format: `<session_id>.<nonce>.<signature>`
//!
//! - `session_id`: the session the token is bound to, as stored (opaque;
//!   it may itself contain dots)
//! - `nonce`: 16 random bytes, hex, so every issued token is distinct
//! - `signature`: hex HMAC-SHA256 of `<session_id>.<nonce>`
//!
//! The signature only proves the token came from this server. Whether it
//! is still the *current* token for its session is decided by comparing it
//! with `Session::last_token`.

use std::fmt;

use hmac::{Hmac, Mac};
use linkforge_protocol::SessionId;
use rand::Rng;
use sha2::Sha256;

use crate::SessionError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 16;

/// Issues and verifies session tokens with one HMAC key.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl TokenSigner {
    /// A signer keyed with `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    /// A signer keyed with 32 fresh random bytes.
    pub fn random() -> Self {
        let key: [u8; 32] = rand::rng().random();
        Self::new(key)
    }

    /// Mint a new token bound to `session_id`.
    pub fn issue(&self, session_id: &SessionId) -> Result<String, SessionError> {
        let nonce: [u8; NONCE_BYTES] = rand::rng().random();
        let payload = format!("{}.{}", session_id.as_str(), hex::encode(nonce));

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }

    /// Check the shape and signature of `token` and return the session it
    /// is bound to.
    ///
    /// # Errors
    /// [`SessionError::InvalidToken`] for anything malformed or unsigned.
    pub fn verify(&self, token: &str) -> Result<SessionId, SessionError> {
        // Split from the right: nonce and signature never contain a dot.
        let (payload, signature) = token.rsplit_once('.').ok_or(SessionError::InvalidToken)?;
        let (session, nonce) = payload.rsplit_once('.').ok_or(SessionError::InvalidToken)?;

        if session.is_empty() || !is_hex_of_len(nonce, NONCE_BYTES * 2) {
            return Err(SessionError::InvalidToken);
        }
        let session_id = SessionId::new(session);
        let signature = hex::decode(signature).map_err(|_| SessionError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::InvalidToken)?;

        Ok(session_id)
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.key).map_err(SessionError::Signing)
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}
