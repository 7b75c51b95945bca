//! Authentication hook used by the HTTP gate.
//!
//! The gate doesn't know about stores or tokens. It decodes a
//! [`Credential`] from the request and hands it to an [`Authenticator`],
//! which answers with an [`Identity`] or an error. [`SessionManager`]
//! is the production implementation; tests can plug in anything else.

use std::future::Future;
use std::sync::Arc;

use linkforge_protocol::{Credential, OwnerId, SessionId};
use tracing::debug;

use crate::{SessionCheck, SessionError, SessionManager, SessionStore};

/// Who a request belongs to, once its credential checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The authenticated principal.
    pub owner_id: OwnerId,
    /// The session the credential referred to.
    pub session_id: SessionId,
    /// The replacement token when a renewable token was presented. The
    /// caller must use this one next time; the one it sent is now stale.
    pub renewed_token: Option<String>,
}

/// Validates a credential and returns the caller's identity.
///
/// # Trait bounds
///
/// - `Send + Sync`: the gate shares one authenticator across every
///   request task.
/// - `'static`: it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use linkforge_protocol::{Credential, OwnerId, SessionId};
/// use linkforge_session::{Authenticator, Identity, SessionError};
///
/// /// Accepts any session pair. Only for local development.
/// struct TrustEveryone;
///
/// impl Authenticator for TrustEveryone {
///     async fn authenticate(&self, credential: &Credential) -> Result<Identity, SessionError> {
///         match credential {
///             Credential::SessionPair { session_id, owner_id } => Ok(Identity {
///                 owner_id: owner_id.clone(),
///                 session_id: session_id.clone(),
///                 renewed_token: None,
///             }),
///             Credential::Token(_) => Err(SessionError::AuthFailed("tokens not supported".into())),
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `credential`.
    ///
    /// # Returns
    /// - `Ok(Identity)`: the caller is who they claim to be
    /// - `Err(e)` with `e.is_auth_failure()`: reject as unauthenticated
    /// - any other `Err`: the check itself broke
    fn authenticate(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

impl<A: Authenticator> Authenticator for Arc<A> {
    fn authenticate(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send {
        (**self).authenticate(credential)
    }
}

/// Tokens go through the validate/renew protocol and come back rotated.
/// Session pairs get the plain ownership check, which also rejects (and
/// removes) expired sessions.
impl<S: SessionStore> Authenticator for SessionManager<S> {
    async fn authenticate(&self, credential: &Credential) -> Result<Identity, SessionError> {
        match credential {
            Credential::Token(token) => {
                let renewal = self.validate_and_renew(token)?;
                Ok(Identity {
                    owner_id: renewal.owner_id,
                    session_id: renewal.session_id,
                    renewed_token: Some(renewal.token),
                })
            }
            Credential::SessionPair {
                session_id,
                owner_id,
            } => match self.check_valid_session(session_id, owner_id)? {
                SessionCheck::Valid(session) => Ok(Identity {
                    owner_id: session.owner_id,
                    session_id: session.id,
                    renewed_token: None,
                }),
                rejected => {
                    let reason = rejected.reason();
                    debug!(%session_id, %owner_id, reason, "session pair rejected");
                    Err(SessionError::AuthFailed(reason.into()))
                }
            },
        }
    }
}
