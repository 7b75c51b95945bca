//! The auth gate: axum middleware that turns a request credential into an
//! [`Identity`].
//!
//! Credential lookup order:
//!
//! 1. `Authorization: Bearer <token>`: a renewable token. On success the
//!    rotated token comes back in the `X-Auth-Token` response header.
//! 2. Cookie `linkforge-auth=<session_id><owner_id>`
//! 3. Header `X-Auth: <session_id><owner_id>`
//!
//! Every authentication failure gets the same `401 {"error":"UNAUTHORIZED"}`
//! so a caller can't tell whether a session exists, expired, or belongs
//! to someone else. Only server-side failures become a 500.
//!
//! # Usage
//!
//! ```rust,ignore
//! let gate = AuthGate::new(manager, GateConfig::default());
//! let app = Router::new()
//!     .route("/links", get(list_links))
//!     .layer(axum::middleware::from_fn_with_state(gate, auth_gate));
//!
//! async fn list_links(Extension(identity): Extension<Identity>) -> String {
//!     format!("links of {}", identity.owner_id)
//! }
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use linkforge_protocol::{Credential, ProtocolError};
use linkforge_session::{Authenticator, Identity, SessionError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

/// Where the gate looks for credentials and how strict it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Prefix of the auth cookie; the cookie is `<prefix>auth`.
    ///
    /// Default: `"linkforge-"`.
    pub cookie_prefix: String,

    /// Header carrying a `<session_id><owner_id>` pair.
    ///
    /// Default: `"X-Auth"`.
    pub header_name: String,

    /// Response header that carries a renewed token.
    ///
    /// Default: `"X-Auth-Token"`.
    pub renewed_token_header: String,

    /// Reject requests without a valid credential (`true`), or forward
    /// them with no [`Identity`] attached (`false`).
    ///
    /// Default: `true`.
    pub strict: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cookie_prefix: "linkforge-".to_string(),
            header_name: "X-Auth".to_string(),
            renewed_token_header: "X-Auth-Token".to_string(),
            strict: true,
        }
    }
}

impl GateConfig {
    /// Full name of the auth cookie.
    pub fn cookie_name(&self) -> String {
        format!("{}auth", self.cookie_prefix)
    }

    /// Set the cookie prefix.
    pub fn with_cookie_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cookie_prefix = prefix.into();
        self
    }

    /// Set the session-pair header.
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Switch between strict and lenient mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

// ---------------------------------------------------------------------------
// Rejection
// ---------------------------------------------------------------------------

/// Why the gate refused a request.
#[derive(Debug, thiserror::Error)]
pub enum GateRejection {
    /// No usable credential, or it didn't check out.
    #[error("unauthorized")]
    Unauthorized,

    /// The authenticator itself failed.
    #[error("authentication backend failed: {0}")]
    Internal(SessionError),
}

impl From<SessionError> for GateRejection {
    fn from(e: SessionError) -> Self {
        if e.is_auth_failure() {
            debug!(error = %e, "credential rejected");
            Self::Unauthorized
        } else {
            Self::Internal(e)
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Internal(e) => {
                error!(error = %e, "auth gate failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };
        (status, Json(serde_json::json!({ "error": code }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// AuthGate
// ---------------------------------------------------------------------------

/// Middleware state: the authenticator plus the parsed config.
pub struct AuthGate<A> {
    authenticator: Arc<A>,
    config: Arc<GateConfig>,
    renewed_header: Option<HeaderName>,
}

impl<A> Clone for AuthGate<A> {
    fn clone(&self) -> Self {
        Self {
            authenticator: Arc::clone(&self.authenticator),
            config: Arc::clone(&self.config),
            renewed_header: self.renewed_header.clone(),
        }
    }
}

impl<A: Authenticator> AuthGate<A> {
    /// A gate that asks `authenticator` about every request.
    pub fn new(authenticator: Arc<A>, config: GateConfig) -> Self {
        let renewed_header = match HeaderName::from_bytes(config.renewed_token_header.as_bytes()) {
            Ok(name) => Some(name),
            Err(_) => {
                warn!(
                    header = %config.renewed_token_header,
                    "invalid renewed-token header name, renewed tokens will not be returned"
                );
                None
            }
        };
        Self {
            authenticator,
            config: Arc::new(config),
            renewed_header,
        }
    }

    /// The gate's configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Wrap every route of `router` with this gate.
    pub fn protect(self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, auth_gate::<A>))
    }

    /// Resolve the caller's identity from request headers.
    pub async fn identify(&self, headers: &HeaderMap) -> Result<Identity, GateRejection> {
        let credential = match extract_credential(headers, &self.config) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!("request carries no credential");
                return Err(GateRejection::Unauthorized);
            }
            Err(e) => {
                debug!(error = %e, "undecodable credential");
                return Err(GateRejection::Unauthorized);
            }
        };
        Ok(self.authenticator.authenticate(&credential).await?)
    }
}

/// The middleware function. Use with
/// [`axum::middleware::from_fn_with_state`].
pub async fn auth_gate<A: Authenticator>(
    State(gate): State<AuthGate<A>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GateRejection> {
    let identity = match gate.identify(request.headers()).await {
        Ok(identity) => identity,
        Err(GateRejection::Unauthorized) if !gate.config.strict => {
            return Ok(next.run(request).await);
        }
        Err(rejection) => return Err(rejection),
    };

    let renewed = identity.renewed_token.clone();
    request.extensions_mut().insert(identity);
    let mut response = next.run(request).await;

    if let (Some(name), Some(token)) = (gate.renewed_header, renewed) {
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                response.headers_mut().insert(name, value);
            }
            Err(e) => warn!(error = %e, "renewed token is not a valid header value"),
        }
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Credential extraction
// ---------------------------------------------------------------------------

/// Pull the first credential out of `headers`, in gate order: bearer
/// token, cookie, session-pair header. `Ok(None)` when none is present.
///
/// # Errors
/// [`ProtocolError::InvalidCredential`] when the first credential found is
/// malformed. Later sources are not consulted in that case.
pub fn extract_credential(headers: &HeaderMap, config: &GateConfig) -> Result<Option<Credential>, ProtocolError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        return Credential::parse_bearer(header_str(value)?).map(Some);
    }

    let cookie_name = config.cookie_name();
    for value in headers.get_all(header::COOKIE) {
        if let Some(raw) = find_cookie(header_str(value)?, &cookie_name) {
            return Credential::parse_pair(raw).map(Some);
        }
    }

    if let Some(value) = headers.get(config.header_name.as_str()) {
        return Credential::parse_pair(header_str(value)?).map(Some);
    }

    Ok(None)
}

fn header_str(value: &HeaderValue) -> Result<&str, ProtocolError> {
    value
        .to_str()
        .map_err(|_| ProtocolError::InvalidCredential("header is not visible ASCII".into()))
}

/// Value of cookie `name` in a `Cookie:` header (`a=1; b=2`).
fn find_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
