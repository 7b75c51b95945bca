//! # Linkforge
//!
//! Session-lifecycle core for the Linkforge URL shortener.
//!
//! The user and link APIs are ordinary CRUD handlers; what they share is
//! "who is calling?". Linkforge answers that with a concurrent session
//! store, a rotating-token protocol, background expiry and snapshotting,
//! and an axum middleware that puts it all in front of your routes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{Extension, Router, routing::get};
//! use linkforge::prelude::*;
//!
//! async fn me(Extension(identity): Extension<Identity>) -> String {
//!     identity.owner_id.to_string()
//! }
//!
//! # async fn run() -> Result<(), LinkforgeError> {
//! linkforge::telemetry::init_tracing("info");
//!
//! let server = LinkforgeServer::builder().bind("0.0.0.0:8080").build().await?;
//! let app = server.protect(Router::new().route("/me", get(me)));
//! server.run(app).await
//! # }
//! ```

mod error;
pub mod gate;
mod server;
pub mod telemetry;

pub use error::LinkforgeError;
pub use server::{LinkforgeServer, LinkforgeServerBuilder, ServerConfig, SnapshotConfig};

pub use linkforge_protocol as protocol;
pub use linkforge_session as session;

/// Everything a typical embedding needs.
pub mod prelude {
    pub use crate::LinkforgeError;
    pub use crate::gate::{AuthGate, GateConfig, GateRejection, auth_gate};
    pub use crate::server::{LinkforgeServer, LinkforgeServerBuilder, ServerConfig, SnapshotConfig};
    pub use linkforge_protocol::{Credential, OwnerId, SessionId};
    pub use linkforge_session::{
        Authenticator, Identity, Job, Renewal, Session, SessionCheck, SessionConfig, SessionError, SessionManager,
    };
}
