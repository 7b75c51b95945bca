//! Session lifecycle management for Linkforge.
//!
//! This crate owns everything that happens to a login after the password
//! check succeeds:
//!
//! 1. **Storage**: a concurrent keyed store of [`Session`] records
//!    ([`SessionStore`] trait, [`MemoryStore`] reference implementation)
//! 2. **Persistence**: atomic snapshot dump/restore ([`snapshot`])
//! 3. **Token protocol**: signed renewable tokens where only the most
//!    recently issued one is accepted ([`TokenSigner`],
//!    [`SessionManager::validate_and_renew`])
//! 4. **Background jobs**: periodic GC and snapshot dumps, owned per
//!    manager and toggled at runtime
//! 5. **Authentication hook**: the [`Authenticator`] trait the HTTP gate
//!    calls
//!
//! # How it fits in the stack
//!
//! ```text
//! HTTP gate (above)   ← asks the manager whether a credential is valid
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Tick (beside)       ← drives the GC and snapshot jobs
//! Protocol (below)    ← SessionId, OwnerId, Credential, JsonCodec
//! ```

mod auth;
mod error;
mod manager;
mod session;
pub mod snapshot;
mod store;
mod token;

pub use auth::{Authenticator, Identity};
pub use error::{PersistenceError, SessionError};
pub use manager::{Job, Renewal, SessionCheck, SessionManager, SessionQuery};
pub use session::{NEVER_EXPIRES, Session, SessionConfig, expiry_after, now_secs};
pub use store::{MemoryStore, SessionStore};
pub use token::TokenSigner;

pub use linkforge_tick::{TickConfig, TickMetrics};
