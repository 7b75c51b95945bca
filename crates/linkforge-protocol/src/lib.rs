//! Shared vocabulary for Linkforge.
//!
//! This crate defines the pieces every other layer agrees on:
//!
//! - **Types** ([`SessionId`], [`OwnerId`]): the identities that travel
//!   through cookies, headers, tokens, and snapshot files.
//! - **Credentials** ([`Credential`]): how a caller's proof of identity is
//!   encoded at the HTTP boundary and decoded back before it reaches the
//!   session manager.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how records are converted
//!   to/from bytes (used by snapshot persistence).
//! - **Errors** ([`ProtocolError`]): what can go wrong while encoding or
//!   decoding.
//!
//! # Architecture
//!
//! ```text
//! HTTP request (cookie / header) → Protocol (Credential) → Session (owner identity)
//! ```

mod codec;
mod credential;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use credential::Credential;
pub use error::ProtocolError;
pub use types::{OwnerId, SessionId};
