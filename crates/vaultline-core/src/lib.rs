//! Vaultline trust and session-integrity core.
//!
//! Pure authorization logic for an end-to-end-encrypted messenger. This crate
//! never sees message plaintext and performs no I/O: time and randomness come
//! through the [`env::Environment`] trait, and store lookups are delegated to
//! the server crate's collaborator traits.
//!
//! # Components
//!
//! - [`credential`]: bearer credential sign/verify with the algorithm and key
//!   id pinned by configuration (algorithm-confusion resistant)
//! - [`session`]: per-connection channel session state machine with a
//!   sliding-window reauth rate limiter
//! - [`replay_window`]: bounded in-process fallback map for replay
//!   suppression when the shared cache is unavailable
//! - [`channel_id`]: channel identifier well-formedness checks
//!
//! Credential expiry uses wall-clock UNIX time (the token format embeds
//! absolute timestamps); everything else measures elapsed time against the
//! environment's monotonic clock so tests can run on virtual time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel_id;
pub mod credential;
pub mod env;
pub mod error;
pub mod replay_window;
pub mod session;

pub use credential::{
    ClaimsSpec, CodecConfig, CredentialAlgorithm, CredentialCodec, KeyMaterial, VerifiedClaims,
};
pub use error::{AuthError, ConfigError, SessionError};
pub use replay_window::ReplayWindow;
pub use session::{ChannelSession, SessionConfig, SessionState};
