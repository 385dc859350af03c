//! Vaultline server components.
//!
//! Server-side glue around [`vaultline_core`]'s pure authorization logic:
//! store seams with in-memory implementations, the revocation oracle, the
//! prekey bundle broker, the replay guard, and the sans-IO [`SessionDriver`]
//! that a transport runtime feeds events and executes actions for.
//!
//! # Components
//!
//! - [`SessionDriver`]: event-driven orchestrator (pure logic, no I/O)
//! - [`RevocationOracle`]: credential generation checks with a TTL cache
//! - [`PrekeyBundleBroker`]: bundle publication and single-use claims
//! - [`ReplayGuard`]: duplicate ciphertext suppression with degraded-mode
//!   fallback
//! - [`store`]: collaborator traits plus memory and chaos implementations
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod prekey;
mod registry;
mod replay;
mod revocation;
pub mod store;
mod system_env;

pub use driver::{
    CLOSE_UNAUTHORIZED, DriverConfig, DriverError, LogLevel, SessionAction, SessionDriver,
    SessionEvent,
};
pub use prekey::{
    BundleUpload, ClaimContext, ClaimedBundle, PrekeyBundleBroker, PrekeyError,
};
pub use registry::{ConnectionId, SessionRegistry};
pub use replay::{DEFAULT_REPLAY_TTL, ReplayGuard};
pub use revocation::{
    DEFAULT_GENERATION_TTL, RevocationConfig, RevocationError, RevocationOracle,
};
pub use system_env::SystemEnv;

/// Channel identifier well-formedness, re-exported from the core crate.
pub use vaultline_core::channel_id;
