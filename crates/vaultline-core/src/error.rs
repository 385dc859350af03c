//! Error types for the Vaultline core.
//!
//! Strongly-typed errors per layer: configuration errors (fatal at startup),
//! credential verification errors (collapsed to a generic "unauthorized" at
//! the transport surface so callers learn nothing about why a token was
//! rejected), and session state errors.

use thiserror::Error;

use crate::session::SessionState;

/// Misconfigured signing material. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The active algorithm has no signing key, so `sign` cannot be used.
    /// Verify-only deployments (RS256 with only a public key) hit this if
    /// they attempt issuance.
    #[error("no signing key configured for {algorithm}")]
    MissingSigningKey {
        /// Name of the configured algorithm.
        algorithm: &'static str,
    },

    /// Key material could not be parsed (e.g., malformed RSA PEM).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

/// Credential verification failure.
///
/// Every variant is surfaced to callers as the same generic unauthorized
/// response. The distinction exists for logging and tests only; leaking it
/// would give attackers an oracle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Empty or absent token.
    #[error("no token supplied")]
    NoToken,

    /// The token is not structurally valid (not three base64url segments,
    /// undecodable header or claims).
    #[error("token could not be decoded")]
    DecodeFailed,

    /// Header algorithm differs from the configured algorithm. Checked
    /// before any signature verification to rule out algorithm-substitution
    /// attacks.
    #[error("token header algorithm does not match configuration")]
    UnexpectedAlgorithm,

    /// Header key id differs from the configured key id, including the case
    /// where exactly one side carries a key id.
    #[error("token header key id does not match configuration")]
    UnexpectedKeyId,

    /// Expiry is in the past (beyond the clock-skew tolerance).
    #[error("token has expired")]
    Expired,

    /// Not-before is in the future (beyond the clock-skew tolerance).
    #[error("token is not yet valid")]
    NotYetValid,

    /// Signature did not verify under the configured key.
    #[error("token signature verification failed")]
    BadSignature,

    /// Audience claim does not match the configured audience.
    #[error("token audience does not match configuration")]
    AudienceMismatch,

    /// Issuer claim does not match the configured issuer.
    #[error("token issuer does not match configuration")]
    IssuerMismatch,

    /// None of `sub`, `userId`, `id` resolved to a subject.
    #[error("token carries no resolvable subject")]
    NoSubject,

    /// The embedded generation was superseded by a revocation event.
    #[error("token generation has been revoked")]
    TokenRevoked,
}

/// Channel session state machine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Too many reauth attempts within the sliding window.
    #[error("rate limited: too many reauth attempts")]
    RateLimited,

    /// Operation not permitted in the current session state.
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// State the session was in when the operation was attempted.
        state: SessionState,
        /// Operation that was attempted.
        operation: &'static str,
    },
}
