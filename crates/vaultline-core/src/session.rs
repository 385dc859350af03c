//! Channel session state machine.
//!
//! Tracks one real-time connection's authorization state: the authenticated
//! principal, the set of joined channels, and a sliding-window rate limiter
//! for re-authentication attempts.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────────────┐  handshake ok   ┌───────────────┐  reauth ok
//! │ Unauthenticated │────────────────>│ Authenticated │───────────┐
//! └─────────────────┘                 └───────────────┘<──────────┘
//!          │                                  │
//!          │ handshake failed                 │ auth failure / peer close
//!          ↓                                  ↓
//!    ┌──────────────┐                  ┌──────────────┐
//!    │ Disconnected │                  │ Disconnected │
//!    └──────────────┘                  └──────────────┘
//! ```
//!
//! This is a pure state machine: no I/O, no Environment storage. Time is
//! passed as a parameter to the methods that need it, so the same code runs
//! on real and virtual clocks.

use std::{
    collections::HashSet,
    ops::Sub,
    time::{Duration, Instant},
};

use crate::error::SessionError;

/// Sliding window over which reauth attempts are counted.
pub const DEFAULT_REAUTH_WINDOW: Duration = Duration::from_secs(60);

/// Maximum reauth attempts within one window.
pub const DEFAULT_REAUTH_MAX_ATTEMPTS: usize = 5;

/// Session rate-limit configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sliding window for reauth rate limiting.
    pub reauth_window: Duration,
    /// Maximum reauth attempts within the window.
    pub reauth_max_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reauth_window: DEFAULT_REAUTH_WINDOW,
            reauth_max_attempts: DEFAULT_REAUTH_MAX_ATTEMPTS,
        }
    }
}

/// Session authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, handshake not yet verified.
    Unauthenticated,
    /// Credential verified; principal attached.
    Authenticated,
    /// Connection torn down; terminal.
    Disconnected,
}

/// Per-connection session: principal, joined channels, reauth history.
///
/// Mutated only by the owning connection's handlers; the driver destroys it
/// on disconnect, which discards any in-flight reauth bookkeeping.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct ChannelSession<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: SessionState,
    principal: Option<String>,
    /// Timestamps of recent reauth attempts, oldest first. Pruned against
    /// the window on every new attempt, so its length is bounded by the
    /// configured maximum.
    reauth_attempts: Vec<I>,
    joined: HashSet<String>,
    config: SessionConfig,
}

impl<I> ChannelSession<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a session in [`SessionState::Unauthenticated`].
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::Unauthenticated,
            principal: None,
            reauth_attempts: Vec::new(),
            joined: HashSet::new(),
            config,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated principal id. `None` until the handshake succeeds.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Attach a verified principal after a successful handshake.
    pub fn authenticate(&mut self, principal: impl Into<String>) -> Result<(), SessionError> {
        match self.state {
            SessionState::Unauthenticated => {
                self.principal = Some(principal.into());
                self.state = SessionState::Authenticated;
                Ok(())
            },
            state => Err(SessionError::InvalidState { state, operation: "authenticate" }),
        }
    }

    /// Record a reauth attempt at `now`, enforcing the sliding-window rate
    /// limit.
    ///
    /// The attempt is counted whether or not the subsequent credential
    /// verification succeeds; a flood of bad tokens burns the budget just
    /// like good ones.
    pub fn record_reauth_attempt(&mut self, now: I) -> Result<(), SessionError> {
        if self.state != SessionState::Authenticated {
            return Err(SessionError::InvalidState { state: self.state, operation: "reauth" });
        }

        let window = self.config.reauth_window;
        self.reauth_attempts.retain(|at| now - *at <= window);
        if self.reauth_attempts.len() >= self.config.reauth_max_attempts {
            return Err(SessionError::RateLimited);
        }
        self.reauth_attempts.push(now);
        Ok(())
    }

    /// Replace the authenticated principal after a verified reauth.
    pub fn replace_principal(&mut self, principal: impl Into<String>) -> Result<(), SessionError> {
        match self.state {
            SessionState::Authenticated => {
                self.principal = Some(principal.into());
                Ok(())
            },
            state => Err(SessionError::InvalidState { state, operation: "replace principal" }),
        }
    }

    /// Record membership of a channel.
    pub fn join(&mut self, channel_id: impl Into<String>) -> Result<(), SessionError> {
        match self.state {
            SessionState::Authenticated => {
                self.joined.insert(channel_id.into());
                Ok(())
            },
            state => Err(SessionError::InvalidState { state, operation: "join" }),
        }
    }

    /// Drop membership of a channel. Returns whether it was joined.
    pub fn leave(&mut self, channel_id: &str) -> bool {
        self.joined.remove(channel_id)
    }

    /// Whether the session has joined the channel.
    #[must_use]
    pub fn is_joined(&self, channel_id: &str) -> bool {
        self.joined.contains(channel_id)
    }

    /// Currently joined channel ids.
    pub fn joined(&self) -> impl Iterator<Item = &str> {
        self.joined.iter().map(String::as_str)
    }

    /// Tear the session down. Terminal; clears joined channels.
    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.principal = None;
        self.joined.clear();
        self.reauth_attempts.clear();
    }
}

impl<I> Default for ChannelSession<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Virtual instant for deterministic window tests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Tick(u64);

    impl Sub for Tick {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            Duration::from_secs(self.0 - rhs.0)
        }
    }

    fn authenticated() -> ChannelSession<Tick> {
        let mut session = ChannelSession::new(SessionConfig::default());
        session.authenticate("alice").ok();
        session
    }

    #[test]
    fn handshake_transitions_to_authenticated() {
        let mut session: ChannelSession<Tick> = ChannelSession::default();
        assert_eq!(session.state(), SessionState::Unauthenticated);

        session.authenticate("alice").ok();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.principal(), Some("alice"));
    }

    #[test]
    fn join_requires_authentication() {
        let mut session: ChannelSession<Tick> = ChannelSession::default();
        let err = session.join("aaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(matches!(err, Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn reauth_allows_max_attempts_within_window() {
        let mut session = authenticated();
        for i in 0..DEFAULT_REAUTH_MAX_ATTEMPTS {
            assert!(session.record_reauth_attempt(Tick(i as u64)).is_ok(), "attempt {i}");
        }
        assert_eq!(session.record_reauth_attempt(Tick(10)), Err(SessionError::RateLimited));
    }

    #[test]
    fn reauth_window_slides() {
        let mut session = authenticated();
        for i in 0..DEFAULT_REAUTH_MAX_ATTEMPTS {
            session.record_reauth_attempt(Tick(i as u64)).ok();
        }
        // All five attempts fall out of the 60s window by t=65.
        assert!(session.record_reauth_attempt(Tick(65)).is_ok());
    }

    #[test]
    fn replace_principal_keeps_joined_set() {
        let mut session = authenticated();
        session.join("aaaaaaaaaaaaaaaaaaaaaaaa").ok();

        session.replace_principal("mallory").ok();
        assert_eq!(session.principal(), Some("mallory"));
        // Membership re-evaluation is the driver's job; the session keeps
        // its joined set until told otherwise.
        assert!(session.is_joined("aaaaaaaaaaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn disconnect_is_terminal_and_clears_state() {
        let mut session = authenticated();
        session.join("aaaaaaaaaaaaaaaaaaaaaaaa").ok();
        session.disconnect();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.principal(), None);
        assert!(!session.is_joined("aaaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(matches!(
            session.record_reauth_attempt(Tick(0)),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(session.authenticate("alice"), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn leave_reports_prior_membership() {
        let mut session = authenticated();
        session.join("aaaaaaaaaaaaaaaaaaaaaaaa").ok();
        assert!(session.leave("aaaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!session.leave("aaaaaaaaaaaaaaaaaaaaaaaa"));
    }
}
