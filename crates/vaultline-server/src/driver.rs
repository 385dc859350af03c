//! Session driver: sans-IO orchestrator for connection authorization.
//!
//! Ties the components together:
//! - [`CredentialCodec`] (handshake and reauth verification)
//! - [`RevocationOracle`] (generation checks)
//! - [`SessionRegistry`] (connection ↔ channel mapping)
//! - [`ReplayGuard`] (duplicate ciphertext rejection)
//!
//! # Event flow
//!
//! 1. The external runtime produces [`SessionEvent`]s (connection accepted,
//!    handshake, join, message).
//! 2. The driver processes events and produces [`SessionAction`]s.
//! 3. A runtime-specific executor performs the actions (send, evict,
//!    persist).
//!
//! The driver performs no I/O itself, so every authorization path is
//! testable with a virtual clock and in-memory stores.
//!
//! # Failure surface
//!
//! Peers are never told why authorization failed; every credential or
//! permission failure collapses to one generic close reason. Detail goes
//! to the log actions only. Infrastructure failures (store outages) are
//! returned as errors for the runtime to retry; they never close the
//! connection.

use std::{ops::Sub, time::Duration};

use thiserror::Error;
use vaultline_core::{
    CredentialCodec, SessionConfig, SessionError, VerifiedClaims, env::Environment,
};

use crate::{
    channel_id,
    registry::{ConnectionId, SessionRegistry},
    replay::ReplayGuard,
    revocation::{RevocationError, RevocationOracle},
    store::{MembershipStore, PrincipalStore, ReplayCache, StoreError},
};

/// Close reason sent to peers on any authorization failure. Deliberately
/// uninformative.
pub const CLOSE_UNAUTHORIZED: &str = "unauthorized";

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Per-session configuration (reauth window and budget).
    pub session: SessionConfig,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { session: SessionConfig::default(), max_connections: 10_000 }
    }
}

/// Events the driver processes, produced by the external runtime.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A transport connection was accepted.
    ConnectionAccepted {
        /// Runtime-assigned connection id.
        connection_id: ConnectionId,
    },

    /// The peer presented credentials to open a session.
    Handshake {
        /// Connection performing the handshake.
        connection_id: ConnectionId,
        /// Token from the handshake auth field, if any. Fallback when no
        /// usable `Authorization` header is present.
        auth_token: Option<String>,
        /// Raw `Authorization` header value, if any. Takes precedence over
        /// the auth field.
        header_token: Option<String>,
    },

    /// The peer asked to join a channel.
    Join {
        /// Connection asking.
        connection_id: ConnectionId,
        /// Target channel.
        channel_id: String,
    },

    /// The peer left a channel.
    Leave {
        /// Connection leaving.
        connection_id: ConnectionId,
        /// Channel being left.
        channel_id: String,
    },

    /// The peer presented a fresh credential mid-session.
    Reauth {
        /// Connection reauthenticating.
        connection_id: ConnectionId,
        /// Token from the reauth payload, if any.
        auth_token: Option<String>,
        /// Raw `Authorization` header value, if any.
        header_token: Option<String>,
    },

    /// The peer submitted an encrypted message to a channel.
    MessageSubmitted {
        /// Sending connection.
        connection_id: ConnectionId,
        /// Target channel.
        channel_id: String,
        /// Opaque base64 ciphertext. The driver never decodes it.
        ciphertext: String,
    },

    /// The transport connection went away.
    Disconnected {
        /// Connection that closed.
        connection_id: ConnectionId,
    },
}

/// Actions the driver produces, executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction<I> {
    /// Handshake succeeded; the session is live.
    Accept {
        /// Accepted connection.
        connection_id: ConnectionId,
        /// Verified principal id.
        principal_id: String,
    },

    /// Deliver a message to every subscriber of a channel.
    Broadcast {
        /// Target channel.
        channel_id: String,
        /// Principal that sent the message.
        sender_id: String,
        /// Opaque ciphertext to deliver.
        ciphertext: String,
        /// Server-assigned timestamp, seconds since the UNIX epoch.
        created_at: u64,
        /// Connection to skip (the sender).
        exclude: Option<ConnectionId>,
    },

    /// Persist an accepted message.
    PersistMessage {
        /// Channel the message belongs to.
        channel_id: String,
        /// Sending principal.
        sender_id: String,
        /// Ciphertext to store.
        ciphertext: String,
        /// Server-assigned timestamp.
        created_at: u64,
    },

    /// Remove a connection from a channel it no longer has access to.
    Evict {
        /// Evicted connection.
        connection_id: ConnectionId,
        /// Channel access was lost to.
        channel_id: String,
    },

    /// Close a connection.
    CloseConnection {
        /// Connection to close.
        connection_id: ConnectionId,
        /// Reason given to the peer.
        reason: String,
    },

    /// Log a message.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
        /// When the event occurred.
        timestamp: I,
    },
}

/// Log levels for driver actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning.
    Warn,
}

/// Errors returned to the runtime. None of these reach the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Channel id failed shape validation before any lookup.
    #[error("malformed channel id: {0}")]
    BadChannelId(String),

    /// The reauth budget for this session is exhausted.
    #[error(transparent)]
    RateLimited(SessionError),

    /// A backing store could not answer. Retryable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sans-IO session driver.
///
/// All methods return actions rather than performing I/O.
pub struct SessionDriver<E, P, M, C>
where
    E: Environment,
    P: PrincipalStore,
    M: MembershipStore,
    C: ReplayCache,
{
    env: E,
    codec: CredentialCodec,
    revocation: RevocationOracle<E, P>,
    memberships: M,
    replay: ReplayGuard<E, C>,
    registry: SessionRegistry<E::Instant>,
    config: DriverConfig,
}

impl<E, P, M, C> SessionDriver<E, P, M, C>
where
    E: Environment,
    P: PrincipalStore,
    M: MembershipStore,
    C: ReplayCache,
    E::Instant: Sub<Output = Duration>,
{
    /// Create a new driver over the given components.
    pub fn new(
        env: E,
        codec: CredentialCodec,
        revocation: RevocationOracle<E, P>,
        memberships: M,
        replay: ReplayGuard<E, C>,
        config: DriverConfig,
    ) -> Self {
        Self {
            env,
            codec,
            revocation,
            memberships,
            replay,
            registry: SessionRegistry::new(),
            config,
        }
    }

    /// Process one event and return the actions to execute.
    ///
    /// Events for connections the driver does not know (late events after
    /// a disconnect) are discarded without effect.
    pub fn process_event(
        &mut self,
        event: SessionEvent,
    ) -> Result<Vec<SessionAction<E::Instant>>, DriverError> {
        match event {
            SessionEvent::ConnectionAccepted { connection_id } => {
                Ok(self.handle_connection_accepted(connection_id))
            },
            SessionEvent::Handshake { connection_id, auth_token, header_token } => {
                self.handle_handshake(connection_id, auth_token, header_token)
            },
            SessionEvent::Join { connection_id, channel_id } => {
                self.handle_join(connection_id, &channel_id)
            },
            SessionEvent::Leave { connection_id, channel_id } => {
                Ok(self.handle_leave(connection_id, &channel_id))
            },
            SessionEvent::Reauth { connection_id, auth_token, header_token } => {
                self.handle_reauth(connection_id, auth_token, header_token)
            },
            SessionEvent::MessageSubmitted { connection_id, channel_id, ciphertext } => {
                self.handle_message(connection_id, &channel_id, ciphertext)
            },
            SessionEvent::Disconnected { connection_id } => {
                Ok(self.handle_disconnected(connection_id))
            },
        }
    }

    /// Principal authenticated on a connection, if any.
    pub fn principal(&self, connection_id: ConnectionId) -> Option<&str> {
        self.registry.session(connection_id).and_then(|session| session.principal())
    }

    /// Whether a connection is subscribed to a channel.
    pub fn is_subscribed(&self, connection_id: ConnectionId, channel_id: &str) -> bool {
        self.registry.is_subscribed(connection_id, channel_id)
    }

    /// Connections subscribed to a channel, for broadcast fan-out.
    pub fn subscribers(&self, channel_id: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.registry.subscribers(channel_id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    fn handle_connection_accepted(
        &mut self,
        connection_id: ConnectionId,
    ) -> Vec<SessionAction<E::Instant>> {
        let now = self.env.now();

        if self.registry.connection_count() >= self.config.max_connections {
            return vec![SessionAction::CloseConnection {
                connection_id,
                reason: "server full".to_owned(),
            }];
        }

        self.registry.register(connection_id, self.config.session.clone());
        vec![SessionAction::Log {
            level: LogLevel::Debug,
            message: format!("connection {connection_id} accepted"),
            timestamp: now,
        }]
    }

    fn handle_handshake(
        &mut self,
        connection_id: ConnectionId,
        auth_token: Option<String>,
        header_token: Option<String>,
    ) -> Result<Vec<SessionAction<E::Instant>>, DriverError> {
        let now = self.env.now();
        if self.registry.session(connection_id).is_none() {
            return Ok(Vec::new());
        }

        let claims = match self.verify_credential(auth_token, header_token) {
            Ok(claims) => claims,
            Err(VerifyFailure::Store(error)) => return Err(DriverError::Store(error)),
            Err(VerifyFailure::Rejected(detail)) => {
                return Ok(self.reject(connection_id, now, &format!("handshake failed: {detail}")));
            },
        };

        let Some(session) = self.registry.session_mut(connection_id) else {
            return Ok(Vec::new());
        };
        if session.authenticate(claims.subject.clone()).is_err() {
            return Ok(self.reject(connection_id, now, "handshake on non-fresh session"));
        }

        Ok(vec![
            SessionAction::Accept { connection_id, principal_id: claims.subject.clone() },
            SessionAction::Log {
                level: LogLevel::Info,
                message: format!("connection {connection_id} authenticated as {}", claims.subject),
                timestamp: now,
            },
        ])
    }

    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        channel_id: &str,
    ) -> Result<Vec<SessionAction<E::Instant>>, DriverError> {
        let now = self.env.now();
        let Some(session) = self.registry.session(connection_id) else {
            return Ok(Vec::new());
        };
        let Some(principal) = session.principal().map(str::to_owned) else {
            return Ok(self.reject(connection_id, now, "join before handshake"));
        };

        if !channel_id::is_well_formed(channel_id) {
            return Err(DriverError::BadChannelId(channel_id.to_owned()));
        }

        if !self.memberships.is_member(channel_id, &principal)? {
            return Ok(self.reject(
                connection_id,
                now,
                &format!("{principal} is not a member of {channel_id}"),
            ));
        }

        self.registry.subscribe(connection_id, channel_id);
        Ok(vec![SessionAction::Log {
            level: LogLevel::Debug,
            message: format!("connection {connection_id} joined {channel_id}"),
            timestamp: now,
        }])
    }

    fn handle_leave(
        &mut self,
        connection_id: ConnectionId,
        channel_id: &str,
    ) -> Vec<SessionAction<E::Instant>> {
        let now = self.env.now();
        if self.registry.unsubscribe(connection_id, channel_id) {
            vec![SessionAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {connection_id} left {channel_id}"),
                timestamp: now,
            }]
        } else {
            Vec::new()
        }
    }

    fn handle_reauth(
        &mut self,
        connection_id: ConnectionId,
        auth_token: Option<String>,
        header_token: Option<String>,
    ) -> Result<Vec<SessionAction<E::Instant>>, DriverError> {
        let now = self.env.now();
        let Some(session) = self.registry.session_mut(connection_id) else {
            return Ok(Vec::new());
        };

        // The attempt counts against the budget before the credential is
        // looked at, so a flood of garbage tokens cannot probe for free.
        match session.record_reauth_attempt(now) {
            Ok(()) => {},
            Err(SessionError::RateLimited) => {
                return Err(DriverError::RateLimited(SessionError::RateLimited));
            },
            Err(error) => {
                return Ok(self.reject(connection_id, now, &format!("reauth refused: {error}")));
            },
        }

        let claims = match self.verify_credential(auth_token, header_token) {
            Ok(claims) => claims,
            Err(VerifyFailure::Store(error)) => return Err(DriverError::Store(error)),
            Err(VerifyFailure::Rejected(detail)) => {
                return Ok(self.reject(connection_id, now, &format!("reauth failed: {detail}")));
            },
        };

        let Some(session) = self.registry.session(connection_id) else {
            return Ok(Vec::new());
        };
        let joined: Vec<String> = session.joined().map(str::to_owned).collect();

        // The new principal may not hold the old one's memberships. Check
        // them all before mutating anything: a store outage mid-check must
        // leave the session exactly as it was, so a retried reauth emits
        // every eviction.
        let mut lost = Vec::new();
        for channel in joined {
            if !self.memberships.is_member(&channel, &claims.subject)? {
                lost.push(channel);
            }
        }

        let Some(session) = self.registry.session_mut(connection_id) else {
            return Ok(Vec::new());
        };
        if session.replace_principal(claims.subject.clone()).is_err() {
            return Ok(self.reject(connection_id, now, "reauth on dead session"));
        }

        let mut actions = Vec::new();
        for channel in lost {
            self.registry.unsubscribe(connection_id, &channel);
            actions.push(SessionAction::Evict { connection_id, channel_id: channel.clone() });
            actions.push(SessionAction::Log {
                level: LogLevel::Info,
                message: format!("connection {connection_id} evicted from {channel} after reauth"),
                timestamp: now,
            });
        }

        actions.push(SessionAction::Accept {
            connection_id,
            principal_id: claims.subject.clone(),
        });
        Ok(actions)
    }

    fn handle_message(
        &mut self,
        connection_id: ConnectionId,
        channel_id: &str,
        ciphertext: String,
    ) -> Result<Vec<SessionAction<E::Instant>>, DriverError> {
        let now = self.env.now();
        let Some(session) = self.registry.session(connection_id) else {
            return Ok(Vec::new());
        };
        let Some(sender) = session.principal().map(str::to_owned) else {
            return Ok(self.reject(connection_id, now, "message before handshake"));
        };

        if !channel_id::is_well_formed(channel_id) {
            return Err(DriverError::BadChannelId(channel_id.to_owned()));
        }
        if !self.registry.is_subscribed(connection_id, channel_id) {
            return Ok(self.reject(
                connection_id,
                now,
                &format!("message to unjoined channel {channel_id}"),
            ));
        }

        if !self.replay.admit(channel_id, &ciphertext) {
            return Ok(vec![SessionAction::Log {
                level: LogLevel::Warn,
                message: format!("duplicate ciphertext on {channel_id} dropped"),
                timestamp: now,
            }]);
        }

        let created_at = self.env.unix_now();
        Ok(vec![
            SessionAction::Broadcast {
                channel_id: channel_id.to_owned(),
                sender_id: sender.clone(),
                ciphertext: ciphertext.clone(),
                created_at,
                exclude: Some(connection_id),
            },
            SessionAction::PersistMessage {
                channel_id: channel_id.to_owned(),
                sender_id: sender,
                ciphertext,
                created_at,
            },
        ])
    }

    fn handle_disconnected(
        &mut self,
        connection_id: ConnectionId,
    ) -> Vec<SessionAction<E::Instant>> {
        let now = self.env.now();
        match self.registry.unregister(connection_id) {
            Some(channels) => vec![SessionAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "connection {connection_id} disconnected, was in {} channels",
                    channels.len()
                ),
                timestamp: now,
            }],
            None => Vec::new(),
        }
    }

    /// Verify the presented token end to end: presence, codec, revocation.
    ///
    /// The `Authorization` header wins when both token sources are present.
    /// Rejection detail strings are for logs only; peers see
    /// [`CLOSE_UNAUTHORIZED`] regardless of the cause. Store outages are
    /// kept separate so callers can surface them as retryable errors
    /// instead of closing the connection.
    fn verify_credential(
        &self,
        auth_token: Option<String>,
        header_token: Option<String>,
    ) -> Result<VerifiedClaims, VerifyFailure> {
        let token = header_token
            .as_deref()
            .and_then(bearer_token)
            .map(str::to_owned)
            .or_else(|| auth_token.filter(|t| !t.is_empty()))
            .unwrap_or_default();

        let claims =
            self.codec.verify(&token).map_err(|e| VerifyFailure::Rejected(e.to_string()))?;
        match self.revocation.ensure_active(&claims) {
            Ok(()) => Ok(claims),
            Err(RevocationError::Store(error)) => Err(VerifyFailure::Store(error)),
            Err(error) => Err(VerifyFailure::Rejected(error.to_string())),
        }
    }

    /// Tear the connection down with the generic close reason, logging the
    /// real cause server-side.
    fn reject(
        &mut self,
        connection_id: ConnectionId,
        now: E::Instant,
        detail: &str,
    ) -> Vec<SessionAction<E::Instant>> {
        self.registry.unregister(connection_id);
        vec![
            SessionAction::Log {
                level: LogLevel::Warn,
                message: format!("connection {connection_id} closed: {detail}"),
                timestamp: now,
            },
            SessionAction::CloseConnection {
                connection_id,
                reason: CLOSE_UNAUTHORIZED.to_owned(),
            },
        ]
    }
}

impl<E, P, M, C> std::fmt::Debug for SessionDriver<E, P, M, C>
where
    E: Environment,
    P: PrincipalStore,
    M: MembershipStore,
    C: ReplayCache,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("connection_count", &self.registry.connection_count())
            .finish()
    }
}

/// Outcome of a failed credential check: a decision about the peer, or an
/// infrastructure failure that is no verdict at all.
enum VerifyFailure {
    /// The credential is bad; detail goes to the logs.
    Rejected(String),
    /// The revocation check could not run. Retryable.
    Store(StoreError),
}

/// Extract the token from an `Authorization` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let rest = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
    let rest = rest.trim();
    (!rest.is_empty()).then_some(rest)
}
