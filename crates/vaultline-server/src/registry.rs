//! Connection registry: live sessions and channel subscriptions.
//!
//! Bidirectional mapping between connections and channels:
//! - `channel → connections` answers "who receives this broadcast"
//! - each session's joined set answers "what to clean up on disconnect"
//!
//! The registry owns the per-connection [`ChannelSession`] state machines;
//! the driver consults and mutates them through it. Single-writer: the
//! driver task is the only mutator, so no interior locking.

use std::{
    collections::{HashMap, HashSet},
    ops::Sub,
    time::Duration,
};

use vaultline_core::{ChannelSession, SessionConfig};

/// Server-assigned connection identifier.
pub type ConnectionId = u64;

/// Tracks every live connection and its channel subscriptions.
#[derive(Debug)]
pub struct SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    sessions: HashMap<ConnectionId, ChannelSession<I>>,
    channel_members: HashMap<String, HashSet<ConnectionId>>,
}

impl<I> Default for SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I> SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { sessions: HashMap::new(), channel_members: HashMap::new() }
    }

    /// Register a connection with a fresh unauthenticated session.
    ///
    /// Returns `false` if the connection id is already registered.
    pub fn register(&mut self, connection_id: ConnectionId, config: SessionConfig) -> bool {
        if self.sessions.contains_key(&connection_id) {
            return false;
        }
        self.sessions.insert(connection_id, ChannelSession::new(config));
        true
    }

    /// Remove a connection and drop all its channel subscriptions.
    ///
    /// Returns the channels it was subscribed to, for farewell handling.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<HashSet<String>> {
        let session = self.sessions.remove(&connection_id)?;
        let channels: HashSet<String> = session.joined().map(str::to_owned).collect();
        for channel in &channels {
            self.remove_subscription(channel, connection_id);
        }
        Some(channels)
    }

    /// Session state for a connection.
    pub fn session(&self, connection_id: ConnectionId) -> Option<&ChannelSession<I>> {
        self.sessions.get(&connection_id)
    }

    /// Mutable session state for a connection.
    pub fn session_mut(&mut self, connection_id: ConnectionId) -> Option<&mut ChannelSession<I>> {
        self.sessions.get_mut(&connection_id)
    }

    /// Subscribe a connection to a channel.
    ///
    /// Returns `false` if the connection is not registered or its session
    /// is not authenticated.
    pub fn subscribe(&mut self, connection_id: ConnectionId, channel_id: &str) -> bool {
        let Some(session) = self.sessions.get_mut(&connection_id) else {
            return false;
        };
        if session.join(channel_id).is_err() {
            return false;
        }
        self.channel_members.entry(channel_id.to_owned()).or_default().insert(connection_id);
        true
    }

    /// Unsubscribe a connection from a channel.
    ///
    /// Returns `true` if it was subscribed.
    pub fn unsubscribe(&mut self, connection_id: ConnectionId, channel_id: &str) -> bool {
        let left = self
            .sessions
            .get_mut(&connection_id)
            .is_some_and(|session| session.leave(channel_id));
        self.remove_subscription(channel_id, connection_id);
        left
    }

    /// Whether a connection is subscribed to a channel.
    pub fn is_subscribed(&self, connection_id: ConnectionId, channel_id: &str) -> bool {
        self.channel_members.get(channel_id).is_some_and(|members| members.contains(&connection_id))
    }

    /// Connections subscribed to a channel, for broadcast fan-out.
    pub fn subscribers(&self, channel_id: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.channel_members.get(channel_id).into_iter().flat_map(|members| members.iter().copied())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    fn remove_subscription(&mut self, channel_id: &str, connection_id: ConnectionId) {
        if let Some(members) = self.channel_members.get_mut(channel_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.channel_members.remove(channel_id);
            }
        }
    }
}
