//! Session registry, the directory of connected peers
//!
//! Keyed by peer name. Listing order is the key order; registration
//! recency is tracked separately by `join_seq`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::channel::{ChannelHandle, ChannelId};

// ─────────────────────────────────────────────────────────────────
// Peer Session
// ─────────────────────────────────────────────────────────────────

/// A registered peer
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub name: String,

    /// Address other peers use to open a direct channel
    pub direct_address: String,

    pub channel: ChannelHandle,

    /// Set once a full relay stream was delivered to this peer
    pub has_cached_stream_data: bool,

    /// Monotonic registration counter; higher joined later
    pub join_seq: u64,

    pub joined_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────
// Session Registry
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<String, PeerSession>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no registered session holds `candidate`
    pub fn validate_name(&self, candidate: &str) -> bool {
        !candidate.is_empty() && !self.sessions.contains_key(candidate)
    }

    /// Register a session, replacing any entry with the same name.
    ///
    /// Returns the replaced session, if any.
    pub fn join(
        &mut self,
        name: &str,
        direct_address: &str,
        channel: ChannelHandle,
    ) -> Option<PeerSession> {
        self.next_seq += 1;
        let session = PeerSession {
            name: name.to_string(),
            direct_address: direct_address.to_string(),
            channel,
            has_cached_stream_data: false,
            join_seq: self.next_seq,
            joined_at: Utc::now(),
        };
        self.sessions.insert(name.to_string(), session)
    }

    /// Registered names in key order, optionally without one
    pub fn list(&self, excluding: Option<&str>) -> Vec<String> {
        self.sessions
            .keys()
            .filter(|name| Some(name.as_str()) != excluding)
            .cloned()
            .collect()
    }

    /// Drop every session bound to a channel. Idempotent.
    pub fn remove(&mut self, channel: ChannelId) -> Vec<PeerSession> {
        let names: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.channel.id() == channel)
            .map(|s| s.name.clone())
            .collect();

        names
            .iter()
            .filter_map(|name| self.sessions.remove(name))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&PeerSession> {
        self.sessions.get(name)
    }

    /// Flag a peer as holding the relayed stream. False if unknown.
    pub fn mark_cached(&mut self, name: &str) -> bool {
        match self.sessions.get_mut(name) {
            Some(session) => {
                session.has_cached_stream_data = true;
                true
            }
            None => false,
        }
    }

    /// Most recently registered peer with cached stream data
    pub fn most_recent_cached(&self, excluding: &str) -> Option<&PeerSession> {
        self.sessions
            .values()
            .filter(|s| s.has_cached_stream_data && s.name != excluding)
            .max_by_key(|s| s.join_seq)
    }

    /// Index of `name` in the listing order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.sessions.keys().position(|n| n == name)
    }

    /// Names registered on a channel
    pub fn names_on(&self, channel: ChannelId) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.channel.id() == channel)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
