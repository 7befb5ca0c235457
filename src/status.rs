//! The server-list-ping status model and the TTL cache that backs status replies.

use portal_packets::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// The information on the protocol version of a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServerVersion {
    /// The textual protocol version to display this version visually.
    pub name: String,
    /// The numeric protocol version (for compatibility checking).
    pub protocol: Protocol,
}

/// The information on a single, sampled player entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PlayerSample {
    /// The visual name to display this player.
    pub name: String,
    /// The unique identifier to reference this player.
    pub id: Uuid,
}

/// The information on the current, maximum and sampled players.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServerPlayers {
    /// The maximum number of players that can join (slots).
    pub max: u32,
    /// The current number of players that are online at this moment.
    pub online: u32,
    /// A list of player information samples (version hover).
    pub sample: Vec<PlayerSample>,
}

/// The self-reported status of a pinged server with all public metadata.
///
/// The description is kept as raw JSON so that arbitrary chat components survive the
/// parse-and-reserialize round trip through the cache, and so the same struct can be expressed in
/// the YAML default configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServerStatus {
    /// The version and protocol information of the server.
    pub version: ServerVersion,
    /// The current, maximum and sampled players of the server.
    pub players: ServerPlayers,
    /// The description (MOTD) of this server, an arbitrary chat component.
    pub description: serde_json::Value,
    /// The optional favicon of the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

struct CacheEntry {
    status: Arc<ServerStatus>,
    expires_at: Instant,
}

/// A TTL map of harvested upstream statuses, keyed by the configured server name.
///
/// Reads never block the harvester beyond the map lock itself, and an expired entry is simply not
/// returned (the harvester overwrites it in place on the next successful probe, so the map stays
/// bounded by the configured server set).
pub struct StatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached status for the host, if present and not older than the TTL.
    pub fn get(&self, host: &str) -> Option<Arc<ServerStatus>> {
        let entries = self.entries.read().expect("status cache lock poisoned");
        let entry = entries.get(host)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(Arc::clone(&entry.status))
    }

    /// Stores a freshly harvested status, restarting its TTL.
    pub fn insert(&self, host: impl Into<String>, status: ServerStatus) {
        let entry = CacheEntry {
            status: Arc::new(status),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .write()
            .expect("status cache lock poisoned")
            .insert(host.into(), entry);
    }
}
