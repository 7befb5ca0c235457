//! Identity establishment: offline UUIDs, the user store, the registration policy and the
//! password hashing behind the limbo dialogue.

pub mod password;
pub mod policy;
pub mod store;

use md5::{Digest, Md5};
use uuid::Uuid;

/// The auth source tag for accounts that registered in-proxy (no session service involved).
pub const OFFLINE_SOURCE: &str = "offline";

/// Whether a stored source tag identifies an in-proxy account.
pub fn is_offline_source(source: &str) -> bool {
    source.is_empty() || source == OFFLINE_SOURCE
}

/// Derives the deterministic offline UUID for a player name.
///
/// This matches Java's `UUID.nameUUIDFromBytes("OfflinePlayer:" + name)` (an MD5 digest with the
/// version bits forced to 3), with the name lowercased so that case variants collapse onto one
/// identity.
pub fn offline_uuid(name: &str) -> Uuid {
    let mut hasher = Md5::new();
    hasher.update(b"OfflinePlayer:");
    hasher.update(name.to_lowercase().as_bytes());
    uuid::Builder::from_md5_bytes(hasher.finalize().into()).into_uuid()
}
