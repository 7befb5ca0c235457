//! The session-service (Yggdrasil) client used to verify online logins.
//!
//! Each configured service is asked through the `hasJoined` endpoint whether the client completed
//! the encryption handshake against it. The first service that confirms the join provides the
//! canonical profile; its configuration key becomes the connection's auth source.

use crate::error::Error;
use async_trait::async_trait;
use portal_packets::login::ProfileProperty;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::instrument;
use uuid::Uuid;

/// The shared http client (for session service requests).
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to create http client")
});

/// Represents a single Minecraft user profile with all current properties.
///
/// Each Minecraft account is associated with exactly one profile that reflects the visual and
/// technical state that the player is in. The `properties` usually only include one property
/// called `textures`, but this may change over time, so it is kept as an array as that is what's
/// specified in the JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// The unique identifier of the Minecraft user profile.
    pub id: Uuid,
    /// The current visual name of the Minecraft user profile.
    pub name: String,
    /// The currently assigned properties of the Minecraft user profile.
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

/// A single upstream identity service that can confirm an encrypted join.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Asks the service whether `username` joined with the given server hash, returning the
    /// canonical profile on success.
    async fn has_joined(&self, username: &str, server_hash: &str) -> Result<Profile, Error>;
}

/// The stock Yggdrasil-protocol implementation over HTTPS.
pub struct YggdrasilApi {
    base_url: String,
}

impl YggdrasilApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SessionService for YggdrasilApi {
    #[instrument(skip_all, fields(base_url = %self.base_url))]
    async fn has_joined(&self, username: &str, server_hash: &str) -> Result<Profile, Error> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!(
            "{base}/session/minecraft/hasJoined?username={username}&serverId={server_hash}"
        );
        let response = HTTP_CLIENT.get(&url).send().await?.error_for_status()?;

        // the service answers 204 with an empty body when it does not know the join
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Err(Error::UserNotFound);
        }

        Ok(response.json().await?)
    }
}
