//! The two YAML configuration files of the proxy.
//!
//! `config.yaml` describes the listener, the upstream table and the status defaults; `auth.yaml`
//! describes identity establishment. A missing file is written out with its defaults and the
//! process continues, so a first start always leaves an editable template behind. Invalid
//! cross-references (a fallback pointing at no configured server, an empty server table) are fatal
//! at startup.

use crate::error::Error;
use crate::status::{ServerStatus, ServerVersion};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use portal_packets::Protocol;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// The skin property served for offline and fallback identities (Steve-textured).
const DEFAULT_SKIN: &str = "e3RleHR1cmVzOntTS0lOOnt1cmw6Imh0dHA6Ly90ZXh0dXJlcy5taW5lY3JhZnQubmV0L3RleHR1cmUvODM3NmI4Y2RjZDUzM2YyNWI5NDlkOWU0MDYxYzM5ZDBlNWNjNTI2ZmJkYTBkZDBkMmI0YjVmNzgzZjIyMjJkZiJ9fX0=";

/// The listener and routing configuration (`config.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// The socket address to listen on. A bare `:port` binds all interfaces.
    pub listen: String,

    /// The server name used when the requested host matches no entry of `servers`.
    pub fallback_server: Option<String>,

    /// How long a harvested upstream status stays valid, in seconds.
    pub cache_invalidate_time: u64,

    /// The destination table: requested host name to upstream `host:port`.
    pub servers: HashMap<String, String>,

    /// The status served when no harvested entry exists for the requested host.
    pub default_info: ServerStatus,

    /// The base64 `textures` property served for offline and fallback identities.
    pub default_skin: String,

    /// The end-to-end deadline for handshake, login and configuration, in seconds.
    pub auth_timeout: u64,

    /// How often keep-alives are written while a client sits in configuration or limbo.
    pub keepalive_interval_sec: u64,

    /// Registry payload files by the protocol version they were captured from.
    pub registry_data: HashMap<Protocol, PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: ":25565".to_owned(),
            fallback_server: None,
            cache_invalidate_time: 30,
            servers: HashMap::new(),
            default_info: ServerStatus {
                version: ServerVersion {
                    name: "Innocent Minecraft Server".to_owned(),
                    protocol: 0,
                },
                players: Default::default(),
                description: json!({"text": "Not a minecraft server"}),
                favicon: None,
            },
            default_skin: DEFAULT_SKIN.to_owned(),
            auth_timeout: 30,
            keepalive_interval_sec: 10,
            registry_data: HashMap::new(),
        }
    }
}

impl ProxyConfig {
    /// The address to bind, with the Go-style bare `:port` form expanded.
    pub fn listen_addr(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.servers.is_empty() {
            return Err(Error::Config(
                "at least one server must be configured".to_owned(),
            ));
        }
        if let Some(fallback) = &self.fallback_server {
            if !self.servers.contains_key(fallback) {
                return Err(Error::Config(format!(
                    "fallback-server {fallback:?} does not exist in the server table"
                )));
            }
        }
        Ok(())
    }
}

/// The identity establishment configuration (`auth.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Whether the policy runs at all. Disabled, every login is transferred straight through.
    pub enabled: bool,

    /// A base64 ed25519 private key, reserved for signed transfer cookies. Treated as opaque.
    pub private_key: String,

    /// The session services by their source key, tried in configuration order.
    pub yggdrasil_servers: IndexMap<String, String>,

    /// Skip the policy for session-service-verified players.
    pub yggdrasil_bypass: bool,

    /// Skip the policy for offline players.
    pub offline_bypass: bool,

    /// When every session service refused the login, continue with user/pass authentication
    /// instead of failing. Fallback players keep their client-suggested uuid.
    pub yggdrasil_fallback: bool,

    /// Whether one name may be held by multiple uuids.
    pub allow_name_collision: bool,

    /// Whether unknown identities may register.
    pub open_registration: bool,

    pub database: DatabaseConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut yggdrasil_servers = IndexMap::new();
        yggdrasil_servers.insert(
            "mojang".to_owned(),
            "https://sessionserver.mojang.com".to_owned(),
        );
        Self {
            enabled: true,
            private_key: String::new(),
            yggdrasil_servers,
            yggdrasil_bypass: true,
            offline_bypass: false,
            yggdrasil_fallback: false,
            allow_name_collision: false,
            open_registration: true,
            database: DatabaseConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Decodes the opaque private key. Empty configuration means no key material.
    pub fn private_key_bytes(&self) -> Result<Vec<u8>, Error> {
        if self.private_key.is_empty() {
            return Ok(Vec::new());
        }
        BASE64
            .decode(&self.private_key)
            .map_err(|err| Error::Config(format!("private-key is not valid base64: {err}")))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.private_key_bytes()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub driver: String,
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_owned(),
            dsn: "sqlite::memory:".to_owned(),
        }
    }
}

/// Loads a configuration file, writing the defaults first if it does not exist yet.
pub fn load_or_write<T>(path: &Path) -> Result<T, Error>
where
    T: Default + Serialize + DeserializeOwned,
{
    if !path.exists() {
        let defaults = T::default();
        std::fs::write(path, serde_yml::to_string(&defaults)?)?;
        info!(path = %path.display(), "default configuration has been created");
        return Ok(defaults);
    }

    Ok(serde_yml::from_str(&std::fs::read_to_string(path)?)?)
}
