#![deny(clippy::all)]
#![forbid(unsafe_code)]

//! Portal is a front-door proxy for a Minecraft-family network.
//!
//! It answers server-list pings from a periodically refreshed cache, establishes a joining
//! player's identity (through an upstream session service, a deterministic offline uuid, or an
//! in-proxy user/password dialogue held in a minimal limbo world) and finally transfers the client
//! to the configured upstream server.

pub mod auth;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod harvester;
pub mod limbo;
pub mod registry;
pub mod server;
pub mod session;
pub mod status;

pub use error::Error;

use crate::config::{AuthConfig, ProxyConfig};
use crate::registry::RegistryStore;
use crate::server::{AuthState, Proxy};
use crate::session::{SessionService, YggdrasilApi};
use crate::status::StatusCache;
use crate::auth::store::{self, UserStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Initializes all resources and serves the proxy until shutdown.
///
/// This loads (or writes) both configuration files, creates the RSA keypair and the registry
/// store, connects the user database, spawns the status harvester and the store writer, binds the
/// listener and then serves connections until ctrl-c.
///
/// # Errors
///
/// Will return an appropriate error if a configuration file is invalid, a registry payload cannot
/// be read, the database is unreachable, or the socket cannot be bound.
pub async fn start(config_path: &Path, auth_config_path: &Path) -> Result<(), Error> {
    // load configuration, writing defaults on first start
    let config: ProxyConfig = config::load_or_write(config_path)?;
    config.validate()?;
    let auth_config: AuthConfig = config::load_or_write(auth_config_path)?;
    auth_config.validate()?;

    info!("generating keypair");
    let (private_key, public_key) = crypto::generate_keypair()?;
    let encoded_public_key = crypto::encode_public_key(&public_key)?;

    let registry = RegistryStore::load(&config.registry_data)?;
    if registry.is_empty() {
        info!("no registry data configured, limbo authentication will reject every client");
    }

    let cancel = CancellationToken::new();

    // the user store and its single writer
    let user_store = Arc::new(UserStore::connect(&auth_config.database).await?);
    let register_queue = store::spawn_writer(Arc::clone(&user_store), cancel.child_token());

    // the session services, in configuration order
    let services: Vec<(String, Arc<dyn SessionService>)> = auth_config
        .yggdrasil_servers
        .iter()
        .map(|(source, base_url)| {
            (
                source.clone(),
                Arc::new(YggdrasilApi::new(base_url.clone())) as Arc<dyn SessionService>,
            )
        })
        .collect();

    let auth = AuthState {
        private_key: auth_config.private_key_bytes()?,
        config: auth_config,
        store: user_store,
        register_queue,
        services,
    };

    // the status cache and its harvester
    let status_cache = Arc::new(StatusCache::new(Duration::from_secs(
        config.cache_invalidate_time,
    )));
    info!("harvesting remote server information");
    tokio::spawn(harvester::run(
        Arc::clone(&status_cache),
        config.servers.clone(),
        cancel.child_token(),
    ));

    // bind the socket address
    let listen_addr = config.listen_addr();
    info!(addr = listen_addr, "binding socket address");
    let listener = TcpListener::bind(&listen_addr).await?;

    let proxy = Arc::new(Proxy {
        config,
        auth,
        status_cache,
        registry,
        private_key,
        encoded_public_key,
    });

    server::serve(proxy, listener, cancel.clone()).await?;

    // stop the harvester and the store writer
    cancel.cancel();
    info!("proxy stopped successfully");
    Ok(())
}
