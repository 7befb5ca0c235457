//! The TCP acceptor and the shared proxy state handed to every connection.

use crate::auth::store::{RegisterRequest, UserStore};
use crate::config::{AuthConfig, ProxyConfig};
use crate::connection::Connection;
use crate::error::Error;
use crate::registry::RegistryStore;
use crate::session::SessionService;
use crate::status::StatusCache;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Identity establishment state, read-only after startup (the store synchronizes internally).
pub struct AuthState {
    pub config: AuthConfig,
    pub store: Arc<UserStore>,
    pub register_queue: mpsc::Sender<RegisterRequest>,
    /// The session services in configuration order, keyed by their source tag.
    pub services: Vec<(String, Arc<dyn SessionService>)>,
    /// The opaque ed25519 key from the auth config, reserved for signed transfer cookies.
    pub private_key: Vec<u8>,
}

/// Everything a connection needs, shared across all connections.
pub struct Proxy {
    pub config: ProxyConfig,
    pub auth: AuthState,
    pub status_cache: Arc<StatusCache>,
    pub registry: RegistryStore,
    pub private_key: RsaPrivateKey,
    pub encoded_public_key: Vec<u8>,
}

/// Accepts connections until the token is cancelled (or ctrl-c), spawning one task per client.
pub async fn serve(
    proxy: Arc<Proxy>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<(), Error> {
    loop {
        // accept the next incoming connection
        let (mut stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            () = cancel.cancelled() => return Ok(()),
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                return Ok(());
            },
        };
        debug!(addr = %addr, "accepted connection");

        let proxy = Arc::clone(&proxy);
        let conn_cancel = cancel.child_token();

        tokio::spawn(async move {
            let result = {
                let mut connection = Connection::new(&mut stream, addr, proxy);
                tokio::select! {
                    result = connection.run() => result,
                    () = conn_cancel.cancelled() => Ok(()),
                }
            };

            match result {
                Ok(()) => {}
                Err(Error::Timeout) => {
                    debug!(addr = %addr, "authentication process timed out")
                }
                Err(err) if err.is_connection_closed() => {}
                Err(err) => warn!(
                    addr = %addr,
                    cause = err.to_string(),
                    "failure communicating with a client"
                ),
            }

            // flush connection and shutdown
            if let Err(err) = stream.shutdown().await {
                debug!(
                    addr = %addr,
                    cause = err.to_string(),
                    "failed to close a client connection"
                );
            }
            debug!(addr = %addr, "closed connection with a client");
        });
    }
}
