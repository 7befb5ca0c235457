//! The status harvester keeps the [`StatusCache`] warm.
//!
//! On a fixed period it runs a full server-list-ping exchange against every configured upstream
//! and stores the parsed reply. A failed probe is logged and leaves the previously cached value
//! untouched, so a stale entry is preferred to an empty one, up to the cache TTL.

use crate::error::Error;
use crate::status::{ServerStatus, StatusCache};
use portal_packets::handshake::serverbound::HandshakePacket;
use portal_packets::status::clientbound::StatusResponsePacket;
use portal_packets::status::serverbound::StatusRequestPacket;
use portal_packets::{AsyncReadPacket, AsyncWritePacket, Intent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often every upstream is probed.
const HARVEST_PERIOD: Duration = Duration::from_secs(10);

/// How long a single probe may take, connect included.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// The port assumed when a configured address carries none.
const DEFAULT_PORT: u16 = 25565;

/// Probes all configured upstreams forever, until the token is cancelled.
///
/// The first round runs immediately so the cache is warm for the very first status request.
pub async fn run(
    cache: Arc<StatusCache>,
    servers: HashMap<String, String>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(HARVEST_PERIOD);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => harvest(&cache, &servers).await,
        }
    }
    debug!("status harvester stopped");
}

async fn harvest(cache: &StatusCache, servers: &HashMap<String, String>) {
    for (name, addr) in servers {
        match timeout(PROBE_TIMEOUT, probe(addr)).await {
            Ok(Ok(status)) => cache.insert(name.clone(), status),
            Ok(Err(err)) => warn!(
                name,
                addr,
                cause = err.to_string(),
                "failed to harvest upstream status"
            ),
            Err(_) => warn!(name, addr, "upstream status probe timed out"),
        }
    }
}

/// Runs one full SLP exchange against the address and parses the JSON reply.
pub async fn probe(addr: &str) -> Result<ServerStatus, Error> {
    let (host, port) = split_host_port(addr);

    let mut stream = TcpStream::connect(addr).await?;

    stream
        .write_packet(HandshakePacket {
            protocol_version: 0,
            server_address: host.to_owned(),
            server_port: port,
            intent: Intent::Status,
        })
        .await?;
    stream.write_packet(StatusRequestPacket).await?;

    let response: StatusResponsePacket = stream.read_packet().await?;

    serde_json::from_str(&response.body)
        .map_err(|err| Error::UpstreamProbeFailure(format!("invalid status reply: {err}")))
}

fn split_host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_PORT)),
        None => (addr, DEFAULT_PORT),
    }
}
