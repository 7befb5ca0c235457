//! The per-connection protocol state machine.
//!
//! One connection is driven from handshake through either the status dialogue or the login,
//! configuration and (if the policy demands a password) limbo phases. The pre-limbo phases run
//! under the configured `auth-timeout`; entering limbo refreshes that deadline once so a human
//! gets a fresh window for typing the password. The limbo half of the machine lives in
//! [`crate::limbo`].

use crate::auth::policy::{self, Decision};
use crate::auth::store::{RegisterRequest, UserRecord};
use crate::auth::{OFFLINE_SOURCE, offline_uuid};
use crate::crypto::{self, EncryptedStream};
use crate::error::Error;
use crate::server::Proxy;
use chrono::Utc;
use portal_packets::configuration::clientbound as config_out;
use portal_packets::handshake::serverbound::HandshakePacket;
use portal_packets::ids::PacketIds;
use portal_packets::login::ProfileProperty;
use portal_packets::login::clientbound as login_out;
use portal_packets::login::serverbound as login_in;
use portal_packets::play::clientbound as play_out;
use portal_packets::status::clientbound as status_out;
use portal_packets::status::serverbound as status_in;
use portal_packets::{
    AsyncReadPacket, AsyncWritePacket, Intent, MAX_PACKET_LENGTH, Packet, Protocol, RawFrame,
    VarInt,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::{Interval, timeout};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// The brand reported through the `minecraft:brand` plugin channel.
pub const BRAND: &str = "portal";

/// The states a connection moves through. No backward transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Handshake,
    Status,
    Login,
    Configuration,
    Play,
}

/// What the gate phases (handshake through configuration) resolved to.
pub(crate) enum Gate {
    /// The dialogue is complete; close the connection.
    Done,
    /// The policy demands a password; continue in limbo.
    Limbo(LimboSession),
}

/// Everything the limbo dialogue needs to know about the authenticated connection.
pub(crate) struct LimboSession {
    pub player_name: String,
    pub player_id: Uuid,
    /// The upstream `host:port` the client transfers to on success.
    pub destination: String,
    pub auth_source: String,
    pub need_registration: bool,
}

/// The identity a login resolved to, before the policy has seen it.
struct LoginIdentity {
    id: Uuid,
    name: String,
    properties: Vec<ProfileProperty>,
    source: String,
    /// Verified by a session service on this connection.
    online: bool,
    /// All session services refused and `yggdrasil-fallback` kicked in.
    fallback: bool,
}

pub struct Connection<S> {
    pub(crate) stream: EncryptedStream<S>,
    pub(crate) addr: SocketAddr,
    pub(crate) proxy: Arc<Proxy>,
    pub(crate) phase: Phase,
    pub(crate) protocol: Protocol,
    pub(crate) ids: &'static PacketIds,
    pub(crate) requested_host: String,
    /// Ticker writing keep-alives, active from limbo entry until the connection ends.
    pub(crate) keep_alive: Option<Interval>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(stream: S, addr: SocketAddr, proxy: Arc<Proxy>) -> Self {
        Self {
            stream: EncryptedStream::plain(stream),
            addr,
            proxy,
            phase: Phase::Handshake,
            protocol: 0,
            ids: PacketIds::for_protocol(0).0,
            requested_host: String::new(),
            keep_alive: None,
        }
    }

    /// Drives the connection to completion.
    pub async fn run(&mut self) -> Result<(), Error> {
        let auth_timeout = Duration::from_secs(self.proxy.config.auth_timeout);

        let gate = timeout(auth_timeout, self.run_gate())
            .await
            .map_err(|_| Error::Timeout)??;

        let Gate::Limbo(session) = gate else {
            return Ok(());
        };

        // the password dialogue involves a human, so it gets one fresh deadline window
        timeout(auth_timeout, self.run_limbo(session))
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn run_gate(&mut self) -> Result<Gate, Error> {
        let frame = self.next_frame().await?;
        if frame.id != HandshakePacket::ID {
            return Err(Error::ProtocolViolation {
                state: "handshake",
                packet_id: frame.id,
            });
        }
        let handshake: HandshakePacket = frame.decode().await?;
        debug!(packet = ?handshake, "received handshake packet");

        self.protocol = handshake.protocol_version;
        self.requested_host = handshake.server_address;
        let (ids, known) = PacketIds::for_protocol(self.protocol);
        self.ids = ids;
        if !known {
            warn!(
                protocol = self.protocol,
                "unknown protocol version, using the newest packet id table"
            );
        }

        match handshake.intent {
            Intent::Status => {
                self.phase = Phase::Status;
                self.serve_status().await?;
                Ok(Gate::Done)
            }
            Intent::Login => {
                self.phase = Phase::Login;
                self.serve_login().await
            }
            Intent::Transfer => Err(Error::UnsupportedIntent {
                intent: Intent::Transfer.into(),
            }),
        }
    }

    /// Serves up to one status request and one ping, in any order, then closes.
    async fn serve_status(&mut self) -> Result<(), Error> {
        let mut status_answered = false;
        let mut ping_answered = false;

        while !(status_answered && ping_answered) {
            let frame = self.next_frame().await?;
            if frame.id == status_in::StatusRequestPacket::ID && !status_answered {
                status_answered = true;

                let status = match self.proxy.status_cache.get(&self.requested_host) {
                    Some(status) => status,
                    None => {
                        info!(
                            addr = %self.addr,
                            host = self.requested_host,
                            "client requested status for an unknown or unprobed server"
                        );
                        Arc::new(self.proxy.config.default_info.clone())
                    }
                };

                let body = serde_json::to_string(status.as_ref())?;
                self.stream
                    .write_packet(status_out::StatusResponsePacket { body })
                    .await?;
            } else if frame.id == status_in::PingPacket::ID && !ping_answered {
                ping_answered = true;
                // echo the ping frame verbatim
                self.stream.write_frame(&frame).await?;
            } else {
                return Err(Error::ProtocolViolation {
                    state: "status",
                    packet_id: frame.id,
                });
            }
        }

        Ok(())
    }

    async fn serve_login(&mut self) -> Result<Gate, Error> {
        let frame = self.next_frame().await?;
        if frame.id != login_in::LoginStartPacket::ID {
            return Err(Error::ProtocolViolation {
                state: "login",
                packet_id: frame.id,
            });
        }
        let login_start: login_in::LoginStartPacket = frame.decode().await?;
        debug!(packet = ?login_start, "received login start packet");

        let Some(destination) = self.resolve_destination() else {
            self.disconnect_login(
                "Hey! A valid server address must be provided.\nPlease check the server IP carefully!",
            )
            .await?;
            return Err(Error::UnknownDestination(self.requested_host.clone()));
        };

        let offline_id = offline_uuid(&login_start.user_name);
        let mut identity = if login_start.user_id == offline_id {
            debug!(
                player = login_start.user_name,
                "uuid suggests an offline player"
            );
            LoginIdentity {
                id: offline_id,
                name: login_start.user_name,
                properties: vec![self.default_skin_property()],
                source: OFFLINE_SOURCE.to_owned(),
                online: false,
                fallback: false,
            }
        } else {
            self.authenticate_online(&login_start).await?
        };

        // 766/767 carry the strict flag; it is set for identities nothing vouched for
        let strict = self
            .ids
            .strict_error_handling
            .then_some(!identity.online && !identity.fallback);
        let properties = std::mem::take(&mut identity.properties);
        self.stream
            .write_packet(login_out::LoginSuccessPacket {
                user_id: identity.id,
                user_name: identity.name.clone(),
                properties,
                strict_error_handling: strict,
            })
            .await?;
        info!(player = identity.name, id = %identity.id, "player has logged in");

        self.run_configuration(identity, destination).await
    }

    /// Runs the encryption exchange once, then asks every configured session service in
    /// configuration order to confirm the join.
    async fn authenticate_online(
        &mut self,
        login_start: &login_in::LoginStartPacket,
    ) -> Result<LoginIdentity, Error> {
        debug!(
            player = login_start.user_name,
            "challenging client with connection encryption"
        );

        let verify_token = crypto::generate_token()?;
        self.stream
            .write_packet(login_out::EncryptionRequestPacket {
                server_id: String::new(),
                public_key: self.proxy.encoded_public_key.clone(),
                verify_token,
                should_authenticate: true,
            })
            .await?;

        let frame = self.next_frame().await?;
        if frame.id != login_in::EncryptionResponsePacket::ID {
            return Err(Error::ProtocolViolation {
                state: "login",
                packet_id: frame.id,
            });
        }
        let response: login_in::EncryptionResponsePacket = frame.decode().await?;

        let shared_secret = crypto::decrypt(&self.proxy.private_key, &response.shared_secret)?;
        let decrypted_token = crypto::decrypt(&self.proxy.private_key, &response.verify_token)?;
        crypto::verify_token(verify_token, &decrypted_token)?;

        // everything after the encryption response is encrypted in both directions
        self.stream.enable_encryption(&shared_secret)?;

        let hash = crypto::server_hash("", &shared_secret, &self.proxy.encoded_public_key);
        for (source, service) in &self.proxy.auth.services {
            match service.has_joined(&login_start.user_name, &hash).await {
                Ok(profile) => {
                    info!(
                        player = profile.name,
                        source, "session service verified the login"
                    );
                    return Ok(LoginIdentity {
                        id: profile.id,
                        name: profile.name,
                        properties: profile.properties,
                        source: source.clone(),
                        online: true,
                        fallback: false,
                    });
                }
                Err(err) => debug!(
                    source,
                    cause = err.to_string(),
                    "session service refused the login"
                ),
            }
        }

        if self.proxy.auth.config.yggdrasil_fallback {
            warn!(
                player = login_start.user_name,
                "all session services refused, falling back to user/pass authentication"
            );
            return Ok(LoginIdentity {
                id: login_start.user_id,
                name: login_start.user_name.clone(),
                properties: vec![self.default_skin_property()],
                source: String::new(),
                online: false,
                fallback: true,
            });
        }

        self.disconnect_login("No session service accepted your login.")
            .await?;
        Err(Error::NoSessionService)
    }

    async fn run_configuration(
        &mut self,
        identity: LoginIdentity,
        destination: String,
    ) -> Result<Gate, Error> {
        self.phase = Phase::Configuration;

        let frame = self.next_frame().await?;
        if frame.id != self.ids.login_acknowledged {
            return Err(Error::ProtocolViolation {
                state: "configuration",
                packet_id: frame.id,
            });
        }
        let _ack: login_in::LoginAcknowledgedPacket = frame.decode().await?;

        let auth = &self.proxy.auth;
        if !auth.config.enabled {
            self.send_transfer_config(&destination).await?;
            self.stream
                .write_packet(config_out::FinishConfigurationPacket)
                .await?;
            return Ok(Gate::Done);
        }

        let uuid_records = auth.store.find_by_uuid(&identity.id).await?;
        let name_records = auth.store.find_by_name(&identity.name).await?;
        let decision = policy::decide(
            identity.online,
            identity.fallback,
            &identity.source,
            &identity.id,
            &uuid_records,
            &name_records,
            &auth.config,
        );
        debug!(player = identity.name, decision = ?decision, "authentication policy decided");

        match decision {
            Decision::Bypass => {
                self.send_transfer_config(&destination).await?;
                self.stream
                    .write_packet(config_out::FinishConfigurationPacket)
                    .await?;
                Ok(Gate::Done)
            }
            Decision::BypassRegisterInBackground => {
                self.register_in_background(UserRecord::new(
                    identity.name.clone(),
                    identity.id,
                    identity.source.clone(),
                ));
                self.send_transfer_config(&destination).await?;
                self.stream
                    .write_packet(config_out::FinishConfigurationPacket)
                    .await?;
                Ok(Gate::Done)
            }
            Decision::RegisterThenBypass => {
                let record =
                    UserRecord::new(identity.name.clone(), identity.id, identity.source.clone());
                match self.register(record, None).await {
                    // losing the race to an identical registration is not a failure
                    Ok(()) | Err(Error::UserAlreadyRegistered) => {}
                    Err(err) => return Err(err),
                }
                self.send_transfer_config(&destination).await?;
                self.stream
                    .write_packet(config_out::FinishConfigurationPacket)
                    .await?;
                Ok(Gate::Done)
            }
            Decision::Limbo { need_registration } => {
                let mut brand = Vec::new();
                brand.write_string(BRAND).await?;
                self.stream
                    .write_packet(config_out::PluginMessagePacket {
                        channel: "minecraft:brand".to_owned(),
                        data: brand,
                    })
                    .await?;

                self.start_keep_alive();

                let Some(entry) = self.proxy.registry.next(self.protocol) else {
                    return Err(Error::NoRegistryForVersion(self.protocol));
                };
                self.stream.write_all(&entry.data).await?;

                self.stream
                    .write_packet(config_out::FinishConfigurationPacket)
                    .await?;

                Ok(Gate::Limbo(LimboSession {
                    player_name: identity.name,
                    player_id: identity.id,
                    destination,
                    auth_source: identity.source,
                    need_registration,
                }))
            }
            Decision::Reject(reason) => {
                info!(player = identity.name, reason = ?reason, "login rejected by policy");
                self.disconnect_config(reason.message()).await?;
                Ok(Gate::Done)
            }
        }
    }

    // registration plumbing

    /// Registers through the single writer and waits for the acknowledgement.
    pub(crate) async fn register(
        &self,
        record: UserRecord,
        password_hash: Option<String>,
    ) -> Result<(), Error> {
        let (ack, outcome) = oneshot::channel();
        self.proxy
            .auth
            .register_queue
            .send(RegisterRequest {
                record,
                password_hash,
                ack,
            })
            .await
            .map_err(|_| Error::RegisterQueueClosed)?;
        outcome.await.map_err(|_| Error::RegisterQueueClosed)?
    }

    /// Fire-and-forget registration for bypassed identities; failures only get logged.
    fn register_in_background(&self, record: UserRecord) {
        let queue = self.proxy.auth.register_queue.clone();
        tokio::spawn(async move {
            let uuid = record.uuid;
            let (ack, outcome) = oneshot::channel();
            if queue
                .send(RegisterRequest {
                    record,
                    password_hash: None,
                    ack,
                })
                .await
                .is_err()
            {
                return;
            }
            match outcome.await {
                Ok(Ok(())) | Ok(Err(Error::UserAlreadyRegistered)) | Err(_) => {}
                Ok(Err(err)) => warn!(
                    %uuid,
                    cause = err.to_string(),
                    "background registration failed"
                ),
            }
        });
    }

    // frame plumbing

    /// Reads the next frame, interleaving keep-alive writes while the ticker is active.
    pub(crate) async fn next_frame(&mut self) -> Result<RawFrame, Error> {
        loop {
            let length = match self.keep_alive.take() {
                None => self.stream.read_varint().await?,
                Some(mut interval) => {
                    tokio::select! {
                        biased;
                        _ = interval.tick() => {
                            self.keep_alive = Some(interval);
                            self.send_keep_alive().await?;
                            continue;
                        }
                        length = self.stream.read_varint() => {
                            self.keep_alive = Some(interval);
                            length?
                        }
                    }
                }
            };

            if length == 0 || length > MAX_PACKET_LENGTH {
                return Err(portal_packets::Error::IllegalPacketLength.into());
            }

            // all ids in use are single-byte
            let id = self.stream.read_varint().await?;
            let mut body = Vec::with_capacity(length as usize - 1);
            (&mut self.stream)
                .take(length as u64 - 1)
                .read_to_end(&mut body)
                .await?;
            if body.len() != length as usize - 1 {
                return Err(portal_packets::Error::IllegalPacketLength.into());
            }

            trace!(packet_id = id, length, phase = ?self.phase, "read frame");
            return Ok(RawFrame { id, body });
        }
    }

    /// Reads frames until one with the expected id arrives; everything else is drained.
    ///
    /// Only used from the configuration handoff onwards, where clients legitimately send packets
    /// the proxy has no interest in (client information, known packs, keep-alive echoes).
    pub(crate) async fn await_frame(&mut self, expected: VarInt) -> Result<RawFrame, Error> {
        loop {
            let frame = self.next_frame().await?;
            if frame.id == expected {
                return Ok(frame);
            }
            trace!(packet_id = frame.id, expected, "ignoring packet while waiting");
        }
    }

    fn start_keep_alive(&mut self) {
        let period = Duration::from_secs(self.proxy.config.keepalive_interval_sec.max(1));
        self.keep_alive = Some(tokio::time::interval_at(
            tokio::time::Instant::now() + period,
            period,
        ));
    }

    async fn send_keep_alive(&mut self) -> Result<(), Error> {
        let id = match self.phase {
            Phase::Play => self.ids.keep_alive_play,
            _ => self.ids.keep_alive_config,
        };
        self.stream
            .write_packet_with_id(
                id,
                config_out::KeepAlivePacket {
                    id: Utc::now().timestamp_millis(),
                },
            )
            .await?;
        Ok(())
    }

    // outbound helpers

    fn resolve_destination(&self) -> Option<String> {
        let servers = &self.proxy.config.servers;
        servers.get(&self.requested_host).cloned().or_else(|| {
            let fallback = self.proxy.config.fallback_server.as_ref()?;
            servers.get(fallback).cloned()
        })
    }

    fn default_skin_property(&self) -> ProfileProperty {
        ProfileProperty {
            name: "textures".to_owned(),
            value: self.proxy.config.default_skin.clone(),
            signature: None,
        }
    }

    pub(crate) fn split_destination(destination: &str) -> Result<(String, VarInt), Error> {
        let Some((host, port)) = destination.rsplit_once(':') else {
            return Err(Error::Config(format!(
                "invalid destination address, expected host:port, got {destination:?}"
            )));
        };
        let port: u16 = port.parse().map_err(|_| {
            Error::Config(format!("invalid destination port in {destination:?}"))
        })?;
        Ok((host.to_owned(), VarInt::from(port)))
    }

    async fn send_transfer_config(&mut self, destination: &str) -> Result<(), Error> {
        let (host, port) = Self::split_destination(destination)?;
        debug!(destination, "sending transfer packet");
        self.stream
            .write_packet(config_out::TransferPacket { host, port })
            .await?;
        Ok(())
    }

    pub(crate) async fn disconnect_login(&mut self, message: &str) -> Result<(), Error> {
        let reason = serde_json::to_string(&json!({ "text": message }))?;
        self.stream
            .write_packet(login_out::DisconnectPacket { reason })
            .await?;
        Ok(())
    }

    pub(crate) async fn disconnect_config(&mut self, message: &str) -> Result<(), Error> {
        self.stream
            .write_packet_with_id(
                self.ids.disconnect_config,
                play_out::DisconnectPacket {
                    reason: message.to_owned(),
                },
            )
            .await?;
        Ok(())
    }
}
