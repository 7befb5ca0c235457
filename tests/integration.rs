use async_trait::async_trait;
use portal::auth::store::{self, UserRecord, UserStore};
use portal::auth::{offline_uuid, password};
use portal::config::{AuthConfig, ProxyConfig};
use portal::connection::Connection;
use portal::crypto::{self, EncryptedStream};
use portal::error::Error;
use portal::registry::{RegistryEntry, RegistryStore};
use portal::server::{AuthState, Proxy};
use portal::session::{Profile, SessionService};
use portal::status::{PlayerSample, ServerPlayers, ServerStatus, ServerVersion, StatusCache};
use portal_packets::configuration::clientbound as config_out;
use portal_packets::configuration::serverbound as config_in;
use portal_packets::handshake::serverbound::HandshakePacket;
use portal_packets::login::clientbound as login_out;
use portal_packets::login::serverbound as login_in;
use portal_packets::play::serverbound as play_in;
use portal_packets::status::clientbound as status_out;
use portal_packets::status::serverbound as status_in;
use portal_packets::{AsyncReadPacket, AsyncWritePacket, Intent, Protocol, RawFrame, VarInt};
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::json;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// packet ids of the 770..=772 table entry, as the simulated clients speak protocol 770
const FINISH_CONFIGURATION: VarInt = 0x03;
const TRANSFER_CONFIG: VarInt = 0x0B;
const SYNCHRONIZE_POSITION: VarInt = 0x41;
const SYSTEM_CHAT: VarInt = 0x73;
const DISCONNECT_PLAY: VarInt = 0x1D;
const TRANSFER_PLAY: VarInt = 0x7A;
const CHAT_MESSAGE: VarInt = 0x07;
const PLAYER_LOADED: VarInt = 0x2A;

struct SessionMock {
    profile: Option<Profile>,
}

#[async_trait]
impl SessionService for SessionMock {
    async fn has_joined(&self, _username: &str, _server_hash: &str) -> Result<Profile, Error> {
        self.profile.clone().ok_or(Error::UserNotFound)
    }
}

fn client_addr() -> SocketAddr {
    SocketAddr::from_str("127.0.0.1:25564").expect("invalid address")
}

fn proxy_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config
        .servers
        .insert("play".to_owned(), "127.0.0.1:25570".to_owned());
    config
}

fn auth_config() -> AuthConfig {
    AuthConfig {
        yggdrasil_bypass: false,
        offline_bypass: false,
        yggdrasil_fallback: false,
        open_registration: true,
        allow_name_collision: false,
        ..AuthConfig::default()
    }
}

/// A registry store whose payloads are a single raw frame each, so the simulated client can keep
/// reading frame-by-frame through the blob.
fn registry(versions: &[Protocol]) -> RegistryStore {
    RegistryStore::from_entries(
        versions
            .iter()
            .map(|protocol| RegistryEntry {
                protocol: *protocol,
                data: vec![0x05, 0x0E, 0xAB, 0xAB, 0xAB, 0xAB],
            })
            .collect(),
    )
}

async fn build_proxy(
    config: ProxyConfig,
    auth: AuthConfig,
    services: Vec<(String, Arc<dyn SessionService>)>,
    registry: RegistryStore,
) -> (Arc<Proxy>, Arc<UserStore>) {
    let store = Arc::new(UserStore::connect(&auth.database).await.expect("store"));
    let register_queue = store::spawn_writer(Arc::clone(&store), CancellationToken::new());

    let (private_key, public_key) = crypto::generate_keypair().expect("keypair");
    let encoded_public_key = crypto::encode_public_key(&public_key).expect("encode public key");

    let cache_ttl = Duration::from_secs(config.cache_invalidate_time);
    let proxy = Arc::new(Proxy {
        config,
        auth: AuthState {
            private_key: Vec::new(),
            config: auth,
            store: Arc::clone(&store),
            register_queue,
            services,
        },
        status_cache: Arc::new(StatusCache::new(cache_ttl)),
        registry,
        private_key,
        encoded_public_key,
    });
    (proxy, store)
}

fn spawn_server(
    proxy: Arc<Proxy>,
    stream: tokio::io::DuplexStream,
) -> tokio::task::JoinHandle<Result<(), Error>> {
    tokio::spawn(async move {
        let mut connection = Connection::new(stream, client_addr(), proxy);
        connection.run().await
    })
}

/// Reads frames until the wanted id shows up, skipping keep-alives and other play noise.
async fn skip_until<S>(stream: &mut S, id: VarInt) -> RawFrame
where
    S: AsyncRead + Unpin + Send + Sync,
{
    loop {
        let frame = stream.read_frame().await.expect("read frame");
        if frame.id == id {
            return frame;
        }
    }
}

async fn send_handshake<S>(stream: &mut S, protocol: Protocol, host: &str, intent: Intent)
where
    S: AsyncWrite + Unpin + Send + Sync,
{
    stream
        .write_packet(HandshakePacket {
            protocol_version: protocol,
            server_address: host.to_owned(),
            server_port: 25565,
            intent,
        })
        .await
        .expect("send handshake");
}

async fn send_chat<S>(stream: &mut S, message: &str)
where
    S: AsyncWrite + Unpin + Send + Sync,
{
    stream
        .write_packet_with_id(
            CHAT_MESSAGE,
            play_in::ChatMessagePacket {
                message: message.to_owned(),
            },
        )
        .await
        .expect("send chat message");
}

/// Drives a simulated client from the configuration handoff into the loaded play state.
async fn enter_limbo<S>(stream: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    // brand + registry payload + finish configuration
    skip_until(stream, FINISH_CONFIGURATION).await;
    stream
        .write_packet(config_in::FinishConfigurationPacket)
        .await
        .expect("acknowledge finish configuration");

    // login play, game event, empty chunk, synchronize position
    skip_until(stream, SYNCHRONIZE_POSITION).await;
    stream
        .write_packet_with_id(PLAYER_LOADED, play_in::PlayerLoadedPacket)
        .await
        .expect("send player loaded");
}

#[tokio::test]
async fn status_is_served_from_cache_and_ping_echoes() {
    let (proxy, _store) = build_proxy(proxy_config(), auth_config(), vec![], registry(&[772])).await;
    proxy.status_cache.insert(
        "play",
        ServerStatus {
            version: ServerVersion {
                name: "X".to_owned(),
                protocol: 770,
            },
            players: ServerPlayers {
                max: 100,
                online: 3,
                sample: Vec::<PlayerSample>::new(),
            },
            description: json!("hi"),
            favicon: None,
        },
    );

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 770, "play", Intent::Status).await;
    client
        .write_packet(status_in::StatusRequestPacket)
        .await
        .expect("send status request");

    let response: status_out::StatusResponsePacket =
        client.read_packet().await.expect("status response");
    assert_eq!(
        response.body,
        r#"{"version":{"name":"X","protocol":770},"players":{"max":100,"online":3,"sample":[]},"description":"hi"}"#
    );

    client
        .write_packet(status_in::PingPacket { payload: 0x0123 })
        .await
        .expect("send ping");
    let pong: status_out::PongPacket = client.read_packet().await.expect("pong");
    assert_eq!(pong.payload, 0x0123);

    server.await.expect("join").expect("server run failed");
}

#[tokio::test]
async fn unknown_host_gets_the_default_status() {
    let (proxy, _store) = build_proxy(proxy_config(), auth_config(), vec![], registry(&[772])).await;
    let default_body =
        serde_json::to_string(&proxy.config.default_info).expect("serialize default");

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 770, "nowhere", Intent::Status).await;
    client
        .write_packet(status_in::StatusRequestPacket)
        .await
        .expect("send status request");

    let response: status_out::StatusResponsePacket =
        client.read_packet().await.expect("status response");
    assert_eq!(response.body, default_body);

    client
        .write_packet(status_in::PingPacket { payload: 7 })
        .await
        .expect("send ping");
    let _pong: status_out::PongPacket = client.read_packet().await.expect("pong");

    server.await.expect("join").expect("server run failed");
}

#[tokio::test]
async fn unknown_destination_is_disconnected_at_login() {
    let (proxy, _store) = build_proxy(proxy_config(), auth_config(), vec![], registry(&[772])).await;

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 770, "nowhere", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "alice".to_owned(),
            user_id: offline_uuid("alice"),
        })
        .await
        .expect("send login start");

    let disconnect: login_out::DisconnectPacket = client.read_packet().await.expect("disconnect");
    assert!(disconnect.reason.contains("valid server address"));

    let result = server.await.expect("join");
    assert!(matches!(result, Err(Error::UnknownDestination(host)) if host == "nowhere"));
}

#[tokio::test]
async fn offline_first_time_registration_runs_limbo() {
    let (proxy, store) =
        build_proxy(proxy_config(), auth_config(), vec![], registry(&[765, 772])).await;

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 770, "play", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "alice".to_owned(),
            user_id: offline_uuid("alice"),
        })
        .await
        .expect("send login start");

    let success: login_out::LoginSuccessPacket = client.read_packet().await.expect("login success");
    assert_eq!(success.user_id, offline_uuid("alice"));
    assert_eq!(success.user_name, "alice");
    assert_eq!(success.properties.len(), 1);
    assert_eq!(success.properties[0].name, "textures");
    // protocol 770 omits the strictErrorHandling flag
    assert_eq!(success.strict_error_handling, None);

    client
        .write_packet(login_in::LoginAcknowledgedPacket)
        .await
        .expect("send login acknowledged");

    enter_limbo(&mut client).await;

    // register: the password is entered twice
    send_chat(&mut client, "hunter2").await;
    skip_until(&mut client, SYSTEM_CHAT).await; // confirmation prompt
    send_chat(&mut client, "hunter2").await;

    let transfer_frame = skip_until(&mut client, TRANSFER_PLAY).await;
    let transfer: config_out::TransferPacket =
        transfer_frame.decode().await.expect("decode transfer");
    assert_eq!(transfer.host, "127.0.0.1");
    assert_eq!(transfer.port, 25570);

    drop(client);
    server.await.expect("join").expect("server run failed");

    let records = store
        .find_by_uuid(&offline_uuid("alice"))
        .await
        .expect("find");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "alice");
    assert_eq!(records[0].source, "offline");

    let stored = store
        .password_by_uuid(&offline_uuid("alice"))
        .await
        .expect("query")
        .expect("password row");
    assert!(password::verify_password("hunter2", &stored.password_hash).expect("verify"));
}

#[tokio::test]
async fn password_mismatch_loops_until_confirmed() {
    let (proxy, store) = build_proxy(proxy_config(), auth_config(), vec![], registry(&[772])).await;

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 770, "play", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "alice".to_owned(),
            user_id: offline_uuid("alice"),
        })
        .await
        .expect("send login start");
    let _success: login_out::LoginSuccessPacket =
        client.read_packet().await.expect("login success");
    client
        .write_packet(login_in::LoginAcknowledgedPacket)
        .await
        .expect("send login acknowledged");

    enter_limbo(&mut client).await;

    // first pair mismatches, second pair agrees
    send_chat(&mut client, "hunter2").await;
    send_chat(&mut client, "something-else").await;
    send_chat(&mut client, "hunter2").await;
    send_chat(&mut client, "hunter2").await;

    skip_until(&mut client, TRANSFER_PLAY).await;
    drop(client);
    server.await.expect("join").expect("server run failed");

    let stored = store
        .password_by_uuid(&offline_uuid("alice"))
        .await
        .expect("query")
        .expect("password row");
    assert!(password::verify_password("hunter2", &stored.password_hash).expect("verify"));
}

#[tokio::test]
async fn online_bypass_transfers_and_registers_in_background() {
    let bob_id = Uuid::from_str("09879557-e479-45a9-b434-a56377674627").expect("uuid");
    let mock = SessionMock {
        profile: Some(Profile {
            id: bob_id,
            name: "Bob".to_owned(),
            properties: vec![],
        }),
    };
    let mut auth = auth_config();
    auth.yggdrasil_bypass = true;

    let (proxy, store) = build_proxy(
        proxy_config(),
        auth,
        vec![("mojang".to_owned(), Arc::new(mock))],
        registry(&[772]),
    )
    .await;

    let (client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);
    let mut client = client;

    send_handshake(&mut client, 770, "play", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "Bob".to_owned(),
            user_id: bob_id,
        })
        .await
        .expect("send login start");

    // the encryption exchange
    let request: login_out::EncryptionRequestPacket =
        client.read_packet().await.expect("encryption request");
    assert!(request.should_authenticate);

    let shared_secret = b"verysecuresecret";
    let public_key =
        RsaPublicKey::from_public_key_der(&request.public_key).expect("decode public key");
    let encrypted_secret = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, shared_secret)
        .expect("encrypt secret");
    let encrypted_token = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &request.verify_token)
        .expect("encrypt token");
    client
        .write_packet(login_in::EncryptionResponsePacket {
            shared_secret: encrypted_secret,
            verify_token: encrypted_token,
        })
        .await
        .expect("send encryption response");

    // everything after the response is encrypted
    let mut client = EncryptedStream::plain(client);
    client
        .enable_encryption(shared_secret)
        .expect("enable encryption");

    let success: login_out::LoginSuccessPacket = client.read_packet().await.expect("login success");
    assert_eq!(success.user_id, bob_id);
    assert_eq!(success.user_name, "Bob");

    client
        .write_packet(login_in::LoginAcknowledgedPacket)
        .await
        .expect("send login acknowledged");

    let transfer_frame = skip_until(&mut client, TRANSFER_CONFIG).await;
    let transfer: config_out::TransferPacket =
        transfer_frame.decode().await.expect("decode transfer");
    assert_eq!(transfer.host, "127.0.0.1");
    assert_eq!(transfer.port, 25570);
    skip_until(&mut client, FINISH_CONFIGURATION).await;

    drop(client);
    server.await.expect("join").expect("server run failed");

    // the registration is asynchronous; give the single writer a moment
    let mut records = Vec::new();
    for _ in 0..50 {
        records = store.find_by_uuid(&bob_id).await.expect("find");
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "mojang");
}

#[tokio::test]
async fn fallback_runs_the_password_flow_with_the_suggested_uuid() {
    let dave_id = Uuid::from_str("4fd0a24f-4b65-4981-bfd4-23a58bf45771").expect("uuid");
    let mock = SessionMock { profile: None };
    let mut auth = auth_config();
    auth.yggdrasil_fallback = true;

    let (proxy, store) = build_proxy(
        proxy_config(),
        auth,
        vec![("mojang".to_owned(), Arc::new(mock))],
        registry(&[772]),
    )
    .await;

    // the account registered earlier through the offline flow
    let hash = password::hash_password("hunter2").expect("hash");
    store
        .try_register(&UserRecord::new("Dave", dave_id, "offline"), Some(&hash))
        .await
        .expect("seed record");

    let (client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);
    let mut client = client;

    send_handshake(&mut client, 770, "play", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "Dave".to_owned(),
            user_id: dave_id,
        })
        .await
        .expect("send login start");

    let request: login_out::EncryptionRequestPacket =
        client.read_packet().await.expect("encryption request");
    let shared_secret = b"verysecuresecret";
    let public_key =
        RsaPublicKey::from_public_key_der(&request.public_key).expect("decode public key");
    client
        .write_packet(login_in::EncryptionResponsePacket {
            shared_secret: public_key
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, shared_secret)
                .expect("encrypt secret"),
            verify_token: public_key
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, &request.verify_token)
                .expect("encrypt token"),
        })
        .await
        .expect("send encryption response");

    let mut client = EncryptedStream::plain(client);
    client
        .enable_encryption(shared_secret)
        .expect("enable encryption");

    // all session services refused, so the client-suggested uuid survives
    let success: login_out::LoginSuccessPacket = client.read_packet().await.expect("login success");
    assert_eq!(success.user_id, dave_id);
    assert_eq!(success.properties[0].name, "textures");

    client
        .write_packet(login_in::LoginAcknowledgedPacket)
        .await
        .expect("send login acknowledged");

    enter_limbo(&mut client).await;

    send_chat(&mut client, "hunter2").await;
    let transfer_frame = skip_until(&mut client, TRANSFER_PLAY).await;
    let transfer: config_out::TransferPacket =
        transfer_frame.decode().await.expect("decode transfer");
    assert_eq!(transfer.port, 25570);

    drop(client);
    server.await.expect("join").expect("server run failed");
}

#[tokio::test]
async fn three_wrong_passwords_disconnect() {
    let (proxy, store) = build_proxy(proxy_config(), auth_config(), vec![], registry(&[772])).await;

    let alice_id = offline_uuid("alice");
    let hash = password::hash_password("hunter2").expect("hash");
    store
        .try_register(&UserRecord::new("alice", alice_id, "offline"), Some(&hash))
        .await
        .expect("seed record");

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 770, "play", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "alice".to_owned(),
            user_id: alice_id,
        })
        .await
        .expect("send login start");
    let _success: login_out::LoginSuccessPacket =
        client.read_packet().await.expect("login success");
    client
        .write_packet(login_in::LoginAcknowledgedPacket)
        .await
        .expect("send login acknowledged");

    enter_limbo(&mut client).await;

    send_chat(&mut client, "wrong1").await;
    send_chat(&mut client, "wrong2").await;
    send_chat(&mut client, "wrong3").await;

    // the disconnect must arrive without a transfer before it
    loop {
        let frame = client.read_frame().await.expect("read frame");
        assert_ne!(frame.id, TRANSFER_PLAY, "client was transferred anyway");
        if frame.id == DISCONNECT_PLAY {
            break;
        }
    }

    drop(client);
    server.await.expect("join").expect("server run failed");
}

#[tokio::test]
async fn missing_registry_for_newest_protocol_closes_the_connection() {
    // entries exist for 765 and 770 only; a protocol 772 client has no strictly greater entry
    let (proxy, _store) =
        build_proxy(proxy_config(), auth_config(), vec![], registry(&[765, 770])).await;

    let (mut client, server_stream) = tokio::io::duplex(8192);
    let server = spawn_server(proxy, server_stream);

    send_handshake(&mut client, 772, "play", Intent::Login).await;
    client
        .write_packet(login_in::LoginStartPacket {
            user_name: "alice".to_owned(),
            user_id: offline_uuid("alice"),
        })
        .await
        .expect("send login start");
    let _success: login_out::LoginSuccessPacket =
        client.read_packet().await.expect("login success");
    client
        .write_packet(login_in::LoginAcknowledgedPacket)
        .await
        .expect("send login acknowledged");

    let result = server.await.expect("join");
    assert!(matches!(result, Err(Error::NoRegistryForVersion(772))));
}
