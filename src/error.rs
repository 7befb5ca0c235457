use portal_packets::{Protocol, VarInt};
use std::io::ErrorKind;

/// The internal error type for everything that can go wrong while serving a connection or the
/// resources behind it.
///
/// Errors of the underlying data layer are wrapped from the packet and IO errors. Anything that is
/// recoverable to a cache miss or a per-connection disconnect is handled locally by the caller;
/// startup errors abort the process from `main`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error occurred while reading or writing to the underlying byte stream.
    #[error("error reading or writing data: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred in the packet layer.
    #[error("packet error: {0}")]
    Packets(#[from] portal_packets::Error),

    /// An error occurred while encrypting the connection.
    #[error("could not encrypt connection: {0}")]
    Crypto(#[from] crate::crypto::Error),

    /// A JSON body (server status, chat component) could not be encoded.
    #[error("invalid struct for JSON (encoding problem)")]
    Json(#[from] serde_json::Error),

    /// The client sent a packet that is not valid in its current state.
    #[error("unexpected packet {packet_id:#04x} in {state} state")]
    ProtocolViolation {
        /// The state the connection was in.
        state: &'static str,
        /// The offending packet id.
        packet_id: VarInt,
    },

    /// The client requested a handshake intent the proxy does not serve.
    #[error("handshake intent {intent} is not supported")]
    UnsupportedIntent { intent: VarInt },

    /// The authentication deadline was exceeded.
    #[error("authentication deadline exceeded")]
    Timeout,

    /// The requested host maps to no configured upstream and no fallback exists.
    #[error("no destination configured for requested host {0:?}")]
    UnknownDestination(String),

    /// No configured session service accepted the login.
    #[error("no session service accepted the login")]
    NoSessionService,

    /// No registry blob is forward-compatible with the client's protocol version.
    #[error("no registry data for protocol version {0}")]
    NoRegistryForVersion(Protocol),

    /// A record for this uuid already exists.
    #[error("user already registered")]
    UserAlreadyRegistered,

    /// No record exists where one was required.
    #[error("user not found")]
    UserNotFound,

    /// The supplied password does not match the stored verifier.
    #[error("password verification failed")]
    BadPassword,

    /// Another uuid already holds this name.
    #[error("name already taken by another uuid")]
    NameCollision,

    /// The user database failed.
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be decoded back into its domain type.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    /// Hashing or verifying a password failed (not a mismatch).
    #[error("password hashing failure: {0}")]
    PasswordHash(#[from] argon2::password_hash::Error),

    /// A status probe against an upstream failed.
    #[error("upstream probe failed: {0}")]
    UpstreamProbeFailure(String),

    /// The HTTP exchange with a session service failed.
    #[error("session service request failed: {0}")]
    SessionRequest(#[from] reqwest::Error),

    /// The register queue is closed (server is shutting down).
    #[error("register queue is closed")]
    RegisterQueueClosed,

    /// The configuration is invalid; raised at startup only.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration file could not be parsed or written.
    #[error("configuration file error: {0}")]
    ConfigFile(#[from] serde_yml::Error),
}

impl Error {
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Error::Io(err) => matches!(
                err.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            Error::Packets(err) => err.is_connection_closed(),
            _ => false,
        }
    }
}
