#![deny(clippy::all)]
#![forbid(unsafe_code)]

//! Wire-level packets of the Minecraft Java protocol, as far as Portal needs them.
//!
//! This covers the [Handshaking][handshaking], [Status][status], [Login][login] and
//! [Configuration][configuration] phases completely, and the small slice of the Play phase that is
//! required to keep a client alive inside the limbo world (chunk, position, chat, title,
//! keep-alive, transfer). The implementations may differ from the official Minecraft client
//! implementation if the observed outcome is the same and the result is reliable.
//!
//! [handshaking]: https://minecraft.wiki/w/Java_Edition_protocol#Handshaking
//! [status]: https://minecraft.wiki/w/Java_Edition_protocol#Status
//! [login]: https://minecraft.wiki/w/Java_Edition_protocol#Login
//! [configuration]: https://minecraft.wiki/w/Java_Edition_protocol#Configuration

#[cfg(test)]
use fake::Dummy;
use std::fmt::Debug;
use std::io::{Cursor, ErrorKind};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

pub mod configuration;
pub mod handshake;
pub mod ids;
pub mod login;
pub mod play;
pub mod reader;
pub mod status;
pub mod writer;

/// The max packet length in bytes. Larger packets are rejected.
pub const MAX_PACKET_LENGTH: VarInt = 10_000;

pub type VarInt = i32;

pub type VarLong = i64;

/// The numeric protocol version of a client or server, compared numerically.
pub type Protocol = i32;

pub type VerifyToken = [u8; 32];

/// The internal error type for all errors related to the protocol communication.
///
/// This includes errors with the expected packets, packet contents or encoding of the exchanged
/// fields. Errors of the underlying data layer (for byte exchange) are wrapped from the underlying
/// IO errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error occurred while reading or writing to the underlying byte stream.
    #[error("error reading or writing data: {0}")]
    Io(#[from] std::io::Error),

    /// The received packet is of an invalid length that we cannot process.
    #[error("illegal packet length")]
    IllegalPacketLength,

    /// The received `VarInt` cannot be correctly decoded (was formed incorrectly).
    #[error("invalid VarInt data")]
    InvalidVarInt,

    /// The received value index cannot be mapped to an existing enum.
    #[error("illegal enum value index for {kind}: {value}")]
    IllegalEnumValue {
        /// The enum kind which was parsed.
        kind: &'static str,
        /// The value that was received.
        value: VarInt,
    },

    /// The received packet ID is not mapped to an expected packet.
    #[error("illegal packet ID: {actual} (expected {expected})")]
    IllegalPacketId {
        /// The expected value that should be present.
        expected: VarInt,
        /// The actual value that was observed.
        actual: VarInt,
    },

    /// A text field of a packet is incorrectly encoded (not UTF-8).
    #[error("invalid packet body (invalid encoding)")]
    InvalidEncoding,
}

impl Error {
    pub fn is_connection_closed(&self) -> bool {
        let Error::Io(err) = self else {
            return false;
        };
        err.kind() == ErrorKind::UnexpectedEof
            || err.kind() == ErrorKind::ConnectionReset
            || err.kind() == ErrorKind::ConnectionAborted
            || err.kind() == ErrorKind::BrokenPipe
    }
}

/// Intent is the desired state that the connection should be in after the initial handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(test, derive(Dummy))]
pub enum Intent {
    /// Query the server information without connecting.
    Status,
    /// Log into the Minecraft server, establishing a connection.
    Login,
    /// Log in after having been transferred from another server.
    Transfer,
}

impl From<Intent> for VarInt {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Status => 1,
            Intent::Login => 2,
            Intent::Transfer => 3,
        }
    }
}

impl TryFrom<VarInt> for Intent {
    type Error = Error;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Intent::Status),
            2 => Ok(Intent::Login),
            3 => Ok(Intent::Transfer),
            _ => Err(Error::IllegalEnumValue {
                kind: "Intent",
                value,
            }),
        }
    }
}

/// A single framed packet in its raw form: the decoded packet ID and the undecoded body.
///
/// The connection state machine reads raw frames and decides per `(state, id)` how to decode them,
/// which also allows echoing a frame verbatim (status ping) or draining unexpected ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub id: VarInt,
    pub body: Vec<u8>,
}

impl RawFrame {
    /// Decodes the body of this frame into the typed packet, ignoring the frame's ID.
    pub async fn decode<T: ReadPacket + Send + Sync>(&self) -> Result<T, Error> {
        let mut buffer = Cursor::new(&self.body);
        T::read_from_buffer(&mut buffer).await
    }
}

/// Packets are network packets that are part of the protocol definition and identified by a
/// context and ID. Packets whose ID varies between protocol versions do not implement this trait
/// and are written with an explicit ID from the [version table](ids::PacketIds) instead.
pub trait Packet {
    /// Returns the defined ID of this network packet.
    const ID: VarInt;
}

/// `WritePacket`s are packets whose body can be written to a buffer.
pub trait WritePacket {
    /// Writes the data from this packet into the supplied [`S`].
    fn write_to_buffer<S>(&self, buffer: &mut S) -> impl Future<Output = Result<(), Error>>
    where
        S: AsyncWrite + Unpin + Send + Sync;
}

/// `ReadPacket`s are packets whose body can be read from a buffer.
pub trait ReadPacket: Sized {
    /// Creates a new instance of this packet with the data from the buffer.
    fn read_from_buffer<S>(buffer: &mut S) -> impl Future<Output = Result<Self, Error>>
    where
        S: AsyncRead + Unpin + Send + Sync;
}

/// `AsyncWritePacket` allows writing a specific [`WritePacket`] to an [`AsyncWrite`].
///
/// There are additional methods to write the data that is encoded in a Minecraft-specific manner.
/// Their implementation is analogous to the [read implementation](AsyncReadPacket).
pub trait AsyncWritePacket {
    /// Writes a [`WritePacket`] with its fixed [`Packet::ID`] onto this object as described in the
    /// official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Packet_format
    fn write_packet<T: Packet + WritePacket + Send + Sync + Debug>(
        &mut self,
        packet: T,
    ) -> impl Future<Output = Result<(), Error>>;

    /// Writes a [`WritePacket`] with an explicit packet ID (for IDs that differ between protocol
    /// versions and come from the [version table](ids::PacketIds)).
    fn write_packet_with_id<T: WritePacket + Send + Sync + Debug>(
        &mut self,
        id: VarInt,
        packet: T,
    ) -> impl Future<Output = Result<(), Error>>;

    /// Writes a [`RawFrame`] back onto this object unchanged.
    fn write_frame(&mut self, frame: &RawFrame) -> impl Future<Output = Result<(), Error>>;

    /// Writes a [`VarInt`] onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#VarInt_and_VarLong
    fn write_varint(&mut self, int: VarInt) -> impl Future<Output = Result<(), Error>>;

    /// Writes a [`VarLong`] onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#VarInt_and_VarLong
    fn write_varlong(&mut self, int: VarLong) -> impl Future<Output = Result<(), Error>>;

    /// Writes a `String` onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:String
    fn write_string(&mut self, string: &str) -> impl Future<Output = Result<(), Error>>;

    /// Writes a `Uuid` onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:UUID
    fn write_uuid(&mut self, uuid: &Uuid) -> impl Future<Output = Result<(), Error>>;

    /// Writes a `bool` onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:Boolean
    fn write_bool(&mut self, bool: bool) -> impl Future<Output = Result<(), Error>>;

    /// Writes a string TextComponent onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Type:Text_Component
    fn write_text_component(&mut self, str: &str) -> impl Future<Output = Result<(), Error>>;

    /// Writes a vec of `u8` onto this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:Prefixed_Array
    fn write_bytes(&mut self, arr: &[u8]) -> impl Future<Output = Result<(), Error>>;
}

/// `AsyncReadPacket` allows reading a specific [`ReadPacket`] from an [`AsyncRead`].
///
/// There are additional methods to read the data that is encoded in a Minecraft-specific manner.
/// Their implementation is analogous to the [write implementation](AsyncWritePacket).
pub trait AsyncReadPacket {
    /// Reads the supplied [`ReadPacket`] type from this object as described in the official
    /// [protocol documentation][protocol-doc], validating its fixed [`Packet::ID`].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Packet_format
    fn read_packet<T: Packet + ReadPacket + Send + Sync>(
        &mut self,
    ) -> impl Future<Output = Result<T, Error>>;

    /// Reads the next frame from this object without interpreting the body.
    fn read_frame(&mut self) -> impl Future<Output = Result<RawFrame, Error>>;

    /// Reads a [`VarInt`] from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#VarInt_and_VarLong
    fn read_varint(&mut self) -> impl Future<Output = Result<VarInt, Error>>;

    /// Reads a [`VarLong`] from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#VarInt_and_VarLong
    fn read_varlong(&mut self) -> impl Future<Output = Result<VarLong, Error>>;

    /// Reads a `String` from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:String
    fn read_string(&mut self) -> impl Future<Output = Result<String, Error>>;

    /// Reads a `bool` from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:Boolean
    fn read_bool(&mut self) -> impl Future<Output = Result<bool, Error>>;

    /// Reads a `Uuid` from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:UUID
    fn read_uuid(&mut self) -> impl Future<Output = Result<Uuid, Error>>;

    /// Reads a vec of `u8` from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Minecraft_Wiki:Projects/wiki.vg_merge/Protocol#Type:Prefixed_Array
    fn read_bytes(&mut self) -> impl Future<Output = Result<Vec<u8>, Error>>;
}

#[cfg(test)]
mod tests {
    use crate::{AsyncReadPacket, AsyncWritePacket, Packet, ReadPacket, VarInt, WritePacket};
    use fake::{Dummy, Fake, Faker};
    use std::fmt::Debug;
    use std::io::Cursor;

    pub async fn assert_packet<T>(packet_id: VarInt)
    where
        T: PartialEq + Eq + Dummy<Faker> + Packet + ReadPacket + WritePacket,
        T: Send + Sync + Debug + Clone,
    {
        // generate data
        let expected: T = Faker.fake();

        // write packet
        let mut writer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        expected
            .write_to_buffer(&mut writer)
            .await
            .expect("failed to write packet");

        // read packet
        let mut reader: Cursor<Vec<u8>> = Cursor::new(writer.into_inner());
        let actual = T::read_from_buffer(&mut reader)
            .await
            .expect("failed to read packet");

        assert_eq!(T::ID, packet_id, "mismatching packet id");
        assert_eq!(expected, actual);
        assert_eq!(
            reader.position() as usize,
            reader.get_ref().len(),
            "there are remaining bytes in the buffer"
        );
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        use crate::RawFrame;

        let frame = RawFrame {
            id: 0x42,
            body: vec![1, 2, 3, 4],
        };

        let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        buffer.write_frame(&frame).await.expect("write frame");

        let mut reader: Cursor<Vec<u8>> = Cursor::new(buffer.into_inner());
        let read = reader.read_frame().await.expect("read frame");

        assert_eq!(frame, read);
    }

    #[tokio::test]
    async fn frame_rejects_oversized_length() {
        let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        buffer
            .write_varint(crate::MAX_PACKET_LENGTH + 1)
            .await
            .expect("write length");

        let mut reader: Cursor<Vec<u8>> = Cursor::new(buffer.into_inner());
        let result = reader.read_frame().await;
        assert!(matches!(result, Err(crate::Error::IllegalPacketLength)));
    }
}
