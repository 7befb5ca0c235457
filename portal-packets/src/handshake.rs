use crate::{Error, Intent, Packet};
#[cfg(test)]
use fake::Dummy;

pub mod serverbound {
    use super::*;
    use crate::{AsyncReadPacket, AsyncWritePacket, ReadPacket, VarInt, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// The [`HandshakePacket`].
    ///
    /// This is the first packet of every connection and decides whether the dialogue continues in
    /// the status or the login phase. Portal also writes it when probing upstreams for their
    /// status.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Handshake)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct HandshakePacket {
        pub protocol_version: VarInt,
        pub server_address: String,
        pub server_port: u16,
        pub intent: Intent,
    }

    impl Packet for HandshakePacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for HandshakePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_varint(self.protocol_version).await?;
            buffer.write_string(&self.server_address).await?;
            buffer.write_u16(self.server_port).await?;
            buffer.write_varint(self.intent.into()).await?;

            Ok(())
        }
    }

    impl ReadPacket for HandshakePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let protocol_version = buffer.read_varint().await?;
            let server_address = buffer.read_string().await?;
            let server_port = buffer.read_u16().await?;
            let intent = buffer.read_varint().await?.try_into()?;

            Ok(Self {
                protocol_version,
                server_address,
                server_port,
                intent,
            })
        }
    }
}
