use crate::{Error, Packet};
#[cfg(test)]
use fake::Dummy;

pub mod clientbound {
    use super::*;
    use crate::{AsyncReadPacket, AsyncWritePacket, ReadPacket, VarInt, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// The [`StatusResponsePacket`].
    ///
    /// The body is the JSON-encoded server status, passed through as-is.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Status_Response)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct StatusResponsePacket {
        pub body: String,
    }

    impl Packet for StatusResponsePacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for StatusResponsePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.body).await?;

            Ok(())
        }
    }

    impl ReadPacket for StatusResponsePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let body = buffer.read_string().await?;

            Ok(Self { body })
        }
    }

    /// The [`PongPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Pong_Response_(status))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct PongPacket {
        pub payload: i64,
    }

    impl Packet for PongPacket {
        const ID: VarInt = 0x01;
    }

    impl WritePacket for PongPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_i64(self.payload).await?;

            Ok(())
        }
    }

    impl ReadPacket for PongPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let payload = buffer.read_i64().await?;

            Ok(Self { payload })
        }
    }
}

pub mod serverbound {
    use super::*;
    use crate::{ReadPacket, VarInt, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// The [`StatusRequestPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Status_Request)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct StatusRequestPacket;

    impl Packet for StatusRequestPacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for StatusRequestPacket {
        async fn write_to_buffer<S>(&self, _buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            Ok(())
        }
    }

    impl ReadPacket for StatusRequestPacket {
        async fn read_from_buffer<S>(_buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            Ok(Self)
        }
    }

    /// The [`PingPacket`].
    ///
    /// The server echoes the payload verbatim in the [`PongPacket`](super::clientbound::PongPacket).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Ping_Request_(status))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct PingPacket {
        pub payload: i64,
    }

    impl Packet for PingPacket {
        const ID: VarInt = 0x01;
    }

    impl WritePacket for PingPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_i64(self.payload).await?;

            Ok(())
        }
    }

    impl ReadPacket for PingPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let payload = buffer.read_i64().await?;

            Ok(Self { payload })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_packet;

    #[tokio::test]
    async fn write_read_clientbound_status_response_packet() {
        assert_packet::<clientbound::StatusResponsePacket>(0x00).await;
    }

    #[tokio::test]
    async fn write_read_clientbound_pong_packet() {
        assert_packet::<clientbound::PongPacket>(0x01).await;
    }

    #[tokio::test]
    async fn write_read_serverbound_status_request_packet() {
        assert_packet::<serverbound::StatusRequestPacket>(0x00).await;
    }

    #[tokio::test]
    async fn write_read_serverbound_ping_packet() {
        assert_packet::<serverbound::PingPacket>(0x01).await;
    }
}
