use crate::{Error, Packet};
#[cfg(test)]
use fake::Dummy;

pub mod clientbound {
    use super::*;
    use crate::{AsyncReadPacket, AsyncWritePacket, ReadPacket, VarInt, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// The [`PluginMessagePacket`].
    ///
    /// Portal only ever writes the `minecraft:brand` channel during the configuration phase, but
    /// the payload is kept opaque so the data layout stays with the caller.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Clientbound_Plugin_Message_(configuration))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct PluginMessagePacket {
        pub channel: String,
        pub data: Vec<u8>,
    }

    impl Packet for PluginMessagePacket {
        const ID: VarInt = 0x01;
    }

    impl WritePacket for PluginMessagePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.channel).await?;
            buffer.write_all(&self.data).await?;

            Ok(())
        }
    }

    impl ReadPacket for PluginMessagePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let channel = buffer.read_string().await?;
            let mut data = Vec::new();
            buffer.read_to_end(&mut data).await?;

            Ok(Self { channel, data })
        }
    }

    /// The clientbound [`FinishConfigurationPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Finish_Configuration)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct FinishConfigurationPacket;

    impl Packet for FinishConfigurationPacket {
        const ID: VarInt = 0x03;
    }

    impl WritePacket for FinishConfigurationPacket {
        async fn write_to_buffer<S>(&self, _buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            Ok(())
        }
    }

    impl ReadPacket for FinishConfigurationPacket {
        async fn read_from_buffer<S>(_buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            Ok(Self)
        }
    }

    /// The [`KeepAlivePacket`].
    ///
    /// The payload is the current epoch time in milliseconds; the same body is reused for the play
    /// phase with the play-phase id from the [id table](crate::ids::PacketIds).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Clientbound_Keep_Alive_(configuration))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct KeepAlivePacket {
        pub id: i64,
    }

    impl Packet for KeepAlivePacket {
        const ID: VarInt = 0x04;
    }

    impl WritePacket for KeepAlivePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_i64(self.id).await?;

            Ok(())
        }
    }

    impl ReadPacket for KeepAlivePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let id = buffer.read_i64().await?;

            Ok(Self { id })
        }
    }

    /// The [`TransferPacket`].
    ///
    /// Instructs the client to close the connection and reconnect to the named host. The same body
    /// is reused for the play phase with the play-phase id from the
    /// [id table](crate::ids::PacketIds).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Transfer_(configuration))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct TransferPacket {
        pub host: String,
        pub port: VarInt,
    }

    impl Packet for TransferPacket {
        const ID: VarInt = 0x0B;
    }

    impl WritePacket for TransferPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.host).await?;
            buffer.write_varint(self.port).await?;

            Ok(())
        }
    }

    impl ReadPacket for TransferPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let host = buffer.read_string().await?;
            let port = buffer.read_varint().await?;

            Ok(Self { host, port })
        }
    }
}

pub mod serverbound {
    use super::*;
    use crate::{ReadPacket, VarInt, WritePacket};
    use tokio::io::{AsyncRead, AsyncWrite};

    /// The serverbound [`FinishConfigurationPacket`] (acknowledgement).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Acknowledge_Finish_Configuration)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct FinishConfigurationPacket;

    impl Packet for FinishConfigurationPacket {
        const ID: VarInt = 0x03;
    }

    impl WritePacket for FinishConfigurationPacket {
        async fn write_to_buffer<S>(&self, _buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            Ok(())
        }
    }

    impl ReadPacket for FinishConfigurationPacket {
        async fn read_from_buffer<S>(_buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            Ok(Self)
        }
    }
}
