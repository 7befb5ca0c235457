//! The slice of the play phase that a limbo world needs.
//!
//! None of these packets have a stable id across the supported protocol window, so none of them
//! implement [`Packet`](crate::Packet); they are always written with an explicit id from the
//! [id table](crate::ids::PacketIds).

use crate::Error;
#[cfg(test)]
use fake::Dummy;

pub mod clientbound {
    use super::*;
    use crate::{AsyncWritePacket, VarInt, WritePacket};
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    /// The [`LoginPlayPacket`].
    ///
    /// Places the client into the play state. The fields that are fixed for a limbo world (no
    /// hardcore, no respawn screen, no death location) are written as constants.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_(play))
    #[derive(Debug, Clone, PartialEq)]
    pub struct LoginPlayPacket {
        pub entity_id: i32,
        pub dimension_name: String,
        pub hashed_seed: i64,
        /// 3 is spectator, which keeps the held client from interacting with the void world.
        pub game_mode: u8,
        pub view_distance: VarInt,
        pub simulation_distance: VarInt,
    }

    impl Default for LoginPlayPacket {
        fn default() -> Self {
            Self {
                entity_id: 1,
                dimension_name: "minecraft:overworld".to_owned(),
                hashed_seed: 0,
                game_mode: 3,
                view_distance: 2,
                simulation_distance: 2,
            }
        }
    }

    impl WritePacket for LoginPlayPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_i32(self.entity_id).await?;
            buffer.write_bool(false).await?; // hardcore
            buffer.write_varint(1).await?; // dimension count
            buffer.write_string(&self.dimension_name).await?;
            buffer.write_varint(1).await?; // max players
            buffer.write_varint(self.view_distance).await?;
            buffer.write_varint(self.simulation_distance).await?;
            buffer.write_bool(false).await?; // reduced debug info
            buffer.write_bool(false).await?; // enable respawn screen
            buffer.write_bool(false).await?; // limited crafting
            buffer.write_varint(1).await?; // dimension type
            buffer.write_string(&self.dimension_name).await?;
            buffer.write_i64(self.hashed_seed).await?;
            buffer.write_u8(self.game_mode).await?;
            buffer.write_i8(-1).await?; // previous game mode
            buffer.write_bool(false).await?; // debug world
            buffer.write_bool(false).await?; // flat world
            buffer.write_bool(false).await?; // has death location
            buffer.write_varint(0).await?; // portal cooldown
            buffer.write_varint(0).await?; // sea level
            buffer.write_bool(false).await?; // enforces secure chat

            Ok(())
        }
    }

    /// The [`GameEventPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Game_Event)
    #[derive(Debug, Clone, PartialEq)]
    pub struct GameEventPacket {
        pub event: u8,
        pub value: f32,
    }

    impl GameEventPacket {
        /// Event 13: the client shows the loading screen until its first chunk arrives.
        pub const START_WAITING_FOR_CHUNKS: u8 = 13;
    }

    impl WritePacket for GameEventPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_u8(self.event).await?;
            buffer.write_f32(self.value).await?;

            Ok(())
        }
    }

    /// The [`ChunkDataPacket`], always an empty chunk.
    ///
    /// The held client needs exactly one chunk under its feet to leave the loading screen; all
    /// sections are void air with empty light. Layout targets the 1.21.5 heightmap format
    /// (prefixed array of typed long arrays).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Chunk_Data_and_Update_Light)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct ChunkDataPacket {
        pub chunk_x: i32,
        pub chunk_z: i32,
    }

    /// Sections of an overworld column (-64 to 320).
    const SECTION_COUNT: usize = 24;

    /// 384 height values at 9 bits each, packed into 64-bit longs.
    const HEIGHTMAP_LONGS: i32 = 37;

    impl WritePacket for ChunkDataPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_i32(self.chunk_x).await?;
            buffer.write_i32(self.chunk_z).await?;

            // heightmaps: one MOTION_BLOCKING (type 4) entry of zeroed longs
            buffer.write_varint(1).await?;
            buffer.write_varint(4).await?;
            buffer.write_varint(HEIGHTMAP_LONGS).await?;
            for _ in 0..HEIGHTMAP_LONGS {
                buffer.write_i64(0).await?;
            }

            // section data: single-value palettes of air with empty data arrays
            let mut data = Vec::with_capacity(SECTION_COUNT * 8);
            for _ in 0..SECTION_COUNT {
                data.write_i16(0).await?; // non-air block count
                data.write_u8(0).await?; // block states: bits per entry
                data.write_varint(0).await?; // block states: palette value (air)
                data.write_varint(0).await?; // block states: data array length
                data.write_u8(0).await?; // biomes: bits per entry
                data.write_varint(0).await?; // biomes: palette value
                data.write_varint(0).await?; // biomes: data array length
            }
            buffer.write_bytes(&data).await?;

            // block entities
            buffer.write_varint(0).await?;

            // light: nothing lit, every section marked empty
            let empty_mask: i64 = 0xFFFF_FFFF;
            buffer.write_varint(0).await?; // sky light mask
            buffer.write_varint(0).await?; // block light mask
            buffer.write_varint(1).await?;
            buffer.write_i64(empty_mask).await?; // empty sky light mask
            buffer.write_varint(1).await?;
            buffer.write_i64(empty_mask).await?; // empty block light mask
            buffer.write_varint(0).await?; // sky light arrays
            buffer.write_varint(0).await?; // block light arrays

            Ok(())
        }
    }

    /// The [`SynchronizePositionPacket`].
    ///
    /// 1.21.2+ layout (position, velocity, rotation, relative-teleport flags).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Synchronize_Player_Position)
    #[derive(Debug, Clone, PartialEq)]
    pub struct SynchronizePositionPacket {
        pub teleport_id: VarInt,
        pub x: f64,
        pub y: f64,
        pub z: f64,
        pub yaw: f32,
        pub pitch: f32,
    }

    impl Default for SynchronizePositionPacket {
        fn default() -> Self {
            Self {
                teleport_id: 1,
                x: 0.0,
                y: 70.0,
                z: 0.0,
                yaw: 0.0,
                pitch: 0.0,
            }
        }
    }

    impl WritePacket for SynchronizePositionPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_varint(self.teleport_id).await?;
            buffer.write_f64(self.x).await?;
            buffer.write_f64(self.y).await?;
            buffer.write_f64(self.z).await?;
            buffer.write_f64(0.0).await?; // velocity x
            buffer.write_f64(0.0).await?; // velocity y
            buffer.write_f64(0.0).await?; // velocity z
            buffer.write_f32(self.yaw).await?;
            buffer.write_f32(self.pitch).await?;
            buffer.write_i32(0).await?; // teleport flags (all absolute)

            Ok(())
        }
    }

    /// The [`SystemChatPacket`].
    ///
    /// The content is written as a plain-string NBT text component.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#System_Chat_Message)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct SystemChatPacket {
        pub content: String,
        pub overlay: bool,
    }

    impl WritePacket for SystemChatPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_text_component(&self.content).await?;
            buffer.write_bool(self.overlay).await?;

            Ok(())
        }
    }

    /// The [`SetTitlePacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Set_Title_Text)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct SetTitlePacket {
        pub text: String,
    }

    impl WritePacket for SetTitlePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_text_component(&self.text).await?;

            Ok(())
        }
    }

    /// The [`SetSubtitlePacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Set_Subtitle_Text)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct SetSubtitlePacket {
        pub text: String,
    }

    impl WritePacket for SetSubtitlePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_text_component(&self.text).await?;

            Ok(())
        }
    }

    /// The [`DisconnectPacket`] for the configuration and play phases (NBT component reason).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Disconnect_(play))
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct DisconnectPacket {
        pub reason: String,
    }

    impl WritePacket for DisconnectPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_text_component(&self.reason).await?;

            Ok(())
        }
    }
}

pub mod serverbound {
    use super::*;
    use crate::{AsyncReadPacket, AsyncWritePacket, ReadPacket, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// The [`ChatMessagePacket`].
    ///
    /// Only the message text matters to the password flow; the signature block behind it is
    /// drained and discarded (the proxy never forwards or validates chat signatures).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Chat_Message)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct ChatMessagePacket {
        pub message: String,
    }

    impl WritePacket for ChatMessagePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.message).await?;
            buffer.write_i64(0).await?; // timestamp
            buffer.write_i64(0).await?; // salt
            buffer.write_bool(false).await?; // no signature
            buffer.write_varint(0).await?; // acknowledged message count
            buffer.write_all(&[0; 3]).await?; // acknowledged fixed bitset

            Ok(())
        }
    }

    impl ReadPacket for ChatMessagePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let message = buffer.read_string().await?;

            // drain the signature block
            let mut rest = Vec::new();
            buffer.read_to_end(&mut rest).await?;

            Ok(Self { message })
        }
    }

    /// The [`PlayerLoadedPacket`].
    ///
    /// Sent by the client once its local world is ready; the limbo flow waits for it before
    /// starting the password dialogue.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Player_Loaded)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct PlayerLoadedPacket;

    impl WritePacket for PlayerLoadedPacket {
        async fn write_to_buffer<S>(&self, _buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            Ok(())
        }
    }

    impl ReadPacket for PlayerLoadedPacket {
        async fn read_from_buffer<S>(_buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            Ok(Self)
        }
    }
}
