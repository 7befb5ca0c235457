use crate::{AsyncWritePacket, Error, Packet, RawFrame, VarInt, VarLong, WritePacket};
use std::fmt::Debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

impl<W: AsyncWrite + Unpin + Send + Sync> AsyncWritePacket for W {
    async fn write_packet<T: Packet + WritePacket + Send + Sync + Debug>(
        &mut self,
        packet: T,
    ) -> Result<(), Error> {
        self.write_packet_with_id(T::ID, packet).await
    }

    async fn write_packet_with_id<T: WritePacket + Send + Sync + Debug>(
        &mut self,
        id: VarInt,
        packet: T,
    ) -> Result<(), Error> {
        // the length prefix needs the final size, so id and body are serialized first
        let mut frame = Vec::with_capacity(64);
        frame.write_varint(id).await?;
        packet.write_to_buffer(&mut frame).await?;

        let mut prefixed = Vec::with_capacity(frame.len() + 3);
        prefixed.write_varint(frame.len() as VarInt).await?;
        prefixed.extend_from_slice(&frame);
        self.write_all(&prefixed).await?;

        Ok(())
    }

    async fn write_frame(&mut self, frame: &RawFrame) -> Result<(), Error> {
        let mut prefixed = Vec::with_capacity(frame.body.len() + 3);
        prefixed.write_varint(frame.body.len() as VarInt + 1).await?;
        prefixed.write_varint(frame.id).await?;
        prefixed.extend_from_slice(&frame.body);
        self.write_all(&prefixed).await?;

        Ok(())
    }

    async fn write_varint(&mut self, value: VarInt) -> Result<(), Error> {
        // seven payload bits per byte, low groups first, high bit flags a continuation
        let mut remaining = value as u32;
        let mut encoded = [0u8; 5];
        let mut length = 0;
        loop {
            encoded[length] = (remaining & 0x7F) as u8;
            remaining >>= 7;
            if remaining == 0 {
                length += 1;
                break;
            }
            encoded[length] |= 0x80;
            length += 1;
        }
        self.write_all(&encoded[..length]).await?;

        Ok(())
    }

    async fn write_varlong(&mut self, value: VarLong) -> Result<(), Error> {
        let mut remaining = value as u64;
        let mut encoded = [0u8; 10];
        let mut length = 0;
        loop {
            encoded[length] = (remaining & 0x7F) as u8;
            remaining >>= 7;
            if remaining == 0 {
                length += 1;
                break;
            }
            encoded[length] |= 0x80;
            length += 1;
        }
        self.write_all(&encoded[..length]).await?;

        Ok(())
    }

    async fn write_string(&mut self, string: &str) -> Result<(), Error> {
        self.write_varint(string.len() as VarInt).await?;
        self.write_all(string.as_bytes()).await?;

        Ok(())
    }

    async fn write_uuid(&mut self, id: &Uuid) -> Result<(), Error> {
        self.write_all(id.as_bytes()).await?;

        Ok(())
    }

    async fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        self.write_u8(u8::from(value)).await?;

        Ok(())
    }

    async fn write_text_component(&mut self, text: &str) -> Result<(), Error> {
        // a bare string is a valid component: TAG_String, u16 byte length, then the bytes
        self.write_u8(0x08).await?;
        self.write_u16(text.len() as u16).await?;
        self.write_all(text.as_bytes()).await?;

        Ok(())
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write_varint(data.len() as VarInt).await?;
        self.write_all(data).await?;

        Ok(())
    }
}
