use crate::{
    AsyncReadPacket, Error, MAX_PACKET_LENGTH, Packet, RawFrame, ReadPacket, VarInt, VarLong,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

impl<R: AsyncRead + Unpin + Send + Sync> AsyncReadPacket for R {
    async fn read_packet<T: Packet + ReadPacket + Send + Sync>(&mut self) -> Result<T, Error> {
        let declared = self.read_varint().await?;
        if declared == 0 || declared > MAX_PACKET_LENGTH {
            return Err(Error::IllegalPacketLength);
        }

        let id = self.read_varint().await?;
        if id != T::ID {
            return Err(Error::IllegalPacketId {
                expected: T::ID,
                actual: id,
            });
        }

        // hand the body to the packet through a bounded reader (all ids in use are single-byte)
        let mut body = self.take(declared as u64 - 1);
        T::read_from_buffer(&mut body).await
    }

    async fn read_frame(&mut self) -> Result<RawFrame, Error> {
        let declared = self.read_varint().await?;
        if declared == 0 || declared > MAX_PACKET_LENGTH {
            return Err(Error::IllegalPacketLength);
        }

        // all ids in use are single-byte
        let id = self.read_varint().await?;

        let expected = declared as usize - 1;
        let mut body = Vec::with_capacity(expected);
        self.take(expected as u64).read_to_end(&mut body).await?;
        if body.len() != expected {
            return Err(Error::IllegalPacketLength);
        }

        Ok(RawFrame { id, body })
    }

    async fn read_varint(&mut self) -> Result<VarInt, Error> {
        // seven payload bits per byte, low groups first; more than five bytes is malformed
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8().await?;
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value as VarInt);
            }
        }
        Err(Error::InvalidVarInt)
    }

    async fn read_varlong(&mut self) -> Result<VarLong, Error> {
        let mut value: u64 = 0;
        for shift in (0..70).step_by(7) {
            let byte = self.read_u8().await?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value as VarLong);
            }
        }
        Err(Error::InvalidVarInt)
    }

    async fn read_string(&mut self) -> Result<String, Error> {
        // a negative length would wrap into an absurd allocation
        let length = usize::try_from(self.read_varint().await?)
            .map_err(|_| Error::IllegalPacketLength)?;

        let mut raw = vec![0u8; length];
        self.read_exact(&mut raw).await?;

        String::from_utf8(raw).map_err(|_| Error::InvalidEncoding)
    }

    async fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8().await? != 0)
    }

    async fn read_uuid(&mut self) -> Result<Uuid, Error> {
        let mut raw = [0u8; 16];
        self.read_exact(&mut raw).await?;

        Ok(Uuid::from_bytes(raw))
    }

    async fn read_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let length = usize::try_from(self.read_varint().await?)
            .map_err(|_| Error::IllegalPacketLength)?;

        let mut raw = vec![0u8; length];
        self.read_exact(&mut raw).await?;

        Ok(raw)
    }
}
