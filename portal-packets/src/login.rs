use crate::{Error, Packet};
#[cfg(test)]
use fake::Dummy;
use serde::{Deserialize, Serialize};

/// Represents a single property of a Minecraft user profile.
///
/// A property defines one specific aspect of a user profile. The most prominent property is called
/// `textures` and contains information on the skin and visual appearance of the user. Each
/// property name is unique for an individual user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(test, derive(Dummy))]
#[serde(rename_all = "camelCase")]
pub struct ProfileProperty {
    /// The unique, identifiable name of the profile property.
    pub name: String,
    /// The base64 encoded value of the profile property.
    pub value: String,
    /// The base64 encoded signature of the profile property.
    /// Only provided if `?unsigned=false` is appended to the session-service url.
    pub signature: Option<String>,
}

pub mod clientbound {
    use super::*;
    use crate::{AsyncReadPacket, AsyncWritePacket, ReadPacket, VarInt, VerifyToken, WritePacket};
    use std::io::ErrorKind;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
    use uuid::Uuid;

    /// The [`DisconnectPacket`].
    ///
    /// The reason is a JSON text component. Only valid during the login phase; the configuration
    /// and play phases encode their reason as an NBT component instead
    /// ([`crate::play::clientbound::DisconnectPacket`]).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Disconnect_(login))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct DisconnectPacket {
        /// The JSON text component containing the reason of the disconnect.
        pub reason: String,
    }

    impl Packet for DisconnectPacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for DisconnectPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.reason).await?;

            Ok(())
        }
    }

    impl ReadPacket for DisconnectPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let reason = buffer.read_string().await?;

            Ok(Self { reason })
        }
    }

    /// The [`EncryptionRequestPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Encryption_Request)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct EncryptionRequestPacket {
        pub server_id: String,
        pub public_key: Vec<u8>,
        pub verify_token: VerifyToken,
        pub should_authenticate: bool,
    }

    impl Packet for EncryptionRequestPacket {
        const ID: VarInt = 0x01;
    }

    impl WritePacket for EncryptionRequestPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.server_id).await?;
            buffer.write_bytes(&self.public_key).await?;
            buffer.write_bytes(&self.verify_token).await?;
            buffer.write_bool(self.should_authenticate).await?;

            Ok(())
        }
    }

    impl ReadPacket for EncryptionRequestPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let server_id = buffer.read_string().await?;
            let public_key = buffer.read_bytes().await?;
            let verify_token = buffer
                .read_bytes()
                .await?
                .try_into()
                .map_err(|_| Error::InvalidEncoding)?;
            let should_authenticate = buffer.read_bool().await?;

            Ok(Self {
                server_id,
                public_key,
                verify_token,
                should_authenticate,
            })
        }
    }

    /// The [`LoginSuccessPacket`].
    ///
    /// Protocol versions 766 and 767 carry a trailing `strictErrorHandling` boolean; all other
    /// supported versions omit it. Which variant to write comes from the
    /// [id table](crate::ids::PacketIds).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_Success)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct LoginSuccessPacket {
        pub user_id: Uuid,
        pub user_name: String,
        pub properties: Vec<ProfileProperty>,
        pub strict_error_handling: Option<bool>,
    }

    impl Packet for LoginSuccessPacket {
        const ID: VarInt = 0x02;
    }

    impl WritePacket for LoginSuccessPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_uuid(&self.user_id).await?;
            buffer.write_string(&self.user_name).await?;
            buffer.write_varint(self.properties.len() as VarInt).await?;
            for property in &self.properties {
                buffer.write_string(&property.name).await?;
                buffer.write_string(&property.value).await?;
                buffer.write_bool(property.signature.is_some()).await?;
                if let Some(signature) = &property.signature {
                    buffer.write_string(signature).await?;
                }
            }
            if let Some(strict) = self.strict_error_handling {
                buffer.write_bool(strict).await?;
            }

            Ok(())
        }
    }

    impl ReadPacket for LoginSuccessPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let user_id = buffer.read_uuid().await?;
            let user_name = buffer.read_string().await?;

            let count = buffer.read_varint().await?;
            let mut properties = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = buffer.read_string().await?;
                let value = buffer.read_string().await?;
                let signature = if buffer.read_bool().await? {
                    Some(buffer.read_string().await?)
                } else {
                    None
                };
                properties.push(ProfileProperty {
                    name,
                    value,
                    signature,
                });
            }

            // the trailing flag only exists on 766/767 frames; absence is the common case
            let strict_error_handling = match buffer.read_u8().await {
                Ok(byte) => Some(byte != 0),
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => None,
                Err(err) => return Err(err.into()),
            };

            Ok(Self {
                user_id,
                user_name,
                properties,
                strict_error_handling,
            })
        }
    }
}

pub mod serverbound {
    use super::*;
    use crate::{AsyncReadPacket, AsyncWritePacket, ReadPacket, VarInt, WritePacket};
    use tokio::io::{AsyncRead, AsyncWrite};
    use uuid::Uuid;

    /// The [`LoginStartPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_Start)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct LoginStartPacket {
        pub user_name: String,
        /// Usually either a session-service uuid or an offline uuid, chosen by the client.
        pub user_id: Uuid,
    }

    impl Packet for LoginStartPacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for LoginStartPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.user_name).await?;
            buffer.write_uuid(&self.user_id).await?;

            Ok(())
        }
    }

    impl ReadPacket for LoginStartPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let user_name = buffer.read_string().await?;
            let user_id = buffer.read_uuid().await?;

            Ok(Self { user_name, user_id })
        }
    }

    /// The [`EncryptionResponsePacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Encryption_Response)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct EncryptionResponsePacket {
        pub shared_secret: Vec<u8>,
        pub verify_token: Vec<u8>,
    }

    impl Packet for EncryptionResponsePacket {
        const ID: VarInt = 0x01;
    }

    impl WritePacket for EncryptionResponsePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_bytes(&self.shared_secret).await?;
            buffer.write_bytes(&self.verify_token).await?;

            Ok(())
        }
    }

    impl ReadPacket for EncryptionResponsePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let shared_secret = buffer.read_bytes().await?;
            let verify_token = buffer.read_bytes().await?;

            Ok(Self {
                shared_secret,
                verify_token,
            })
        }
    }

    /// The [`LoginAcknowledgedPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_Acknowledged)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct LoginAcknowledgedPacket;

    impl Packet for LoginAcknowledgedPacket {
        const ID: VarInt = 0x03;
    }

    impl WritePacket for LoginAcknowledgedPacket {
        async fn write_to_buffer<S>(&self, _buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            Ok(())
        }
    }

    impl ReadPacket for LoginAcknowledgedPacket {
        async fn read_from_buffer<S>(_buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            Ok(Self)
        }
    }
}
