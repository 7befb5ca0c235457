//! The limbo play surface: the minimal set of play-state packets that keeps a client alive while
//! its password is collected over chat, and the password dialogue itself.

use crate::auth::password;
use crate::auth::store::UserRecord;
use crate::connection::{Connection, LimboSession, Phase};
use crate::error::Error;
use portal_packets::configuration::clientbound as config_out;
use portal_packets::play::clientbound as play_out;
use portal_packets::play::serverbound as play_in;
use portal_packets::{AsyncWritePacket, WritePacket};
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How many wrong passwords are tolerated before the client is disconnected.
const MAX_PASSWORD_ATTEMPTS: u32 = 3;

/// How long the socket is held open after a play-state transfer, so the packet reaches a slow
/// client before the close.
const TRANSFER_GRACE: Duration = Duration::from_secs(5);

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    /// Runs the limbo half of the connection: world entry, the password dialogue and the final
    /// transfer (or disconnect).
    pub(crate) async fn run_limbo(&mut self, session: LimboSession) -> Result<(), Error> {
        // the client echoes finish-configuration when it is ready for play
        self.await_frame(self.ids.finish_configuration).await?;
        self.phase = Phase::Play;

        self.send_play_packet(self.ids.login_play, play_out::LoginPlayPacket::default())
            .await?;
        self.send_play_packet(
            self.ids.game_event,
            play_out::GameEventPacket {
                event: play_out::GameEventPacket::START_WAITING_FOR_CHUNKS,
                value: 0.0,
            },
        )
        .await?;
        self.send_play_packet(
            self.ids.chunk_data,
            play_out::ChunkDataPacket {
                chunk_x: 0,
                chunk_z: 0,
            },
        )
        .await?;
        self.send_play_packet(
            self.ids.synchronize_position,
            play_out::SynchronizePositionPacket::default(),
        )
        .await?;

        self.await_frame(self.ids.player_loaded).await?;
        info!(
            player = session.player_name,
            id = %session.player_id,
            "player has joined limbo"
        );

        let authenticated = if session.need_registration {
            self.run_registration(&session).await?
        } else {
            self.run_password_login(&session).await?
        };

        if authenticated {
            self.send_transfer_play(&session.destination).await?;
            info!(
                player = session.player_name,
                destination = session.destination,
                "redirecting player"
            );
            self.linger().await;
        }

        Ok(())
    }

    /// The registration path: capture the password twice, then register through the single
    /// writer. The confirmation loop is bounded by the connection deadline only.
    async fn run_registration(&mut self, session: &LimboSession) -> Result<bool, Error> {
        self.send_title("Register", "Please enter your password")
            .await?;

        let chosen = loop {
            let first = self.read_chat_message().await?;
            self.send_chat("Confirm your password by sending it again")
                .await?;
            let second = self.read_chat_message().await?;
            if first == second {
                break first;
            }
            self.send_chat("Password mismatch. You may try your password again.")
                .await?;
        };

        self.send_chat("Registering your account, please wait.")
            .await?;

        let hash = password::hash_password(&chosen)?;
        let record = UserRecord::new(
            session.player_name.clone(),
            session.player_id,
            session.auth_source.clone(),
        );
        match self.register(record, Some(hash)).await {
            Ok(()) => {
                self.send_chat("Registration successful.").await?;
                Ok(true)
            }
            Err(err) => {
                warn!(
                    player = session.player_name,
                    cause = err.to_string(),
                    "registration failed"
                );
                self.disconnect_play("Registration failed. Please try again later.")
                    .await?;
                Ok(false)
            }
        }
    }

    /// The login path: up to three attempts against the stored verifier.
    async fn run_password_login(&mut self, session: &LimboSession) -> Result<bool, Error> {
        self.send_title("Login", "Please enter your password").await?;

        let Some(stored) = self
            .proxy
            .auth
            .store
            .password_by_uuid(&session.player_id)
            .await?
        else {
            // a record without a password row cannot be proven; never guessable
            warn!(
                player = session.player_name,
                "offline record has no password, refusing login"
            );
            self.disconnect_play("No password is set for this account.")
                .await?;
            return Ok(false);
        };

        for attempt in 1..=MAX_PASSWORD_ATTEMPTS {
            let guess = self.read_chat_message().await?;
            if password::verify_password(&guess, &stored.password_hash)? {
                return Ok(true);
            }
            debug!(
                player = session.player_name,
                attempt, "password attempt failed"
            );
            self.send_chat("Incorrect password, please try again.")
                .await?;
        }

        self.disconnect_play("Too many wrong tries.").await?;
        Ok(false)
    }

    /// Reads the next chat message, trimmed. Non-chat frames are drained without consuming an
    /// attempt.
    async fn read_chat_message(&mut self) -> Result<String, Error> {
        let frame = self.await_frame(self.ids.chat_message).await?;
        let chat: play_in::ChatMessagePacket = frame.decode().await?;
        Ok(chat.message.trim().to_owned())
    }

    // play-state senders

    async fn send_play_packet<T: WritePacket + Send + Sync + Debug>(
        &mut self,
        id: portal_packets::VarInt,
        packet: T,
    ) -> Result<(), Error> {
        self.stream.write_packet_with_id(id, packet).await?;
        Ok(())
    }

    async fn send_title(&mut self, title: &str, subtitle: &str) -> Result<(), Error> {
        self.send_play_packet(
            self.ids.set_title,
            play_out::SetTitlePacket {
                text: title.to_owned(),
            },
        )
        .await?;
        self.send_play_packet(
            self.ids.set_subtitle,
            play_out::SetSubtitlePacket {
                text: subtitle.to_owned(),
            },
        )
        .await
    }

    async fn send_chat(&mut self, message: &str) -> Result<(), Error> {
        self.send_play_packet(
            self.ids.system_chat,
            play_out::SystemChatPacket {
                content: message.to_owned(),
                overlay: false,
            },
        )
        .await
    }

    async fn disconnect_play(&mut self, message: &str) -> Result<(), Error> {
        self.send_play_packet(
            self.ids.disconnect_play,
            play_out::DisconnectPacket {
                reason: message.to_owned(),
            },
        )
        .await
    }

    async fn send_transfer_play(&mut self, destination: &str) -> Result<(), Error> {
        let (host, port) = Self::split_destination(destination)?;
        self.send_play_packet(
            self.ids.transfer_play,
            config_out::TransferPacket { host, port },
        )
        .await
    }

    /// After a transfer nothing more is sent; the socket is drained until the client closes it or
    /// the grace period elapses.
    async fn linger(&mut self) {
        self.keep_alive = None;
        let _ = timeout(TRANSFER_GRACE, async {
            let mut scratch = [0u8; 256];
            loop {
                match self.stream.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }
}
