//! The per-protocol-version packet ID table.
//!
//! Every wire-facing operation that may differ between versions resolves its packet IDs through
//! this table instead of scattered constants. Lookups for versions newer than the newest entry
//! fall back to the newest entry; the caller is expected to log that fallback.

use crate::{Protocol, VarInt};

/// All packet IDs used by the proxy, valid for the protocol versions in `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIds {
    /// The smallest protocol version this entry applies to.
    pub min: Protocol,
    /// The largest protocol version this entry applies to.
    pub max: Protocol,
    /// Whether login-success carries the trailing `strictErrorHandling` boolean.
    pub strict_error_handling: bool,

    // status (clientbound)
    pub status_response: VarInt,
    pub ping_response: VarInt,

    // login
    pub login_disconnect: VarInt,
    pub encryption_request: VarInt,
    pub login_success: VarInt,
    pub login_start: VarInt,
    pub encryption_response: VarInt,
    pub login_acknowledged: VarInt,

    // configuration
    pub plugin_message_config: VarInt,
    pub disconnect_config: VarInt,
    pub finish_configuration: VarInt,
    pub keep_alive_config: VarInt,
    pub transfer_config: VarInt,

    // play (clientbound)
    pub login_play: VarInt,
    pub game_event: VarInt,
    pub chunk_data: VarInt,
    pub synchronize_position: VarInt,
    pub keep_alive_play: VarInt,
    pub system_chat: VarInt,
    pub set_title: VarInt,
    pub set_subtitle: VarInt,
    pub disconnect_play: VarInt,
    pub transfer_play: VarInt,

    // play (serverbound)
    pub chat_message: VarInt,
    pub player_loaded: VarInt,
}

/// The IDs shared by all entries. The IDs the proxy uses have been stable across the supported
/// window (1.20.3 through 1.21.7); only the login-success layout changed in between.
const fn base(min: Protocol, max: Protocol, strict_error_handling: bool) -> PacketIds {
    PacketIds {
        min,
        max,
        strict_error_handling,
        status_response: 0x00,
        ping_response: 0x01,
        login_disconnect: 0x00,
        encryption_request: 0x01,
        login_success: 0x02,
        login_start: 0x00,
        encryption_response: 0x01,
        login_acknowledged: 0x03,
        plugin_message_config: 0x01,
        disconnect_config: 0x02,
        finish_configuration: 0x03,
        keep_alive_config: 0x04,
        transfer_config: 0x0B,
        login_play: 0x2B,
        game_event: 0x22,
        chunk_data: 0x27,
        synchronize_position: 0x41,
        keep_alive_play: 0x26,
        system_chat: 0x73,
        set_title: 0x63,
        set_subtitle: 0x61,
        disconnect_play: 0x1D,
        transfer_play: 0x7A,
        chat_message: 0x07,
        player_loaded: 0x2A,
    }
}

/// The table entries, ascending by version range. The 766..=767 window (1.20.5 through 1.21.1)
/// is the only one whose login-success carries the `strictErrorHandling` flag.
static TABLE: [PacketIds; 4] = [
    base(765, 765, false),
    base(766, 767, true),
    base(768, 769, false),
    base(770, 772, false),
];

impl PacketIds {
    /// Resolves the ID table entry for the given protocol version.
    ///
    /// Returns the matching entry and whether the version was an exact table hit. Versions outside
    /// every range resolve to the newest entry with `false`; callers log a warning for those.
    pub fn for_protocol(protocol: Protocol) -> (&'static PacketIds, bool) {
        for entry in &TABLE {
            if protocol >= entry.min && protocol <= entry.max {
                return (entry, true);
            }
        }
        (&TABLE[TABLE.len() - 1], false)
    }

    /// All protocol versions covered by the table.
    pub fn supported_protocols() -> impl Iterator<Item = Protocol> {
        TABLE.iter().flat_map(|entry| entry.min..=entry.max)
    }
}
