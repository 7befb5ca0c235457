//! The authentication policy: a pure decision over the connection's identity outcome and the
//! stored records.
//!
//! The connection gathers a snapshot (its online/fallback flags plus the uuid- and name-indexed
//! store views), asks [`decide`] for an action and executes it. The policy never touches the
//! protocol layer.

use crate::auth::is_offline_source;
use crate::auth::store::UserRecord;
use crate::config::AuthConfig;
use uuid::Uuid;

/// What the connection should do with an authenticated login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Send the transfer immediately.
    Bypass,
    /// Send the transfer immediately, and bind the verified identity in the background.
    BypassRegisterInBackground,
    /// Register through the single writer, then transfer once the write is acknowledged.
    RegisterThenBypass,
    /// Hold the client in limbo for the password dialogue.
    Limbo { need_registration: bool },
    /// Refuse the login with a chat message.
    Reject(Reject),
}

/// Why a login was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    /// No record exists and registration is closed (or the connection may not register).
    RegistrationClosed,
    /// Another uuid already holds this name.
    NameCollision,
    /// The uuid is bound to a different auth source.
    SourceMismatch,
}

impl Reject {
    /// The chat message shown to the client.
    pub fn message(&self) -> &'static str {
        match self {
            Reject::RegistrationClosed => "The server hasn't opened registration.",
            Reject::NameCollision => {
                "Access Denied. Another player already holds this name from a different source. \
                 Please log in through the original source first."
            }
            Reject::SourceMismatch => {
                "Access Denied. This UUID has been claimed from another source. \
                 Please authenticate through the original source first."
            }
        }
    }
}

/// Decides what to do with an authenticated login.
///
/// `online` means the identity was verified by a session service this connection; fallback
/// connections pass `online = false` and `fallback = true` regardless of the login-success path
/// that was used, and their `auth_source` is forced to the empty string by the caller.
pub fn decide(
    online: bool,
    fallback: bool,
    auth_source: &str,
    player_id: &Uuid,
    uuid_records: &[UserRecord],
    name_records: &[UserRecord],
    config: &AuthConfig,
) -> Decision {
    // bypass flags short-circuit everything else
    if online && config.yggdrasil_bypass {
        if uuid_records.is_empty() && config.open_registration {
            return Decision::BypassRegisterInBackground;
        }
        return Decision::Bypass;
    }
    if !online && config.offline_bypass {
        return Decision::Bypass;
    }

    if uuid_records.is_empty() {
        if !config.open_registration {
            return Decision::Reject(Reject::RegistrationClosed);
        }
        // fallback identities may not register; their uuid is unverified hearsay
        if fallback {
            return Decision::Reject(Reject::RegistrationClosed);
        }
        if !config.allow_name_collision
            && name_records.iter().any(|record| record.uuid != *player_id)
        {
            return Decision::Reject(Reject::NameCollision);
        }
        if online {
            return Decision::RegisterThenBypass;
        }
        return Decision::Limbo {
            need_registration: true,
        };
    }

    if online {
        // the identity is already bound to this source for this uuid
        if uuid_records
            .iter()
            .any(|record| record.source == auth_source)
        {
            return Decision::Bypass;
        }
        return Decision::Reject(Reject::SourceMismatch);
    }

    // offline identities always prove themselves against the stored password
    if uuid_records.iter().any(|record| is_offline_source(&record.source)) {
        return Decision::Limbo {
            need_registration: false,
        };
    }
    Decision::Reject(Reject::SourceMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::offline_uuid;

    fn config() -> AuthConfig {
        AuthConfig {
            yggdrasil_bypass: false,
            offline_bypass: false,
            open_registration: true,
            allow_name_collision: false,
            yggdrasil_fallback: false,
            ..AuthConfig::default()
        }
    }

    fn record(name: &str, uuid: Uuid, source: &str) -> UserRecord {
        UserRecord::new(name, uuid, source)
    }

    #[test]
    fn online_bypass_registers_first_timers_in_background() {
        let mut cfg = config();
        cfg.yggdrasil_bypass = true;
        let id = Uuid::new_v4();

        let decision = decide(true, false, "mojang", &id, &[], &[], &cfg);
        assert_eq!(decision, Decision::BypassRegisterInBackground);

        // a known identity bypasses without another registration
        let existing = [record("bob", id, "mojang")];
        let decision = decide(true, false, "mojang", &id, &existing, &existing, &cfg);
        assert_eq!(decision, Decision::Bypass);
    }

    #[test]
    fn offline_bypass_skips_the_password_flow() {
        let mut cfg = config();
        cfg.offline_bypass = true;
        let id = offline_uuid("alice");

        let decision = decide(false, false, "offline", &id, &[], &[], &cfg);
        assert_eq!(decision, Decision::Bypass);
    }

    #[test]
    fn online_first_timer_registers_then_bypasses() {
        let cfg = config();
        let id = Uuid::new_v4();

        let decision = decide(true, false, "mojang", &id, &[], &[], &cfg);
        assert_eq!(decision, Decision::RegisterThenBypass);
    }

    #[test]
    fn offline_first_timer_enters_limbo_for_registration() {
        let cfg = config();
        let id = offline_uuid("alice");

        let decision = decide(false, false, "offline", &id, &[], &[], &cfg);
        assert_eq!(
            decision,
            Decision::Limbo {
                need_registration: true
            }
        );
    }

    #[test]
    fn closed_registration_rejects_first_timers() {
        let mut cfg = config();
        cfg.open_registration = false;
        let id = offline_uuid("alice");

        let decision = decide(false, false, "offline", &id, &[], &[], &cfg);
        assert_eq!(decision, Decision::Reject(Reject::RegistrationClosed));
    }

    #[test]
    fn known_offline_identity_password_logs_in() {
        let cfg = config();
        let id = offline_uuid("alice");
        let records = [record("alice", id, "offline")];

        let decision = decide(false, false, "offline", &id, &records, &records, &cfg);
        assert_eq!(
            decision,
            Decision::Limbo {
                need_registration: false
            }
        );
    }

    #[test]
    fn offline_login_against_foreign_source_is_rejected() {
        let cfg = config();
        let id = offline_uuid("carol");
        let records = [record("carol", id, "mojang")];

        let decision = decide(false, false, "offline", &id, &records, &records, &cfg);
        assert_eq!(decision, Decision::Reject(Reject::SourceMismatch));
    }

    #[test]
    fn online_login_against_foreign_source_is_rejected() {
        let cfg = config();
        let id = Uuid::new_v4();
        let records = [record("carol", id, "otherygg")];

        let decision = decide(true, false, "mojang", &id, &records, &records, &cfg);
        assert_eq!(decision, Decision::Reject(Reject::SourceMismatch));
    }

    #[test]
    fn name_collision_blocks_registration() {
        let cfg = config();
        let new_id = offline_uuid("carol");
        let holder = [record("carol", Uuid::new_v4(), "mojang")];

        let decision = decide(false, false, "offline", &new_id, &[], &holder, &cfg);
        assert_eq!(decision, Decision::Reject(Reject::NameCollision));
    }

    #[test]
    fn name_collision_allowed_when_configured() {
        let mut cfg = config();
        cfg.allow_name_collision = true;
        let new_id = offline_uuid("carol");
        let holder = [record("carol", Uuid::new_v4(), "mojang")];

        let decision = decide(false, false, "offline", &new_id, &[], &holder, &cfg);
        assert_eq!(
            decision,
            Decision::Limbo {
                need_registration: true
            }
        );
    }

    #[test]
    fn fallback_may_not_register() {
        let cfg = config();
        let id = Uuid::new_v4();

        let decision = decide(false, true, "", &id, &[], &[], &cfg);
        assert_eq!(decision, Decision::Reject(Reject::RegistrationClosed));
    }

    #[test]
    fn fallback_password_logs_in_against_offline_record() {
        let cfg = config();
        let id = Uuid::new_v4();
        let records = [record("dave", id, "offline")];

        let decision = decide(false, true, "", &id, &records, &records, &cfg);
        assert_eq!(
            decision,
            Decision::Limbo {
                need_registration: false
            }
        );
    }

    #[test]
    fn empty_source_counts_as_offline() {
        let cfg = config();
        let id = Uuid::new_v4();
        let records = [record("dave", id, "")];

        let decision = decide(false, true, "", &id, &records, &records, &cfg);
        assert_eq!(
            decision,
            Decision::Limbo {
                need_registration: false
            }
        );
    }

    #[test]
    fn reject_messages_name_the_denial() {
        assert!(Reject::NameCollision.message().contains("Access Denied"));
        assert!(Reject::SourceMismatch.message().contains("Access Denied"));
        assert!(Reject::RegistrationClosed.message().contains("registration"));
    }
}
