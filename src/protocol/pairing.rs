//! A stored pairing: the long-term association between this accessory and
//! one controller, created at the end of a successful Pair-Setup exchange
//! (M5/M6). Grounded on the upstream `hap` crate's `protocol::Pairing`,
//! constructed in `pair_setup.rs`'s `handle_exchange` as
//! `Pairing::new(pairing_uuid, Permissions::Admin, pairing_ltpk)`.

/// Controller permission level. Pair-Setup (this crate's only pairing
/// path) always grants `Admin`; `User` exists for the Add-Pairing flow,
/// which is out of scope here but named so the type isn't a dead end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    User,
    Admin,
}

impl Permissions {
    pub fn is_admin(self) -> bool {
        self == Permissions::Admin
    }
}

/// One persisted pairing record: a controller's stable identifier and
/// long-term Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub pairing_id: String,
    pub permissions: Permissions,
    pub public_key: [u8; 32],
}

impl Pairing {
    pub fn new(pairing_id: String, permissions: Permissions, public_key: [u8; 32]) -> Pairing {
        Pairing { pairing_id, permissions, public_key }
    }
}
