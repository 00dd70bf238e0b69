//! The accessory's own long-term identity: the Ed25519 keypair and stable
//! pairing id it presents to controllers during M5/M6, plus the setup
//! code used to seed the SRP verifier in M1.
//!
//! Grounded on the upstream `hap` crate's `protocol::Device`, referenced
//! from `pair_setup.rs` as `Device::load_from(database)`.

use crypto::ed25519;
use failure::Fail;
use rand::{self, RngCore};

/// The accessory's long-term Ed25519 identity, stable across restarts as
/// long as the backend persists it.
#[derive(Clone)]
pub struct AccessoryIdentity {
    pub id: String,
    pub public_key: [u8; 32],
    pub private_key: [u8; 64],
}

impl AccessoryIdentity {
    /// Generates a fresh identity. Backends that want a stable identity
    /// across restarts call this once and persist the result; `MemoryBackend`
    /// calls it lazily on first use since it has nothing to persist to.
    pub fn generate() -> AccessoryIdentity {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let (private_key, public_key) = ed25519::keypair(&seed);

        AccessoryIdentity {
            id: ::uuid::Uuid::new_v4().to_string(),
            public_key,
            private_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        ed25519::signature(message, &self.private_key)
    }
}

/// The accessory's setup code (`XXX-XX-XXX`), validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCode(String);

impl SetupCode {
    pub fn parse(code: &str) -> Result<SetupCode, InvalidSetupCode> {
        let bytes = code.as_bytes();
        let shape_ok = bytes.len() == 10
            && bytes[3] == b'-'
            && bytes[6] == b'-'
            && bytes[0..3].iter().all(u8::is_ascii_digit)
            && bytes[4..6].iter().all(u8::is_ascii_digit)
            && bytes[7..10].iter().all(u8::is_ascii_digit);

        if shape_ok {
            Ok(SetupCode(code.to_owned()))
        } else {
            Err(InvalidSetupCode)
        }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

#[derive(Debug, Fail)]
#[fail(display = "setup code must match \\d{{3}}-\\d{{2}}-\\d{{3}}")]
pub struct InvalidSetupCode;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_setup_code() {
        assert!(SetupCode::parse("843-15-743").is_ok());
    }

    #[test]
    fn rejects_malformed_setup_code() {
        assert!(SetupCode::parse("843-157-43").is_err());
        assert!(SetupCode::parse("84X-15-743").is_err());
        assert!(SetupCode::parse("843-15-74").is_err());
    }

    #[test]
    fn generated_identity_signs_verifiably() {
        let identity = AccessoryIdentity::generate();
        let sig = identity.sign(b"hello");
        assert!(ed25519::verify(b"hello", &identity.public_key, &sig));
    }
}
