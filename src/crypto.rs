//! Small crypto helpers shared by the Pair-Setup handler: HKDF-SHA-512 key
//! derivation and the fixed nonces HAP uses for its ChaCha20-Poly1305
//! exchanges. Primitives themselves (SRP, AEAD, Ed25519) are not
//! reimplemented here — they come straight from `srp`, `chacha20_poly1305_aead`
//! and `rust-crypto`, matching the upstream `hap` crate.

use ring::hkdf;

/// An arbitrary, unknown-content, u8-length-prefixed payload.
///
/// Based off of what's in RustLS; carried over from the upstream
/// `hap` crate's `pair_setup.rs`, which uses the same adapter to bridge
/// `ring`'s `Okm` into a plain byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadU8(pub Vec<u8>);

impl PayloadU8 {
    pub fn new(bytes: Vec<u8>) -> PayloadU8 { PayloadU8(bytes) }
}

pub(crate) struct PayloadU8Len(pub(crate) usize);

impl hkdf::KeyType for PayloadU8Len {
    fn len(&self) -> usize { self.0 }
}

impl<'a> From<hkdf::Okm<'a, PayloadU8Len>> for PayloadU8 {
    fn from(okm: hkdf::Okm<PayloadU8Len>) -> Self {
        let mut r = vec![0u8; okm.len().0];
        okm.fill(&mut r[..]).expect("hkdf expand never fails for a fixed-width output");
        PayloadU8::new(r)
    }
}

/// HKDF-Expand-Extract over SHA-512, truncated to 32 bytes. Used for every
/// key/nonce-material derivation in Pair-Setup (`Pair-Setup-Encrypt-*`,
/// `Pair-Setup-Controller-Sign-*`, `Pair-Setup-Accessory-Sign-*`).
pub fn hkdf_sha512_32(shared_secret: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA512, salt);
    let PayloadU8(bytes) = salt
        .extract(shared_secret)
        .expand(&[info], PayloadU8Len(32))
        .expect("hkdf expand of 32 bytes is always within the SHA-512 output limit")
        .into();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}

/// Builds the fixed 12-byte nonce HAP uses for a given message tag, e.g.
/// `nonce(b"PS-Msg05")` -> `50 53 2d 4d 73 67 30 35 00 00 00 00`.
pub fn nonce(tag: &[u8; 8]) -> Vec<u8> {
    let mut n = tag.to_vec();
    n.extend_from_slice(&[0u8; 4]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_tag_then_four_zero_bytes() {
        let n = nonce(b"PS-Msg05");
        assert_eq!(n, vec![b'P', b'S', b'-', b'M', b's', b'g', b'0', b'5', 0, 0, 0, 0]);
    }

    #[test]
    fn hkdf_output_is_deterministic_and_32_bytes() {
        let a = hkdf_sha512_32(b"shared-secret", b"salt", b"info");
        let b = hkdf_sha512_32(b"shared-secret", b"salt", b"info");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
