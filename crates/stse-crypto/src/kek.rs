//! Working key-encryption-key derivation for volatile KEK sessions.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{AesKey, KeyType};

/// Label used for working KEK derivation
const WORKING_KEK_LABEL: &[u8] = b"STSE working KEK";

/// Derive the working KEK number `counter` from the session base key.
///
/// Each working KEK wraps a bounded number of keys; the session advances
/// the counter to obtain the next one.
///
/// # Host-Side Placeholder
///
/// The device protocol does not define how working KEKs are derived. This
/// HKDF-SHA256 construction under the `"STSE working KEK"` label is a host
/// policy only: keys it produces are not known to any secure element, and
/// the scheme must be replaced by the device's own derivation before a
/// working KEK is used to wrap keys for a real device.
///
/// # Security
///
/// - Different counters produce unrelated keys
/// - Deterministic: same inputs always produce same output
pub fn derive_working_kek(base_key: &[u8], counter: u32, key_type: KeyType) -> AesKey {
    let hkdf = Hkdf::<Sha256>::new(None, base_key);

    // info = label || counter
    let mut info = Vec::with_capacity(WORKING_KEK_LABEL.len() + 4);
    info.extend_from_slice(WORKING_KEK_LABEL);
    info.extend_from_slice(&counter.to_be_bytes());

    let mut okm = [0u8; 32];
    let len = key_type.key_len();
    let Ok(()) = hkdf.expand(&info, &mut okm[..len]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let key = match key_type {
        KeyType::Aes128 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&okm[..16]);
            let key = AesKey::aes128(bytes);
            bytes.zeroize();
            key
        },
        KeyType::Aes256 => AesKey::aes256(okm),
    };
    okm.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = derive_working_kek(b"base key material", 3, KeyType::Aes128);
        let b = derive_working_kek(b"base key material", 3, KeyType::Aes128);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_counters_produce_different_keys() {
        let a = derive_working_kek(b"base key material", 0, KeyType::Aes256);
        let b = derive_working_kek(b"base key material", 1, KeyType::Aes256);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), 32);
    }

    #[test]
    fn aes128_derivation_yields_16_bytes() {
        let short = derive_working_kek(b"k", 9, KeyType::Aes128);
        assert_eq!(short.key_type(), KeyType::Aes128);
        assert_eq!(short.as_bytes().len(), 16);
    }
}
