//! Software crypto platform built on the RustCrypto block cipher crates.

use aes::{
    Aes128, Aes256,
    cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray},
};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use cmac::{Cmac, Mac};
use stse_proto::{Crc16, X25};

use crate::{
    AesKey, KeyType,
    error::CryptoError,
    platform::{AES_BLOCK_SIZE, CmacContext, CryptoPlatform},
};

/// Portable implementation of [`CryptoPlatform`].
///
/// Used by host builds and by the simulation harness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareCrypto;

/// CMAC state of [`SoftwareCrypto`].
#[derive(Clone)]
pub enum SoftwareCmac {
    /// AES-128 CMAC
    Aes128(Cmac<Aes128>),
    /// AES-256 CMAC
    Aes256(Cmac<Aes256>),
}

impl CmacContext for SoftwareCmac {
    fn append(&mut self, data: &[u8]) {
        match self {
            Self::Aes128(mac) => mac.update(data),
            Self::Aes256(mac) => mac.update(data),
        }
    }

    fn compute_finish(self, tag: &mut [u8]) -> Result<(), CryptoError> {
        if tag.len() > AES_BLOCK_SIZE {
            return Err(CryptoError::TagTooLong { len: tag.len() });
        }
        let full = match self {
            Self::Aes128(mac) => mac.finalize().into_bytes(),
            Self::Aes256(mac) => mac.finalize().into_bytes(),
        };
        tag.copy_from_slice(&full[..tag.len()]);
        Ok(())
    }

    fn verify_finish(self, tag: &[u8]) -> bool {
        match self {
            Self::Aes128(mac) => mac.verify_truncated_left(tag).is_ok(),
            Self::Aes256(mac) => mac.verify_truncated_left(tag).is_ok(),
        }
    }
}

fn check_blocks(data: &[u8]) -> Result<(), CryptoError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidDataLength { len: data.len() });
    }
    Ok(())
}

fn key_error(key: &AesKey) -> CryptoError {
    CryptoError::InvalidKeyLength { len: key.as_bytes().len() }
}

impl Crc16 for SoftwareCrypto {
    fn crc16_calculate(&self, data: &[u8]) -> u16 {
        X25.crc16_calculate(data)
    }

    fn crc16_accumulate(&self, crc: u16, data: &[u8]) -> u16 {
        X25.crc16_accumulate(crc, data)
    }
}

impl CryptoPlatform for SoftwareCrypto {
    type Cmac = SoftwareCmac;

    fn aes_ecb_encrypt(
        &self,
        key: &AesKey,
        block: &mut [u8; AES_BLOCK_SIZE],
    ) -> Result<(), CryptoError> {
        let block = GenericArray::from_mut_slice(block);
        match key.key_type() {
            KeyType::Aes128 => {
                Aes128::new_from_slice(key.as_bytes()).map_err(|_| key_error(key))?.encrypt_block(block);
            },
            KeyType::Aes256 => {
                Aes256::new_from_slice(key.as_bytes()).map_err(|_| key_error(key))?.encrypt_block(block);
            },
        }
        Ok(())
    }

    fn aes_cbc_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8; AES_BLOCK_SIZE],
        data: &mut [u8],
    ) -> Result<(), CryptoError> {
        check_blocks(data)?;
        let len = data.len();
        let result = match key.key_type() {
            KeyType::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(key.as_bytes(), iv)
                .map_err(|_| key_error(key))?
                .encrypt_padded_mut::<NoPadding>(data, len)
                .map(|_| ()),
            KeyType::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(key.as_bytes(), iv)
                .map_err(|_| key_error(key))?
                .encrypt_padded_mut::<NoPadding>(data, len)
                .map(|_| ()),
        };
        result.map_err(|_| CryptoError::InvalidDataLength { len })
    }

    fn aes_cbc_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8; AES_BLOCK_SIZE],
        data: &mut [u8],
    ) -> Result<(), CryptoError> {
        check_blocks(data)?;
        let len = data.len();
        let result = match key.key_type() {
            KeyType::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(key.as_bytes(), iv)
                .map_err(|_| key_error(key))?
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            KeyType::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(key.as_bytes(), iv)
                .map_err(|_| key_error(key))?
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
        };
        result.map_err(|_| CryptoError::InvalidDataLength { len })
    }

    fn aes_cmac_init(&self, key: &AesKey) -> Result<Self::Cmac, CryptoError> {
        Ok(match key.key_type() {
            KeyType::Aes128 => SoftwareCmac::Aes128(
                <Cmac<Aes128> as KeyInit>::new_from_slice(key.as_bytes())
                    .map_err(|_| key_error(key))?,
            ),
            KeyType::Aes256 => SoftwareCmac::Aes256(
                <Cmac<Aes256> as KeyInit>::new_from_slice(key.as_bytes())
                    .map_err(|_| key_error(key))?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIPS-197 / SP 800-38A / RFC 4493 key
    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const BLOCK: &str = "6bc1bee22e409f96e93d7e117393172a";

    fn key() -> AesKey {
        AesKey::from_slice(&hex::decode(KEY).unwrap()).unwrap()
    }

    fn block() -> [u8; 16] {
        hex::decode(BLOCK).unwrap().try_into().unwrap()
    }

    #[test]
    fn ecb_known_answer() {
        let mut data = block();
        SoftwareCrypto.aes_ecb_encrypt(&key(), &mut data).unwrap();
        assert_eq!(hex::encode(data), "3ad77bb40d7a3660a89ecaf32466ef97");
    }

    #[test]
    fn cbc_known_answer_and_round_trip() {
        let iv: [u8; 16] = core::array::from_fn(|i| i as u8);
        let mut data = block();

        SoftwareCrypto.aes_cbc_encrypt(&key(), &iv, &mut data).unwrap();
        assert_eq!(hex::encode(data), "7649abac8119b246cee98e9b12e9197d");

        SoftwareCrypto.aes_cbc_decrypt(&key(), &iv, &mut data).unwrap();
        assert_eq!(data, block());
    }

    #[test]
    fn cbc_rejects_partial_blocks() {
        let mut data = [0u8; 15];
        assert_eq!(
            SoftwareCrypto.aes_cbc_encrypt(&key(), &[0u8; 16], &mut data),
            Err(CryptoError::InvalidDataLength { len: 15 })
        );
    }

    #[test]
    fn cmac_known_answers() {
        let mut tag = [0u8; 16];
        SoftwareCrypto.aes_cmac_init(&key()).unwrap().compute_finish(&mut tag).unwrap();
        assert_eq!(hex::encode(tag), "bb1d6929e95937287fa37d129b756746");

        let mut mac = SoftwareCrypto.aes_cmac_init(&key()).unwrap();
        mac.append(&block());
        mac.compute_finish(&mut tag).unwrap();
        assert_eq!(hex::encode(tag), "070a16b46b4d4144f79bdd9dd04a287c");
    }

    #[test]
    fn cmac_is_independent_of_append_split() {
        let message = [0x5Au8; 40];

        let mut whole = SoftwareCrypto.aes_cmac_init(&key()).unwrap();
        whole.append(&message);
        let mut expected = [0u8; 4];
        whole.compute_finish(&mut expected).unwrap();

        let mut split = SoftwareCrypto.aes_cmac_init(&key()).unwrap();
        for chunk in message.chunks(16) {
            split.append(chunk);
        }
        assert!(split.verify_finish(&expected));
    }

    #[test]
    fn cmac_verify_rejects_wrong_tag() {
        let mut mac = SoftwareCrypto.aes_cmac_init(&key()).unwrap();
        mac.append(b"payload");
        assert!(!mac.verify_finish(&[0u8; 4]));
    }

    #[test]
    fn aes256_cmac_round_trip() {
        let key = AesKey::aes256([0x11; 32]);
        let mut tag = [0u8; 4];

        let mut mac = SoftwareCrypto.aes_cmac_init(&key).unwrap();
        mac.append(b"abc");
        mac.compute_finish(&mut tag).unwrap();

        let mut check = SoftwareCrypto.aes_cmac_init(&key).unwrap();
        check.append(b"abc");
        assert!(check.verify_finish(&tag));
    }

    proptest::proptest! {
        #[test]
        fn prop_cbc_round_trip(
            blocks in 0usize..8,
            fill in proptest::prelude::any::<u8>(),
            iv in proptest::prelude::any::<[u8; 16]>(),
        ) {
            let plain: Vec<u8> = (0..blocks * AES_BLOCK_SIZE).map(|i| fill.wrapping_add(i as u8)).collect();
            let mut data = plain.clone();

            SoftwareCrypto.aes_cbc_encrypt(&key(), &iv, &mut data).unwrap();
            SoftwareCrypto.aes_cbc_decrypt(&key(), &iv, &mut data).unwrap();

            proptest::prop_assert_eq!(data, plain);
        }
    }
}
