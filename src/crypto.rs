//! Sealing of integration credential bundles with AES-256-GCM.
//!
//! A sealed bundle is laid out as `[version | nonce | ciphertext+tag]`. The
//! associated data binds the bundle to the integration row it belongs to, so a
//! ciphertext copied onto another integration fails to open.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::platforms::PlatformCredentials;

const ENVELOPE_V1: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid sealed payload format")]
    InvalidFormat,
    #[error("credential bundle could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 256-bit key wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Encrypts `plaintext` bound to `aad`.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut ciphertext = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    sealed.push(ENVELOPE_V1);
    sealed.extend_from_slice(&nonce);
    sealed.append(&mut ciphertext);
    Ok(sealed)
}

/// Decrypts a payload produced by [`encrypt_bytes`] with the same `aad`.
pub fn decrypt_bytes(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if !is_sealed_payload(sealed) {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&sealed[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let body = &sealed[VERSION_FIELD_LEN + NONCE_LEN..];

    key.cipher()
        .decrypt(nonce, Payload { msg: body, aad })
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

pub fn is_sealed_payload(payload: &[u8]) -> bool {
    payload.len() >= MIN_SEALED_LEN && payload[0] == ENVELOPE_V1
}

/// Serializes and seals a credential bundle.
pub fn seal_credentials(
    key: &CryptoKey,
    aad: &str,
    credentials: &PlatformCredentials,
) -> Result<Vec<u8>, CryptoError> {
    let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(credentials)?);
    encrypt_bytes(key, aad.as_bytes(), &plaintext)
}

/// Opens a sealed credential bundle.
pub fn open_credentials(
    key: &CryptoKey,
    aad: &str,
    sealed: &[u8],
) -> Result<PlatformCredentials, CryptoError> {
    let plaintext = zeroize::Zeroizing::new(decrypt_bytes(key, aad.as_bytes(), sealed)?);
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::NaverSearchAdCredentials;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    fn naver_credentials() -> PlatformCredentials {
        PlatformCredentials::NaverSearchad(NaverSearchAdCredentials {
            api_key: "api-key".to_string(),
            secret_key: "secret".to_string(),
            customer_id: "1234567".to_string(),
        })
    }

    #[test]
    fn credentials_open_with_matching_aad() {
        let key = test_key();
        let sealed = seal_credentials(&key, "client|meta_ads|integration", &naver_credentials())
            .expect("seal");

        assert!(is_sealed_payload(&sealed));
        let opened =
            open_credentials(&key, "client|meta_ads|integration", &sealed).expect("open");
        assert_eq!(opened, naver_credentials());
    }

    #[test]
    fn credentials_bound_to_other_row_fail_to_open() {
        let key = test_key();
        let sealed = seal_credentials(&key, "client-a|google_ads|one", &naver_credentials())
            .expect("seal");

        let result = open_credentials(&key, "client-b|google_ads|one", &sealed);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = test_key();
        let mut sealed = encrypt_bytes(&key, b"aad", b"payload").expect("encrypt");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &sealed).is_err());
    }

    #[test]
    fn nonces_differ_between_seals() {
        let key = test_key();
        let first = encrypt_bytes(&key, b"aad", b"payload").expect("encrypt");
        let second = encrypt_bytes(&key, b"aad", b"payload").expect("encrypt");

        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn unversioned_payload_is_rejected() {
        let key = test_key();
        let result = decrypt_bytes(&key, b"aad", b"{\"kind\":\"meta\"}");
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 32]).is_ok());
    }
}
