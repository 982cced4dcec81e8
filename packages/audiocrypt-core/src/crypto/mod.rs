//! Symmetric AEAD encryption (§4.2).
//!
//! Reference design: AES-256-GCM with a fresh 96-bit random IV per
//! invocation. Keys are accepted as a sealed [`SessionKey`] sum type rather
//! than an `any`-typed value, per the source-pattern remapping in §9.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::{CoreError, CoreResult};

/// IV length required by AES-256-GCM, in bytes.
pub const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A session symmetric key, sealed against the algorithms the core actually
/// supports. Replaces the source's `any`-typed session key (§9): accepted
/// either as a platform key handle, raw bytes (padded/truncated to 32),
/// or an ASCII string.
#[derive(Clone)]
pub enum SessionKey {
    /// Exactly 32 raw bytes, already suitable as an AES-256 key.
    RawBytes([u8; KEY_LEN]),
    /// Raw bytes of arbitrary length, padded with zeros or truncated to 32.
    DerivedFromBytes(Vec<u8>),
    /// An ASCII string, encoded to bytes then padded/truncated to 32.
    DerivedFromAscii(String),
    /// Opaque platform key handle (e.g. a hardware keystore alias). No host
    /// in this crate resolves key handles to bytes locally, so this variant
    /// exists for API completeness and fails at encrypt/decrypt time.
    KeyHandle(String),
}

impl SessionKey {
    /// Builds a key from the 32-byte shared secret produced by ECDH.
    #[must_use]
    pub fn from_shared_secret(bytes: [u8; KEY_LEN]) -> Self {
        Self::RawBytes(bytes)
    }

    /// Builds a key from raw bytes of arbitrary length, padding with zeros
    /// or truncating to the 32 bytes AES-256 needs.
    #[must_use]
    pub fn from_raw_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::DerivedFromBytes(bytes.into())
    }

    /// Returns the 32-byte AES-256 key material, padding/truncating
    /// variable-length input as needed.
    fn to_key_bytes(&self) -> CoreResult<[u8; KEY_LEN]> {
        match self {
            Self::RawBytes(bytes) => Ok(*bytes),
            Self::DerivedFromBytes(bytes) => Ok(pad_or_truncate(bytes)),
            Self::DerivedFromAscii(s) => Ok(pad_or_truncate(s.as_bytes())),
            Self::KeyHandle(handle) => Err(CoreError::precondition(format!(
                "key handle '{handle}' requires a platform keystore, which this host does not provide"
            ))),
        }
    }
}

fn pad_or_truncate(bytes: &[u8]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    let n = bytes.len().min(KEY_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Metadata accompanying an encrypted payload.
#[derive(Debug, Clone)]
pub struct EncryptMetadata {
    pub iv: Vec<u8>,
}

/// Output of [`CryptoProcessor::encrypt`].
pub struct Encrypted {
    pub encrypted: Vec<u8>,
    pub metadata: EncryptMetadata,
}

/// Contract for symmetric AEAD encryption (§4.2).
pub trait CryptoProcessor: Send + Sync {
    /// Encrypts `data` under `key`, generating a fresh random IV.
    fn encrypt(&self, data: &[u8], key: &SessionKey) -> CoreResult<Encrypted>;

    /// Decrypts `encrypted` under `key` using the IV in `metadata`.
    ///
    /// Returns [`crate::error::ErrorKind::Integrity`] if the AEAD tag does
    /// not verify, and [`crate::error::ErrorKind::Malformed`] if the IV is
    /// missing or the wrong length.
    fn decrypt(&self, encrypted: &[u8], key: &SessionKey, metadata: &EncryptMetadata) -> CoreResult<Vec<u8>>;
}

/// AES-256-GCM implementation of [`CryptoProcessor`].
#[derive(Default)]
pub struct AesGcmProcessor;

impl CryptoProcessor for AesGcmProcessor {
    fn encrypt(&self, data: &[u8], key: &SessionKey) -> CoreResult<Encrypted> {
        let key_bytes = key.to_key_bytes()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let encrypted = cipher
            .encrypt(nonce, data)
            .map_err(|e| CoreError::integrity(format!("encryption failed: {e}")))?;

        Ok(Encrypted {
            encrypted,
            metadata: EncryptMetadata { iv: iv.to_vec() },
        })
    }

    fn decrypt(
        &self,
        encrypted: &[u8],
        key: &SessionKey,
        metadata: &EncryptMetadata,
    ) -> CoreResult<Vec<u8>> {
        if metadata.iv.len() != IV_LEN {
            return Err(CoreError::malformed(format!(
                "expected {IV_LEN}-byte IV, got {}",
                metadata.iv.len()
            )));
        }

        let key_bytes = key.to_key_bytes()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Nonce::from_slice(&metadata.iv);

        cipher
            .decrypt(nonce, encrypted)
            .map_err(|_| CoreError::integrity("AEAD authentication tag mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_bytes() {
        let processor = AesGcmProcessor;
        let key = SessionKey::from_shared_secret([7u8; KEY_LEN]);
        let data = b"some slice payload bytes";

        let encrypted = processor.encrypt(data, &key).unwrap();
        let decrypted = processor
            .decrypt(&encrypted.encrypted, &key, &encrypted.metadata)
            .unwrap();

        assert_eq!(decrypted, data);
    }

    #[test]
    fn two_encryptions_use_different_ivs() {
        let processor = AesGcmProcessor;
        let key = SessionKey::from_shared_secret([1u8; KEY_LEN]);
        let data = b"payload";

        let a = processor.encrypt(data, &key).unwrap();
        let b = processor.encrypt(data, &key).unwrap();

        assert_ne!(a.metadata.iv, b.metadata.iv);
        assert_ne!(a.encrypted, b.encrypted);
    }

    #[test]
    fn tampered_ciphertext_fails_integrity() {
        let processor = AesGcmProcessor;
        let key = SessionKey::from_shared_secret([3u8; KEY_LEN]);
        let mut encrypted = processor.encrypt(b"hello world", &key).unwrap();
        encrypted.encrypted[0] ^= 0xFF;

        let err = processor
            .decrypt(&encrypted.encrypted, &key, &encrypted.metadata)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }

    #[test]
    fn missing_iv_is_malformed() {
        let processor = AesGcmProcessor;
        let key = SessionKey::from_shared_secret([3u8; KEY_LEN]);
        let err = processor
            .decrypt(b"anything", &key, &EncryptMetadata { iv: vec![] })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Malformed);
    }

    #[test]
    fn ascii_key_is_padded_to_32_bytes() {
        let key = SessionKey::DerivedFromAscii("short".to_string());
        assert_eq!(key.to_key_bytes().unwrap().len(), KEY_LEN);
    }

    #[test]
    fn ascii_key_is_truncated_if_too_long() {
        let key = SessionKey::DerivedFromAscii("x".repeat(64));
        assert_eq!(key.to_key_bytes().unwrap().len(), KEY_LEN);
    }

    #[test]
    fn raw_bytes_key_is_padded_if_short() {
        let key = SessionKey::from_raw_bytes(vec![1u8, 2, 3]);
        let bytes = key.to_key_bytes().unwrap();
        assert_eq!(bytes.len(), KEY_LEN);
        assert_eq!(&bytes[..3], &[1, 2, 3]);
        assert!(bytes[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn raw_bytes_key_is_truncated_if_too_long() {
        let key = SessionKey::from_raw_bytes(vec![9u8; 64]);
        let bytes = key.to_key_bytes().unwrap();
        assert_eq!(bytes.len(), KEY_LEN);
        assert!(bytes.iter().all(|&b| b == 9));
    }

    #[test]
    fn key_handle_cannot_be_resolved_locally() {
        let key = SessionKey::KeyHandle("keystore://alias-1".to_string());
        let err = key.to_key_bytes().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);
    }

    #[test]
    fn round_trip_preserves_bytes_with_raw_bytes_key() {
        let processor = AesGcmProcessor;
        let key = SessionKey::from_raw_bytes(vec![5u8; 20]);
        let data = b"another slice payload";

        let encrypted = processor.encrypt(data, &key).unwrap();
        let decrypted = processor
            .decrypt(&encrypted.encrypted, &key, &encrypted.metadata)
            .unwrap();

        assert_eq!(decrypted, data);
    }

    #[test]
    fn encrypt_with_key_handle_fails_precondition() {
        let processor = AesGcmProcessor;
        let key = SessionKey::KeyHandle("keystore://alias-1".to_string());
        let err = processor.encrypt(b"data", &key).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);
    }
}
