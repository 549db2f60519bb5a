//! AES-256-GCM encryption of remote documents.

use crate::error::{SyncError, SyncResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Symmetric key derived from the user's passphrase.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncKey {
    bytes: [u8; KEY_SIZE],
}

impl SyncKey {
    /// Derives the key as SHA-256 of the passphrase bytes.
    ///
    /// Every device sharing a ledger must derive the same key, so there is
    /// no salt.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self { bytes }
    }
}

impl std::fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts remote documents.
///
/// The sealed format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher for the given key.
    #[must_use]
    pub fn new(key: &SyncKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));
        Self { cipher }
    }

    /// Creates a cipher directly from a passphrase.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(&SyncKey::from_passphrase(passphrase))
    }

    /// Encrypts `plaintext` with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SyncError::Codec("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypts data sealed by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DecryptionFailed`] when the input is too short or
    /// the tag does not verify (wrong key, corrupted data).
    pub fn decrypt(&self, sealed: &[u8]) -> SyncResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SyncError::DecryptionFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SyncError::DecryptionFailed)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt() {
        let cipher = Cipher::from_passphrase("correct horse");
        let sealed = cipher.encrypt(b"ledger bytes").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 12 + TAG_SIZE);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"ledger bytes");
    }

    #[test]
    fn nonces_differ() {
        let cipher = Cipher::from_passphrase("k");
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = Cipher::from_passphrase("one").encrypt(b"data").unwrap();
        assert!(matches!(
            Cipher::from_passphrase("two").decrypt(&sealed),
            Err(SyncError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_or_short_input_fails() {
        let cipher = Cipher::from_passphrase("k");
        let mut sealed = cipher.encrypt(b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(cipher.decrypt(&sealed), Err(SyncError::DecryptionFailed)));
        assert!(matches!(cipher.decrypt(&[0u8; 10]), Err(SyncError::DecryptionFailed)));
    }

    #[test]
    fn key_is_sha256_of_passphrase() {
        let a = SyncKey::from_passphrase("pass");
        let b = SyncKey::from_passphrase("pass");
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(
            a.bytes[..4],
            [0xd7, 0x4f, 0xf0, 0xee],
            "sha256(\"pass\") starts with d74ff0ee"
        );
        assert!(!format!("{a:?}").contains("d7"));
    }
}
