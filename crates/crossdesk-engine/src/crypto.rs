//! Token encryption at rest.
//!
//! AES-256-GCM with a key derived from the process-wide vault secret. Every
//! call draws a fresh random nonce, so equal plaintexts give different
//! ciphertexts. Stored form is base64 of `nonce || ciphertext`.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed (wrong key or corrupted data)")]
    Decryption,

    #[error("invalid encrypted data: {0}")]
    InvalidFormat(String),
}

/// Symmetric cipher for credential tokens and OAuth state.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Derives the key for `purpose` from `secret`.
    ///
    /// Different purposes give independent keys from one secret.
    pub fn derive(secret: &str, purpose: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"crossdesk.v1.");
        hasher.update(purpose.as_bytes());
        hasher.update([0u8]);
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// The cipher used for stored tokens.
    pub fn for_tokens(secret: &str) -> Self {
        Self::derive(secret, "tokens")
    }

    /// Encrypts raw bytes to `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::Encryption)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    /// Reverses [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CipherError::InvalidFormat(format!(
                "encrypted data too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decryption)
    }

    /// Encrypts a string to base64.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        Ok(BASE64.encode(self.seal(plaintext.as_bytes())?))
    }

    /// Decrypts a value produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let sealed = BASE64
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidFormat(format!("invalid base64: {}", e)))?;
        let plaintext = self.open(&sealed)?;
        String::from_utf8(plaintext)
            .map_err(|_| CipherError::InvalidFormat("decrypted data is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_including_empty_and_unicode() {
        let cipher = TokenCipher::for_tokens("vault-secret");
        for plaintext in [
            "",
            "ya29.a0AfH6SMB",
            "émoji 🔑 and 日本語",
            &"x".repeat(4096),
        ] {
            let encrypted = cipher.encrypt(plaintext).unwrap();
            assert_ne!(encrypted, plaintext);
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn same_plaintext_differs() {
        let cipher = TokenCipher::for_tokens("vault-secret");
        let a = cipher.encrypt("token").unwrap();
        let b = cipher.encrypt("token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = TokenCipher::for_tokens("one").encrypt("token").unwrap();
        let err = TokenCipher::for_tokens("two").decrypt(&encrypted).unwrap_err();
        assert!(matches!(err, CipherError::Decryption));
    }

    #[test]
    fn purposes_are_independent() {
        let sealed = TokenCipher::derive("same", "tokens").seal(b"data").unwrap();
        assert!(TokenCipher::derive("same", "state").open(&sealed).is_err());
    }

    #[test]
    fn malformed_input() {
        let cipher = TokenCipher::for_tokens("k");
        assert!(matches!(
            cipher.decrypt("not base64!!"),
            Err(CipherError::InvalidFormat(_))
        ));
        assert!(matches!(
            cipher.decrypt("AAAA"),
            Err(CipherError::InvalidFormat(_))
        ));
        let mut sealed = cipher.seal(b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(cipher.open(&sealed), Err(CipherError::Decryption)));
    }
}
