//! Note content encryption.
//!
//! Encrypted notes store `base64(nonce || ciphertext)` in the content
//! column. The key is process-wide and loaded once from configuration;
//! there is no key versioning, so changing it makes previously encrypted
//! content undecryptable.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_CONTENT_KEY, NONCE_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

pub fn derive_key_from_passphrase(passphrase: &[u8], context: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(passphrase);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Reversible transform applied to note content at the persistence
/// boundary when a note is flagged encrypted.
#[derive(Clone)]
pub struct ContentCipher {
    key: SymmetricKey,
}

impl ContentCipher {
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }

    /// Cipher keyed from a passphrase, for development setups without a
    /// configured hex key.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(derive_key_from_passphrase(
            passphrase.as_bytes(),
            KDF_CONTEXT_CONTENT_KEY,
        ))
    }

    pub fn encrypt_content(&self, plaintext: &str) -> Result<String, CryptoError> {
        let sealed = encrypt(&self.key, plaintext.as_bytes())?;
        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt_content(&self, stored: &str) -> Result<String, CryptoError> {
        let sealed = BASE64
            .decode(stored.trim())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let plaintext = decrypt(&self.key, &sealed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encode content for storage according to the note's flag.
    pub fn seal(&self, content: &str, is_encrypted: bool) -> Result<String, CryptoError> {
        if is_encrypted {
            self.encrypt_content(content)
        } else {
            Ok(content.to_string())
        }
    }

    /// Decode stored content according to the note's flag.
    pub fn open(&self, stored: &str, is_encrypted: bool) -> Result<String, CryptoError> {
        if is_encrypted {
            self.decrypt_content(stored)
        } else {
            Ok(stored.to_string())
        }
    }
}

impl std::fmt::Debug for ContentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCipher").finish_non_exhaustive()
    }
}
