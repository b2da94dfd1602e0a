use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthenticationError;
use crate::utils::Token;
use crate::{HANDSHAKE_SIZE, KEY_SIZE, NONCE_SIZE};

pub use aes_gcm::aead::Error as EncryptionError;

/// 256-bit AES key derived from the shared token.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derives the session key from a normalized token: SHA-256 over the raw token bytes.
///
/// Pure and deterministic; both peers run it independently and never send the token.
pub fn derive_key(token: &Token) -> DerivedKey {
    let mut hasher = Sha256::default();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&result);
    DerivedKey(key)
}

/// Encrypts `plaintext` under `key` with AES-256-GCM.
///
/// # Returns
/// `nonce (12 bytes) || ciphertext || tag (16 bytes)`. A fresh random nonce is drawn
/// from the OS RNG on every call, so equal plaintexts never produce equal blobs.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let sealed = cipher.encrypt(&nonce, plaintext)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Opens a blob produced by [`encrypt`].
///
/// Fails closed: a short blob, a wrong key or any flipped bit yields an
/// `AuthenticationError` and no plaintext at all.
pub fn decrypt(blob: &[u8], key: &DerivedKey) -> Result<Vec<u8>, AuthenticationError> {
    if blob.len() < NONCE_SIZE {
        return Err(AuthenticationError::BlobTooShort(blob.len()));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let (nonce, sealed) = blob.split_at(NONCE_SIZE);

    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| AuthenticationError::Decrypt)
}

/// Random bytes the server sends (encrypted) at the start of every session.
pub fn create_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; HANDSHAKE_SIZE];
    rand::rng().fill_bytes(&mut challenge);
    challenge
}

/// Generates a new token in the `xxxxxx.xxxxxxxxxxxxxxxx` form.
pub fn create_token() -> String {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);

    let digest = Sha256::digest(seed);
    seed.zeroize();

    format!("{}.{}", hex::encode(&digest[..3]), hex::encode(&digest[3..11]))
}
