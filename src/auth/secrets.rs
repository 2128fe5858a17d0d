//! Encrypted secret material.
//!
//! Payload layout: `MAGIC || nonce (24 bytes) || ciphertext`, sealed with
//! XChaCha20-Poly1305.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::StoreError;

const MAGIC: &[u8; 4] = b"KWS1";
const NONCE_LEN: usize = 24;
pub(crate) const KEY_LEN: usize = 32;

/// Derives a 32-byte key from caller-supplied key material.
pub(crate) fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

pub(crate) fn encrypt_bytes(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, StoreError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| StoreError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub(crate) fn decrypt_bytes(payload: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, StoreError> {
    if payload.len() < MAGIC.len() + NONCE_LEN || &payload[..MAGIC.len()] != MAGIC {
        return Err(StoreError::InvalidPayload);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_end = MAGIC.len() + NONCE_LEN;
    let nonce = XNonce::from_slice(&payload[MAGIC.len()..nonce_end]);

    cipher
        .decrypt(nonce, &payload[nonce_end..])
        .map_err(|_| StoreError::DecryptionFailed)
}

/// Client secret and signature key, sealed under a random per-config key.
pub(crate) struct Secrets {
    key: [u8; KEY_LEN],
    client_secret: Option<Vec<u8>>,
    signature_key: Option<Vec<u8>>,
}

impl Secrets {
    pub(crate) fn new() -> Self {
        let mut key = [0_u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            key,
            client_secret: None,
            signature_key: None,
        }
    }

    pub(crate) fn set_client_secret(&mut self, secret: &str) -> Result<(), StoreError> {
        self.client_secret = Some(encrypt_bytes(secret.as_bytes(), &self.key)?);
        Ok(())
    }

    pub(crate) fn set_signature_key(&mut self, secret: &str) -> Result<(), StoreError> {
        self.signature_key = Some(encrypt_bytes(secret.as_bytes(), &self.key)?);
        Ok(())
    }

    pub(crate) fn client_secret(&self) -> Result<Option<String>, StoreError> {
        self.client_secret.as_deref().map(|s| self.open(s)).transpose()
    }

    pub(crate) fn signature_key(&self) -> Result<Option<String>, StoreError> {
        self.signature_key.as_deref().map(|s| self.open(s)).transpose()
    }

    pub(crate) fn has_signature_key(&self) -> bool {
        self.signature_key.is_some()
    }

    fn open(&self, sealed: &[u8]) -> Result<String, StoreError> {
        let plain = decrypt_bytes(sealed, &self.key)?;
        String::from_utf8(plain).map_err(|_| StoreError::InvalidPayload)
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("client_secret", &self.client_secret.is_some())
            .field("signature_key", &self.signature_key.is_some())
            .finish_non_exhaustive()
    }
}
