//! Per-conversation message encryption.
//!
//! Message bodies travel as base64 ciphertext plus a hex-encoded IV
//! (XChaCha20-Poly1305, one fresh 24-byte nonce per message). The key is
//! resolved per conversation and never leaves the client.

use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

#[derive(Clone, PartialEq, Eq)]
pub struct MessageKey([u8; KEY_LEN]);

impl MessageKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes")))?;
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

// Key material must never reach logs.
impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid iv: {0}")]
    InvalidIv(String),
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

/// Wire form of an encrypted body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
}

pub fn seal(key: &MessageKey, plaintext: &str) -> Result<Sealed, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::Encrypt)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;
    Ok(Sealed {
        ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        iv: hex::encode(nonce),
    })
}

pub fn open(key: &MessageKey, ciphertext: &str, iv: &str) -> Result<String, CryptoError> {
    let nonce = hex::decode(iv).map_err(|e| CryptoError::InvalidIv(e.to_string()))?;
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidIv(format!(
            "expected {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext)
        .map_err(|e| CryptoError::InvalidCiphertext(e.to_string()))?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::Decrypt)?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}
