//! mod_gearman encryption
//!
//! Payloads are base64 encoded AES-256 blocks in ECB mode, zero padded. The
//! key is the shared secret cut or NUL padded to 32 bytes. ECB is only kept
//! to stay compatible with mod_gearman.

use std::path::Path;

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::prelude::*;
use thiserror::Error;

/// Key length mod_gearman uses
pub const KEY_LENGTH: usize = 32;

const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("key must be {KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload length {0} is not a multiple of the block size")]
    BlockSize(usize),
}

/// Pick the inline secret, or else the trimmed content of the secret file.
///
/// Returns an empty string if neither is configured.
pub fn get_secret(secret: &str, secret_file: Option<&Path>) -> std::io::Result<String> {
    if !secret.is_empty() {
        return Ok(secret.to_string());
    }
    match secret_file {
        Some(path) => Ok(std::fs::read_to_string(path)?.trim().to_string()),
        None => Ok(String::new()),
    }
}

/// Pad the key with NUL bytes or cut it to `length`
pub fn shape_key(key: &str, length: usize) -> Vec<u8> {
    let mut bytes = key.as_bytes().to_vec();
    bytes.resize(length, 0);
    bytes
}

pub struct Decrypter {
    cipher: Aes256,
}

impl Decrypter {
    pub fn new(key: &[u8]) -> Result<Self, DecryptError> {
        let cipher =
            Aes256::new_from_slice(key).map_err(|_| DecryptError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build a decrypter from a configured secret, shaping it first
    pub fn from_secret(secret: &str) -> Result<Self, DecryptError> {
        Self::new(&shape_key(secret, KEY_LENGTH))
    }

    /// Decode and decrypt a payload, trailing padding is removed
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let mut data = BASE64_STANDARD.decode(payload.trim_ascii())?;
        if data.len() % BLOCK_SIZE != 0 {
            return Err(DecryptError::BlockSize(data.len()));
        }

        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));
        }

        let end = data
            .iter()
            .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        data.truncate(end);
        Ok(data)
    }

    /// Encrypt and encode a payload the way mod_gearman sends it
    pub fn encrypt(&self, plain: &[u8]) -> String {
        let mut data = plain.to_vec();
        let padded = data.len().div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE;
        data.resize(padded, 0);

        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(block));
        }
        BASE64_STANDARD.encode(data)
    }
}

impl std::fmt::Debug for Decrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Decrypter { .. }")
    }
}
