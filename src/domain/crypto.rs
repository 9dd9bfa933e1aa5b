//! AES-128-ECB payload codec and the two vendor key derivations.
//!
//! Both derivations hash some input with MD5, render it as lower-case hex and use the ASCII bytes of
//! hex characters 8..24 as the key. The hex text is the key, not the decoded digest.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::Engine as _;
use thiserror::Error;

pub const BLOCK_SIZE: usize = 16;

pub type Key = [u8; 16];

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CryptoError {
    #[error("invalid base64 ciphertext: {0}")]
    Base64(String),

    #[error("ciphertext length {0} is not a positive multiple of 16")]
    BlockLength(usize),

    #[error("invalid padding length {pad} for {len} decrypted bytes")]
    Padding { pad: usize, len: usize },

    #[error("decrypted payload is not utf-8")]
    Utf8,

    #[error("map sub-key needs 16 bytes, got {0}")]
    ShortSubKey(usize),
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn key_from_hex_digest(digest_hex: &str) -> Key {
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest_hex.as_bytes()[8..24]);
    key
}

/// Symmetric key for request/response field encryption, derived from the tenant id.
pub fn derive_request_key(tenant_id: &str) -> Key {
    key_from_hex_digest(&md5_hex(tenant_id.as_bytes()))
}

/// Per-device key protecting downloaded map blobs.
pub fn derive_map_key(serial: &str, mac: &str, product_id: &str) -> Result<Key, CryptoError> {
    let sub_key_text = format!("{}{product_id}", mac.replace(':', "").to_lowercase());
    let sub_key_bytes = sub_key_text.as_bytes();
    if sub_key_bytes.len() < 16 {
        return Err(CryptoError::ShortSubKey(sub_key_bytes.len()));
    }
    let mut sub_key = [0u8; 16];
    sub_key.copy_from_slice(&sub_key_bytes[..16]);

    let seed = format!("{serial}+{product_id}+{serial}");
    let sealed = encrypt(&seed, &sub_key);
    Ok(key_from_hex_digest(&md5_hex(sealed.as_bytes())))
}

/// PKCS#7-style padding: always appends 1..=16 bytes, each equal to the pad length.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat_n(pad_len as u8, pad_len));
    out
}

/// Trims as many trailing bytes as the final byte says.
pub fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    let len = data.len();
    let pad = data.last().copied().unwrap_or(0) as usize;
    if pad == 0 || pad > len {
        return Err(CryptoError::Padding { pad, len });
    }
    data.truncate(len - pad);
    Ok(data)
}

pub fn encrypt_bytes(plaintext: &[u8], key: &Key) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = pad(plaintext);
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    buf
}

pub fn decrypt_bytes(ciphertext: &[u8], key: &Key) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::BlockLength(ciphertext.len()));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = ciphertext.to_vec();
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    unpad(buf)
}

pub fn encrypt(plaintext: &str, key: &Key) -> String {
    base64::engine::general_purpose::STANDARD.encode(encrypt_bytes(plaintext.as_bytes(), key))
}

pub fn decrypt(ciphertext_b64: &str, key: &Key) -> Result<String, CryptoError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|error| CryptoError::Base64(error.to_string()))?;
    let plain = decrypt_bytes(&raw, key)?;
    String::from_utf8(plain).map_err(|_| CryptoError::Utf8)
}
