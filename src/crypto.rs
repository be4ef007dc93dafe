use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose};
use thiserror::Error;

/// AES-256 key length in bytes.
pub const MEDIA_KEY_LEN: usize = 32;
/// Length of the IV prefixed to the encrypted buffer; also the cipher block size.
pub const IV_LEN: usize = 16;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Internal decryption failure causes. These are logged for diagnostics but
/// the HTTP layer collapses all of them into one generic error code, so a
/// response never reveals which step rejected the input.
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("media key is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),
    #[error("media key must decode to {MEDIA_KEY_LEN} bytes, got {0}")]
    KeyLength(usize),
    #[error("encrypted payload is {0} bytes, shorter than the {IV_LEN}-byte IV")]
    TruncatedPayload(usize),
    #[error("failed to initialize cipher")]
    CipherInit,
    #[error("padding validation failed")]
    Padding,
}

/// A decoded 256-bit media key.
///
/// Construction through [`MediaKey::from_base64`] is the only place key
/// material is validated; everything downstream can rely on the length.
#[derive(Debug)]
pub struct MediaKey([u8; MEDIA_KEY_LEN]);

impl MediaKey {
    pub fn from_base64(encoded: &str) -> Result<Self, DecryptError> {
        let raw = general_purpose::STANDARD.decode(encoded)?;
        let len = raw.len();
        let key: [u8; MEDIA_KEY_LEN] =
            raw.try_into().map_err(|_| DecryptError::KeyLength(len))?;
        Ok(MediaKey(key))
    }
}

/// Decrypts an `IV || ciphertext` buffer with AES-256-CBC and strips the
/// PKCS#7 padding. Unpadding determines the true plaintext length and is the
/// only integrity check: a wrong key or tampered ciphertext surfaces as
/// [`DecryptError::Padding`].
pub fn decrypt(key: &MediaKey, encrypted: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if encrypted.len() < IV_LEN {
        return Err(DecryptError::TruncatedPayload(encrypted.len()));
    }
    let (iv, ciphertext) = encrypted.split_at(IV_LEN);

    let cipher =
        Aes256CbcDec::new_from_slices(&key.0, iv).map_err(|_| DecryptError::CipherInit)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| DecryptError::Padding)
}
