//! Symmetric envelope codec: AES-256-CBC with a random IV and PKCS7 padding.
//!
//! Wire form is `Base64(IV ‖ ciphertext)`. The mode carries no integrity tag,
//! so tampering is only caught when it breaks padding, UTF-8 or the JSON that
//! the caller parses afterwards.

use crate::types::{KeyBytes, BLOCK_LEN, IV_LEN, KEY_LEN};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors produced when a blob cannot be turned back into plaintext.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The blob is not valid Base64.
    #[error("invalid base64: {0}")]
    Base64(String),
    /// The decoded bytes are too short or not block aligned.
    #[error("malformed ciphertext: {len} bytes")]
    Malformed {
        /// Length of the decoded blob.
        len: usize,
    },
    /// Decryption produced invalid PKCS7 padding.
    #[error("bad padding")]
    Padding,
    /// The decrypted bytes are not UTF-8.
    #[error("plaintext is not valid utf-8")]
    Utf8,
}

/// Errors produced when building a key from external material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key material has the wrong length.
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    Length(usize),
    /// Key text is not valid Base64.
    #[error("key is not valid base64")]
    Base64,
}

/// A 256-bit AES key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey(KeyBytes);

impl SymmetricKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: KeyBytes) -> Self {
        Self(bytes)
    }

    /// Builds a key from a byte slice, which must be exactly [`KEY_LEN`] long.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Length`] for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: KeyBytes = bytes
            .try_into()
            .map_err(|_| KeyError::Length(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Decodes Base64 key text into a key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the text is not Base64 or the result is not
    /// [`KEY_LEN`] bytes.
    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let mut raw = BASE64.decode(text.trim()).map_err(|_| KeyError::Base64)?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    /// Generates a fresh random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the key encoded as Base64 text, the form the server wraps
    /// inside a `session_key` envelope.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &KeyBytes {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypts `plaintext` under `key` and returns `Base64(IV ‖ ciphertext)`.
///
/// A fresh IV is drawn for every call, so equal inputs never share output.
///
/// # Examples
///
/// ```
/// use chat_common::codec::{decode, encode, SymmetricKey};
///
/// let key = SymmetricKey::generate();
/// let blob = encode("hello", &key);
/// assert_eq!(decode(&blob, &key).unwrap(), "hello");
/// ```
#[must_use]
pub fn encode(plaintext: &str, key: &SymmetricKey) -> String {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut wire = Vec::with_capacity(IV_LEN + ciphertext.len());
    wire.extend_from_slice(&iv);
    wire.extend_from_slice(&ciphertext);
    BASE64.encode(wire)
}

/// Reverses [`encode`].
///
/// # Errors
///
/// Returns a [`CodecError`] describing the first check that failed. Never
/// panics on hostile input.
pub fn decode(blob: &str, key: &SymmetricKey) -> Result<String, CodecError> {
    let wire = BASE64
        .decode(blob.trim())
        .map_err(|e| CodecError::Base64(e.to_string()))?;

    if wire.len() < IV_LEN + BLOCK_LEN || (wire.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(CodecError::Malformed { len: wire.len() });
    }

    let (iv, ciphertext) = wire.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv
        .try_into()
        .map_err(|_| CodecError::Malformed { len: wire.len() })?;

    let plaintext = Aes256CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::Padding)?;

    String::from_utf8(plaintext).map_err(|_| CodecError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SymmetricKey {
        SymmetricKey::from_bytes([7u8; KEY_LEN])
    }

    #[test]
    fn round_trip_preserves_text() {
        let blob = encode("{\"type\":\"message\",\"content\":\"héllo\"}", &key());
        assert_eq!(
            decode(&blob, &key()).unwrap(),
            "{\"type\":\"message\",\"content\":\"héllo\"}"
        );
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let blob = encode("", &key());
        assert_eq!(decode(&blob, &key()).unwrap(), "");
    }

    #[test]
    fn same_plaintext_encodes_differently() {
        let a = encode("same", &key());
        let b = encode("same", &key());
        assert_ne!(a, b);
        assert_eq!(decode(&a, &key()).unwrap(), "same");
        assert_eq!(decode(&b, &key()).unwrap(), "same");
    }

    #[test]
    fn blob_layout_is_iv_plus_whole_blocks() {
        let blob = encode("exactly sixteen!", &key());
        let raw = BASE64.decode(blob).unwrap();
        // 16 bytes of plaintext pad to two blocks
        assert_eq!(raw.len(), IV_LEN + 2 * BLOCK_LEN);
    }

    #[test]
    fn wrong_key_does_not_return_plaintext() {
        let blob = encode("secret words", &key());
        let other = SymmetricKey::from_bytes([8u8; KEY_LEN]);
        assert_ne!(decode(&blob, &other).ok().as_deref(), Some("secret words"));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            decode("not base64 !!", &key()),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn short_blob_is_malformed() {
        let blob = BASE64.encode([0u8; 20]);
        assert_eq!(
            decode(&blob, &key()),
            Err(CodecError::Malformed { len: 20 })
        );
    }

    #[test]
    fn unaligned_blob_is_malformed() {
        let blob = BASE64.encode([0u8; IV_LEN + BLOCK_LEN + 3]);
        assert!(matches!(
            decode(&blob, &key()),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn flipped_byte_never_yields_original() {
        let original = "{\"type\":\"revoke\",\"id\":\"msg_1\"}";
        let raw = BASE64.decode(encode(original, &key())).unwrap();
        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let result = decode(&BASE64.encode(&tampered), &key());
            assert_ne!(result.ok().as_deref(), Some(original), "byte {i}");
        }
    }

    #[test]
    fn key_from_slice_checks_length() {
        assert_eq!(
            SymmetricKey::from_slice(&[0u8; 16]).unwrap_err(),
            KeyError::Length(16)
        );
        assert!(SymmetricKey::from_slice(&[0u8; KEY_LEN]).is_ok());
    }

    #[test]
    fn key_base64_round_trip() {
        let key = SymmetricKey::generate();
        let back = SymmetricKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn key_from_bad_base64_fails() {
        assert_eq!(
            SymmetricKey::from_base64("%%%").unwrap_err(),
            KeyError::Base64
        );
    }

    #[test]
    fn debug_does_not_print_key_bytes() {
        assert_eq!(format!("{:?}", key()), "SymmetricKey(..)");
    }
}
