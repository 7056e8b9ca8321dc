//! Session bootstrap: announce our address, request a session key and unwrap
//! it with the pre-shared secret.
//!
//! The two keys are encoded differently on the wire:
//! the pre-shared key is the raw UTF-8 bytes of a 32-character secret, while
//! the session key arrives as Base64 text that is itself encrypted.

use crate::error::KeyExchangeError;
use chat_common::codec;
use chat_common::types::KEY_LEN;
use chat_common::{Envelope, KeyError, SymmetricKey};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// The long-lived secret shared by every client and the server.
#[derive(Clone)]
pub struct PreSharedKey(SymmetricKey);

impl PreSharedKey {
    /// Builds the key from its textual secret.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Length`] unless the secret is exactly 32 bytes of
    /// UTF-8.
    pub fn new(secret: &str) -> Result<Self, KeyError> {
        SymmetricKey::from_slice(secret.as_bytes()).map(Self)
    }

    /// The AES key derived from the secret.
    #[must_use]
    pub const fn key(&self) -> &SymmetricKey {
        &self.0
    }
}

impl std::fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PreSharedKey(..)")
    }
}

/// A fresh random alphanumeric secret suitable for [`PreSharedKey::new`].
#[must_use]
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LEN)
        .map(char::from)
        .collect()
}

/// The plaintext envelopes sent as soon as the channel opens, in order.
#[must_use]
pub fn opening_envelopes(own_ip: &str) -> [Envelope; 2] {
    [
        Envelope::ClientIp {
            ip: own_ip.to_string(),
        },
        Envelope::RequestSessionKey,
    ]
}

/// Unwraps the `session_key` field of a bootstrap envelope.
///
/// # Errors
///
/// Returns [`KeyExchangeError::Decrypt`] if the blob does not decrypt under
/// the pre-shared key and [`KeyExchangeError::Key`] if the plaintext is not
/// Base64 for exactly 32 bytes.
pub fn accept_session_key(
    wrapped: &str,
    psk: &PreSharedKey,
) -> Result<SymmetricKey, KeyExchangeError> {
    let key_text = codec::decode(wrapped, psk.key())?;
    Ok(SymmetricKey::from_base64(key_text.trim())?)
}

/// Wraps `session_key` for delivery under `psk`, as the server does.
#[must_use]
pub fn wrap_session_key(session_key: &SymmetricKey, psk: &PreSharedKey) -> String {
    codec::encode(&session_key.to_base64(), psk.key())
}
