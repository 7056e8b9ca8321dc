//! Core type definitions and protocol constants for the chat wire format.

/// AES-256 key length in bytes. Both the pre-shared key and the session key
/// must be exactly this long.
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes, prepended to every ciphertext.
pub const IV_LEN: usize = 16;

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// Raw AES-256 key material.
pub type KeyBytes = [u8; KEY_LEN];

/// Addresses that never appear in the displayed online list.
pub const LOOPBACK_ADDRS: &[&str] = &["127.0.0.1", "::1"];

/// Message id prefixes, one per content class.
pub mod id_prefix {
    /// Prefix for text message ids.
    pub const TEXT: &str = "msg_";
    /// Prefix for image message ids.
    pub const IMAGE: &str = "img_";
}

/// Returns `true` if `ip` is a loopback address that the presence view hides.
///
/// # Examples
///
/// ```
/// assert!(chat_common::types::is_loopback("::1"));
/// assert!(!chat_common::types::is_loopback("203.0.113.9"));
/// ```
#[must_use]
pub fn is_loopback(ip: &str) -> bool {
    LOOPBACK_ADDRS.contains(&ip)
}
