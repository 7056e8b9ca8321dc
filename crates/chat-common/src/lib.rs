//! Wire types and crypto shared across the chat protocol stack.
//!
//! This crate provides:
//! - AES-256-CBC envelope encryption ([`codec`])
//! - Typed JSON envelopes ([`envelope`])
//! - Protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod types;

pub use codec::{CodecError, KeyError, SymmetricKey};
pub use envelope::{AddressInfo, ContentClass, Envelope, EnvelopeError, PeerAddress};
