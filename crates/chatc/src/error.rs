use crate::session::ConnState;
use chat_common::{CodecError, EnvelopeError, KeyError};
use thiserror::Error;

/// A user action that could not be turned into an outbound envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Actions are only accepted once the session key is established.
    #[error("not connected (session is {0})")]
    NotReady(ConnState),
    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    /// An edit named a message of the other content class.
    #[error("message {0} is not of the edited kind")]
    ClassMismatch(String),
    /// The channel failed while the envelope was being written. The local
    /// view may already show the action.
    #[error("connection lost while sending")]
    ConnectionLost,
}

impl From<EnvelopeError> for SendError {
    fn from(e: EnvelopeError) -> Self {
        Self::Encode(e.to_string())
    }
}

/// The session key envelope could not be unwrapped.
#[derive(Error, Debug)]
pub enum KeyExchangeError {
    /// The wrapped key did not decrypt under the pre-shared key.
    #[error("session key did not decrypt: {0}")]
    Decrypt(#[from] CodecError),
    /// The decrypted text is not a usable key.
    #[error("session key is invalid: {0}")]
    Key(#[from] KeyError),
}

/// Reasons a live channel ended. All of them lead to a delayed reconnect.
#[derive(Error, Debug)]
pub enum ConnError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// The server closed the channel.
    #[error("connection closed")]
    Closed,
    /// A bootstrap envelope could not be produced.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// The own-address lookup failed.
#[derive(Error, Debug)]
pub enum LookupError {
    /// HTTP request or body decoding failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered without a usable address.
    #[error("lookup returned an invalid address: {0:?}")]
    InvalidIp(String),
}
