//! Typed JSON envelopes exchanged over the chat channel.
//!
//! Every application payload is a JSON object whose `type` field selects the
//! variant. Bootstrap envelopes travel as plain JSON text; everything else is
//! sealed with [`crate::codec`] under the session key.

use crate::codec::{self, CodecError, SymmetricKey};
use crate::types::id_prefix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from turning wire text into an [`Envelope`] or back.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The blob could not be decrypted.
    #[error("decrypt failed: {0}")]
    Codec(#[from] CodecError),
    /// The plaintext is not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Text or image content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// Plain UTF-8 text.
    Text,
    /// Base64-encoded image bytes.
    Image,
}

impl ContentClass {
    /// Prefix used for message ids of this class.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Text => id_prefix::TEXT,
            Self::Image => id_prefix::IMAGE,
        }
    }
}

/// Body of a `message` or `image` envelope.
///
/// The server stamps `timestamp` and `username` on the copies it fans out;
/// outbound envelopes leave them empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Client-generated message id.
    pub id: String,
    /// Text, or Base64 image bytes.
    pub content: String,
    /// Server-side `HH:MM:SS` display time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Author label assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Body of an `edit` or `edit_image` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPayload {
    /// Id of the message being replaced.
    pub id: String,
    /// Replacement content.
    #[serde(rename = "newContent")]
    pub new_content: String,
}

/// One entry of a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Address reported for the connected peer.
    pub ip: String,
}

/// An address plus its geolocation metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Public address.
    pub ip: String,
    /// Country name.
    #[serde(default)]
    pub country: String,
    /// Region or province.
    #[serde(default)]
    pub region: String,
    /// City.
    #[serde(default)]
    pub city: String,
    /// District, often empty.
    #[serde(default)]
    pub district: String,
    /// Network operator.
    #[serde(default)]
    pub isp: String,
}

/// A single typed protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Client announces its public address (plaintext).
    ClientIp {
        /// The address.
        ip: String,
    },
    /// Client asks for a session key (plaintext).
    RequestSessionKey,
    /// Server delivers the session key sealed under the pre-shared key.
    SessionKey {
        /// Blob whose plaintext is the Base64 session key.
        session_key: String,
    },
    /// A text message.
    Message(ChatPayload),
    /// An image message.
    Image(ChatPayload),
    /// Replacement text for an existing message.
    Edit(EditPayload),
    /// Replacement image for an existing message.
    EditImage(EditPayload),
    /// Withdraw a message.
    Revoke {
        /// Id of the message to remove.
        id: String,
    },
    /// Server notice.
    System {
        /// Notice text.
        content: String,
        /// Server-side display time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Full replacement of the online peer list.
    UpdateOnlineUsers {
        /// Connected peers.
        users: Vec<PeerAddress>,
    },
    /// The server's view of our own address.
    YourIp(AddressInfo),
    /// Any `type` this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Builds a `message` or `image` envelope for sending.
    #[must_use]
    pub fn chat(class: ContentClass, id: String, content: String) -> Self {
        let payload = ChatPayload {
            id,
            content,
            timestamp: None,
            username: None,
        };
        match class {
            ContentClass::Text => Self::Message(payload),
            ContentClass::Image => Self::Image(payload),
        }
    }

    /// Builds an `edit` or `edit_image` envelope for sending.
    #[must_use]
    pub fn edit(class: ContentClass, id: String, new_content: String) -> Self {
        let payload = EditPayload { id, new_content };
        match class {
            ContentClass::Text => Self::Edit(payload),
            ContentClass::Image => Self::EditImage(payload),
        }
    }

    /// Wire name of this envelope's `type`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ClientIp { .. } => "client_ip",
            Self::RequestSessionKey => "request_session_key",
            Self::SessionKey { .. } => "session_key",
            Self::Message(_) => "message",
            Self::Image(_) => "image",
            Self::Edit(_) => "edit",
            Self::EditImage(_) => "edit_image",
            Self::Revoke { .. } => "revoke",
            Self::System { .. } => "system",
            Self::UpdateOnlineUsers { .. } => "update_online_users",
            Self::YourIp(_) => "your_ip",
            Self::Unknown => "unknown",
        }
    }

    /// Parses plaintext JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if the text is not a valid envelope.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes to plaintext JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes and encrypts under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if serialization fails.
    pub fn seal(&self, key: &SymmetricKey) -> Result<String, EnvelopeError> {
        Ok(codec::encode(&self.to_json()?, key))
    }

    /// Decrypts `blob` under `key` and parses the result.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Codec`] when decryption fails and
    /// [`EnvelopeError::Json`] when the plaintext is not an envelope.
    pub fn open(blob: &str, key: &SymmetricKey) -> Result<Self, EnvelopeError> {
        let plaintext = codec::decode(blob, key)?;
        Self::from_json(&plaintext)
    }
}
