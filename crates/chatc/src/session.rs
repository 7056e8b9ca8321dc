//! Per-process session state owned by the connection task.
//!
//! [`SessionContext`] is the single owner of the connection state, the
//! session key, the message store and the presence view. Reactions to
//! inbound frames and user actions borrow it mutably one at a time, so none
//! of this state is shared or locked.

use crate::error::SendError;
use crate::events::{ChatEvent, EventBus};
use crate::key_exchange::{opening_envelopes, PreSharedKey};
use crate::presence::PresenceView;
use crate::router;
use crate::store::{IdGenerator, Message, MessageStore, Origin};
use chat_common::{AddressInfo, ContentClass, Envelope, EnvelopeError, SymmetricKey};
use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

/// Lifecycle of the chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    /// No channel and no attempt in progress.
    Disconnected,
    /// WebSocket handshake in progress.
    Connecting,
    /// Channel open, session key requested.
    AwaitingSessionKey,
    /// Session key installed; chat envelopes flow.
    Ready,
    /// Channel gone; waiting to reconnect.
    Closed,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingSessionKey => "awaiting_session_key",
            Self::Ready => "ready",
            Self::Closed => "closed",
        })
    }
}

/// Something the local user asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Post a new text or image message.
    Send {
        /// Text or image.
        class: ContentClass,
        /// Text, or Base64 image bytes.
        content: String,
    },
    /// Replace the content of an existing message.
    Edit {
        /// Text or image.
        class: ContentClass,
        /// Message id.
        id: String,
        /// Replacement content.
        content: String,
    },
    /// Withdraw a message.
    Revoke {
        /// Message id.
        id: String,
    },
}

/// A sealed envelope ready for the wire.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Encrypted text frame.
    pub frame: String,
    /// Id of the message the action refers to.
    pub id: String,
}

/// All mutable chat state for one client process.
#[derive(Debug)]
pub struct SessionContext {
    psk: PreSharedKey,
    state: ConnState,
    session_key: Option<SymmetricKey>,
    store: MessageStore,
    presence: PresenceView,
    ids: IdGenerator,
    own_label: String,
    events: EventBus,
}

impl SessionContext {
    /// Creates a disconnected session for the address `own`.
    ///
    /// `own_label` is the author name shown on messages sent from here.
    #[must_use]
    pub fn new(psk: PreSharedKey, own: AddressInfo, own_label: &str, events: EventBus) -> Self {
        let mut presence = PresenceView::new();
        presence.set_own(own);
        Self {
            psk,
            state: ConnState::Disconnected,
            session_key: None,
            store: MessageStore::new(),
            presence,
            ids: IdGenerator::new(),
            own_label: own_label.to_string(),
            events,
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnState {
        self.state
    }

    /// Visible messages.
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Online peers and own address.
    #[must_use]
    pub const fn presence(&self) -> &PresenceView {
        &self.presence
    }

    /// The event bus this session publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether a session key is installed.
    #[must_use]
    pub const fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// A connection attempt is starting.
    pub fn begin_connect(&mut self) {
        self.transition(ConnState::Connecting);
    }

    /// The channel opened. Returns the plaintext bootstrap frames to send,
    /// in order.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if a bootstrap envelope cannot be
    /// serialized.
    pub fn on_open(&mut self) -> Result<Vec<String>, EnvelopeError> {
        let ip = self.presence.own().map(|o| o.ip.clone()).unwrap_or_default();
        let frames = opening_envelopes(&ip)
            .iter()
            .map(Envelope::to_json)
            .collect::<Result<Vec<_>, _>>()?;
        self.transition(ConnState::AwaitingSessionKey);
        Ok(frames)
    }

    /// The channel is gone. Drops the session key.
    pub fn on_close(&mut self) {
        self.session_key = None;
        if self.state != ConnState::Closed {
            self.transition(ConnState::Closed);
        }
    }

    /// Feeds one inbound text frame through the router.
    pub fn handle_frame(&mut self, text: &str) {
        router::route_frame(self, text);
    }

    /// Seals a user action for sending and applies it to the local view.
    ///
    /// The store is mutated only after the envelope is sealed, so an action
    /// rejected here leaves no local trace. A later write failure does not
    /// undo the local change.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotReady`] unless the session is `Ready`,
    /// [`SendError::ClassMismatch`] when an edit targets a shown message of
    /// the other class, and [`SendError::Encode`] if the envelope cannot be
    /// serialized.
    pub fn submit(&mut self, action: UserAction) -> Result<Outbound, SendError> {
        let key = match (&self.session_key, self.state) {
            (Some(key), ConnState::Ready) => key,
            _ => return Err(SendError::NotReady(self.state)),
        };

        match action {
            UserAction::Send { class, content } => {
                let id = self.ids.next_id(class);
                let frame = Envelope::chat(class, id.clone(), content.clone()).seal(key)?;
                let message = Message {
                    id: id.clone(),
                    author: self.own_label.clone(),
                    content,
                    class,
                    timestamp: display_time(),
                    origin: Origin::Own,
                };
                if self.store.create(message.clone()) {
                    self.events.publish(ChatEvent::MessageCreated { message });
                }
                Ok(Outbound { frame, id })
            }
            UserAction::Edit { class, id, content } => {
                if self.store.get(&id).is_some_and(|m| m.class != class) {
                    return Err(SendError::ClassMismatch(id));
                }
                let frame = Envelope::edit(class, id.clone(), content.clone()).seal(key)?;
                if self.store.apply_edit(&id, class, &content) {
                    self.events.publish(ChatEvent::MessageEdited {
                        id: id.clone(),
                        content,
                    });
                } else {
                    debug!(%id, "editing a message that is not shown locally");
                }
                Ok(Outbound { frame, id })
            }
            UserAction::Revoke { id } => {
                let frame = Envelope::Revoke { id: id.clone() }.seal(key)?;
                if self.store.remove(&id).is_some() {
                    self.events
                        .publish(ChatEvent::MessageRemoved { id: id.clone() });
                }
                Ok(Outbound { frame, id })
            }
        }
    }

    pub(crate) fn install_session_key(&mut self, key: SymmetricKey) {
        self.session_key = Some(key);
        self.transition(ConnState::Ready);
        info!("session key established");
        self.events.publish(ChatEvent::SessionReady);
    }

    pub(crate) const fn psk(&self) -> &PreSharedKey {
        &self.psk
    }

    pub(crate) const fn session_key(&self) -> Option<&SymmetricKey> {
        self.session_key.as_ref()
    }

    pub(crate) fn store_mut(&mut self) -> &mut MessageStore {
        &mut self.store
    }

    pub(crate) fn presence_mut(&mut self) -> &mut PresenceView {
        &mut self.presence
    }

    fn transition(&mut self, next: ConnState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
        self.events.set_state(next);
    }
}

/// Local wall-clock time in the `HH:MM:SS` display form.
#[must_use]
pub fn display_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
