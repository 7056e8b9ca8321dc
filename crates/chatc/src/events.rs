use crate::session::ConnState;
use crate::store::Message;
use chat_common::AddressInfo;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Everything a front end needs to render the chat.
///
/// Serialized with an `event` tag for the local API `subscribe` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The connection state machine moved.
    StateChanged {
        /// New state.
        state: ConnState,
    },
    /// The session key is in place; actions are accepted.
    SessionReady,
    /// The session key envelope could not be unwrapped.
    KeyExchangeFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// A message became visible.
    MessageCreated {
        /// The new message.
        message: Message,
    },
    /// A message's content was replaced.
    MessageEdited {
        /// Message id.
        id: String,
        /// Replacement content.
        content: String,
    },
    /// A message was revoked.
    MessageRemoved {
        /// Message id.
        id: String,
    },
    /// The displayed online list changed.
    PresenceChanged {
        /// Visible peer addresses, in server order.
        peers: Vec<String>,
    },
    /// A transient notice for the user.
    SystemNotice {
        /// Notice text.
        content: String,
    },
    /// Our own address or its metadata changed.
    OwnAddress {
        /// Address details.
        info: AddressInfo,
    },
    /// The startup address lookup failed.
    AddressLookupFailed {
        /// Human-readable cause.
        reason: String,
    },
}

/// Fan-out for [`ChatEvent`]s plus the current [`ConnState`].
///
/// Owned by the session; readers hold receivers.
#[derive(Debug)]
pub struct EventBus {
    events: broadcast::Sender<ChatEvent>,
    state: watch::Sender<ConnState>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per lagging reader.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (state, _) = watch::channel(ConnState::Disconnected);
        Self { events, state }
    }

    /// Publishes an event. Dropped silently when nobody listens.
    pub fn publish(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            debug!("chat event dropped: no active subscribers");
        }
    }

    /// Records a state transition and announces it.
    pub fn set_state(&self, state: ConnState) {
        self.state.send_replace(state);
        self.publish(ChatEvent::StateChanged { state });
    }

    /// New receiver for future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// A sender handle, for components that hand out their own receivers.
    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<ChatEvent> {
        self.events.clone()
    }

    /// Receiver tracking the latest connection state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_state_updates_watch_and_publishes() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let state_rx = bus.watch_state();

        bus.set_state(ConnState::Connecting);

        assert_eq!(*state_rx.borrow(), ConnState::Connecting);
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::StateChanged {
                state: ConnState::Connecting
            }
        );
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(ChatEvent::SessionReady);
    }

    #[test]
    fn events_serialize_with_event_tag() {
        let json = serde_json::to_value(ChatEvent::MessageRemoved { id: "msg_1".into() }).unwrap();
        assert_eq!(json["event"], "message_removed");
        assert_eq!(json["id"], "msg_1");
    }
}
