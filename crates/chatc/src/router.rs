use crate::events::ChatEvent;
use crate::key_exchange::accept_session_key;
use crate::session::{display_time, ConnState, SessionContext};
use crate::store::{Message, Origin};
use chat_common::envelope::{ChatPayload, EditPayload};
use chat_common::{ContentClass, Envelope};
use tracing::{debug, warn};

const UNKNOWN_AUTHOR: &str = "unknown";

/// Routes one inbound text frame according to the session state.
///
/// Before the session key exists only plaintext `session_key` envelopes are
/// considered. Once ready, every frame is decrypted and dispatched. Frames
/// that fail either step are dropped.
pub fn route_frame(ctx: &mut SessionContext, text: &str) {
    match ctx.state() {
        ConnState::AwaitingSessionKey => bootstrap(ctx, text),
        ConnState::Ready => {
            let Some(key) = ctx.session_key() else {
                warn!("ready without a session key, dropping frame");
                return;
            };
            match Envelope::open(text, key) {
                Ok(envelope) => dispatch(ctx, envelope),
                Err(e) => warn!(error = %e, "dropping undecodable envelope"),
            }
        }
        state => debug!(%state, "frame outside an open session, ignored"),
    }
}

fn bootstrap(ctx: &mut SessionContext, text: &str) {
    let session_key = match Envelope::from_json(text) {
        Ok(Envelope::SessionKey { session_key }) => session_key,
        Ok(other) => {
            debug!(kind = other.kind(), "envelope before session key, dropped");
            return;
        }
        Err(e) => {
            debug!(error = %e, "non-bootstrap frame before session key, dropped");
            return;
        }
    };
    match accept_session_key(&session_key, ctx.psk()) {
        Ok(key) => ctx.install_session_key(key),
        Err(e) => {
            warn!(error = %e, "key exchange failed");
            ctx.events().publish(ChatEvent::KeyExchangeFailed {
                reason: e.to_string(),
            });
            ctx.events().publish(ChatEvent::SystemNotice {
                content: "Unable to establish a secure session".to_string(),
            });
        }
    }
}

fn dispatch(ctx: &mut SessionContext, envelope: Envelope) {
    match envelope {
        Envelope::Message(payload) => on_chat(ctx, ContentClass::Text, payload),
        Envelope::Image(payload) => on_chat(ctx, ContentClass::Image, payload),
        Envelope::Edit(payload) => on_edit(ctx, ContentClass::Text, payload),
        Envelope::EditImage(payload) => on_edit(ctx, ContentClass::Image, payload),
        Envelope::Revoke { id } => {
            if ctx.store_mut().remove(&id).is_some() {
                ctx.events().publish(ChatEvent::MessageRemoved { id });
            } else {
                debug!(%id, "revoke for unknown message ignored");
            }
        }
        Envelope::System { content, .. } => {
            ctx.events().publish(ChatEvent::SystemNotice { content });
        }
        Envelope::UpdateOnlineUsers { users } => {
            ctx.presence_mut().replace_snapshot(users);
            publish_presence(ctx);
        }
        Envelope::YourIp(info) => {
            ctx.presence_mut().set_own(info.clone());
            ctx.events().publish(ChatEvent::OwnAddress { info });
            publish_presence(ctx);
        }
        other @ (Envelope::ClientIp { .. }
        | Envelope::RequestSessionKey
        | Envelope::SessionKey { .. }
        | Envelope::Unknown) => {
            debug!(kind = other.kind(), "ignoring envelope");
        }
    }
}

fn on_chat(ctx: &mut SessionContext, class: ContentClass, payload: ChatPayload) {
    let message = Message {
        id: payload.id,
        author: payload
            .username
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        content: payload.content,
        class,
        timestamp: payload.timestamp.unwrap_or_else(display_time),
        origin: Origin::Remote,
    };
    if ctx.store_mut().create(message.clone()) {
        ctx.events().publish(ChatEvent::MessageCreated { message });
    } else {
        debug!(id = %message.id, "message already shown");
    }
}

fn on_edit(ctx: &mut SessionContext, class: ContentClass, payload: EditPayload) {
    if ctx
        .store_mut()
        .apply_edit(&payload.id, class, &payload.new_content)
    {
        ctx.events().publish(ChatEvent::MessageEdited {
            id: payload.id,
            content: payload.new_content,
        });
    } else {
        debug!(id = %payload.id, ?class, "edit for unknown message or other class ignored");
    }
}

fn publish_presence(ctx: &SessionContext) {
    let peers = ctx.presence().display_list();
    ctx.events().publish(ChatEvent::PresenceChanged { peers });
}
