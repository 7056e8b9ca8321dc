//! In-memory set of visible chat messages.
//!
//! Every mutation is keyed by message id and idempotent: creating a live id,
//! editing an absent id and removing an absent id all leave the store as it
//! was. There is no reconciliation with the server; whichever mutation for an
//! id is applied last wins.

use chat_common::ContentClass;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Sent from this client.
    Own,
    /// Received from the server.
    Remote,
}

/// A visible chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque, client-generated id.
    pub id: String,
    /// Display name of the author.
    pub author: String,
    /// Text, or Base64 image bytes.
    pub content: String,
    /// Text or image.
    pub class: ContentClass,
    /// `HH:MM:SS` display time.
    pub timestamp: String,
    /// Own or remote.
    pub origin: Origin,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    message: Message,
}

/// Messages indexed by id, remembering arrival order.
#[derive(Debug, Default)]
pub struct MessageStore {
    by_id: HashMap<String, Entry>,
    next_seq: u64,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `message` unless its id is already live.
    ///
    /// Returns `true` if the message was inserted.
    pub fn create(&mut self, message: Message) -> bool {
        if self.by_id.contains_key(&message.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_id.insert(message.id.clone(), Entry { seq, message });
        true
    }

    /// Replaces the content of `id`, keeping id, author and origin.
    ///
    /// Only a message of the given `class` is edited. Returns `true` if one
    /// was.
    pub fn apply_edit(&mut self, id: &str, class: ContentClass, content: &str) -> bool {
        match self.by_id.get_mut(id) {
            Some(entry) if entry.message.class == class => {
                entry.message.content = content.to_string();
                true
            }
            _ => false,
        }
    }

    /// Removes `id`, returning the message if it was present.
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        self.by_id.remove(id).map(|entry| entry.message)
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id).map(|entry| &entry.message)
    }

    /// Number of live messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All live messages in the order they were created.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        let mut entries: Vec<&Entry> = self.by_id.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.message.clone()).collect()
    }
}

/// Issues `msg_<millis>` / `img_<millis>` ids that never repeat within a
/// process, even when two are requested in the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last_ms: i64,
}

impl IdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id for a message of `class`.
    pub fn next_id(&mut self, class: ContentClass) -> String {
        let now = Utc::now().timestamp_millis();
        let ms = now.max(self.last_ms + 1);
        self.last_ms = ms;
        format!("{}{ms}", class.id_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            author: "198.51.100.7".to_string(),
            content: content.to_string(),
            class: ContentClass::Text,
            timestamp: "09:15:00".to_string(),
            origin: Origin::Remote,
        }
    }

    #[test]
    fn create_inserts_once_per_id() {
        let mut store = MessageStore::new();
        assert!(store.create(msg("msg_1", "first")));
        assert!(!store.create(msg("msg_1", "second")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("msg_1").unwrap().content, "first");
    }

    #[test]
    fn edit_replaces_content_only() {
        let mut store = MessageStore::new();
        let mut own = msg("msg_1", "draft");
        own.origin = Origin::Own;
        store.create(own);

        assert!(store.apply_edit("msg_1", ContentClass::Text, "final"));

        let m = store.get("msg_1").unwrap();
        assert_eq!(m.content, "final");
        assert_eq!(m.id, "msg_1");
        assert_eq!(m.origin, Origin::Own);
    }

    #[test]
    fn repeated_edit_is_idempotent() {
        let mut store = MessageStore::new();
        store.create(msg("msg_1", "a"));
        store.apply_edit("msg_1", ContentClass::Text, "b");
        store.apply_edit("msg_1", ContentClass::Text, "b");
        assert_eq!(store.get("msg_1").unwrap().content, "b");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn edit_of_absent_id_is_a_no_op() {
        let mut store = MessageStore::new();
        store.create(msg("msg_1", "a"));
        assert!(!store.apply_edit("msg_404", ContentClass::Text, "b"));
        assert_eq!(store.messages(), vec![msg("msg_1", "a")]);
    }

    #[test]
    fn edit_of_other_class_is_a_no_op() {
        let mut store = MessageStore::new();
        let mut image = msg("img_1", "iVBORw0KGgo=");
        image.class = ContentClass::Image;
        store.create(image);
        store.create(msg("msg_1", "a"));

        assert!(!store.apply_edit("img_1", ContentClass::Text, "plain text"));
        assert!(!store.apply_edit("msg_1", ContentClass::Image, "AAAA"));

        assert_eq!(store.get("img_1").unwrap().content, "iVBORw0KGgo=");
        assert_eq!(store.get("msg_1").unwrap().content, "a");
        assert!(store.apply_edit("img_1", ContentClass::Image, "AAAA"));
    }

    #[test]
    fn remove_of_absent_id_is_a_no_op() {
        let mut store = MessageStore::new();
        store.create(msg("msg_1", "a"));
        assert!(store.remove("msg_2").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_twice_equals_remove_once() {
        let mut store = MessageStore::new();
        store.create(msg("msg_1", "a"));
        store.create(msg("msg_2", "b"));
        assert!(store.remove("msg_1").is_some());
        assert!(store.remove("msg_1").is_none());
        assert_eq!(store.messages(), vec![msg("msg_2", "b")]);
    }

    #[test]
    fn messages_keep_creation_order() {
        let mut store = MessageStore::new();
        for id in ["msg_3", "msg_1", "msg_2"] {
            store.create(msg(id, id));
        }
        let ids: Vec<String> = store.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["msg_3", "msg_1", "msg_2"]);
    }

    #[test]
    fn revoked_id_can_be_created_again() {
        let mut store = MessageStore::new();
        store.create(msg("msg_1", "a"));
        store.remove("msg_1");
        assert!(store.create(msg("msg_1", "b")));
        assert_eq!(store.get("msg_1").unwrap().content, "b");
    }

    #[test]
    fn ids_carry_class_prefix() {
        let mut ids = IdGenerator::new();
        assert!(ids.next_id(ContentClass::Text).starts_with("msg_"));
        assert!(ids.next_id(ContentClass::Image).starts_with("img_"));
    }

    #[test]
    fn ids_are_unique_within_a_burst() {
        let mut ids = IdGenerator::new();
        let issued: std::collections::HashSet<String> =
            (0..1000).map(|_| ids.next_id(ContentClass::Text)).collect();
        assert_eq!(issued.len(), 1000);
    }
}
