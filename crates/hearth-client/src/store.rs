//! Ordered, deduplicated message timeline for one room.
//!
//! Messages arrive from three directions: optimistic local inserts, live
//! server pushes, and history pages. The store reconciles all of them into a
//! single list.
//!
//! # Invariants
//!
//! - Entries are sorted by `(created_at, insertion sequence)`.
//! - No two entries share a server id.
//! - A local entry is replaced, never duplicated, once a confirmed message
//!   with its correlation token and sender arrives.
//! - Applying the same confirmed message twice is a no-op.

use crate::message::{ChatMessage, CorrelationId, DeliveryState, MessageId};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: ChatMessage,
}

impl Entry {
    fn key(&self) -> (u64, u64) {
        (self.message.created_at, self.seq)
    }
}

/// Ordered message list.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages in timeline order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|e| &e.message)
    }

    /// Snapshot of the timeline.
    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.iter().cloned().collect()
    }

    /// Look up a message by id.
    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.iter().find(|m| m.id == id)
    }

    /// Local (unconfirmed) message with this correlation token.
    pub fn local(&self, token: CorrelationId) -> Option<&ChatMessage> {
        self.get(MessageId::Local(token))
    }

    /// Smallest server id held. Cursor for loading older history.
    pub fn oldest_server_id(&self) -> Option<u64> {
        self.iter().filter_map(ChatMessage::server_id).min()
    }

    /// Largest server id held. Cursor for gap-fill after reconnect.
    pub fn newest_server_id(&self) -> Option<u64> {
        self.iter().filter_map(ChatMessage::server_id).max()
    }

    /// Insert a locally composed message ahead of confirmation.
    ///
    /// The message must carry a [`MessageId::Local`] id. Inserting the same
    /// token twice replaces the earlier copy.
    pub fn insert_optimistic(&mut self, message: ChatMessage) {
        debug_assert!(message.is_local(), "optimistic insert requires a local id");

        if let Some(pos) = self.position(message.id) {
            let seq = self.entries.remove(pos).seq;
            self.insert_entry(Entry { seq, message });
        } else {
            let seq = self.bump_seq();
            self.insert_entry(Entry { seq, message });
        }
    }

    /// Apply a confirmed message pushed by the server.
    ///
    /// Returns `true` if the timeline changed.
    pub fn append_live(&mut self, message: ChatMessage) -> bool {
        self.merge_confirmed(message)
    }

    /// Apply a page of older history, in any order and possibly overlapping
    /// what is already held.
    ///
    /// Returns the number of messages that were new to the store.
    pub fn prepend_history(&mut self, messages: impl IntoIterator<Item = ChatMessage>) -> usize {
        let before = self.entries.len();
        for message in messages {
            self.merge_confirmed(message);
        }
        self.entries.len().saturating_sub(before)
    }

    /// Mark a local message as failed. Returns `false` if no local message
    /// carries this token.
    pub fn mark_failed(&mut self, token: CorrelationId) -> bool {
        self.set_local_delivery(token, DeliveryState::Failed)
    }

    /// Mark a local message as pending again (retry). Returns `false` if no
    /// local message carries this token.
    pub fn mark_pending(&mut self, token: CorrelationId) -> bool {
        self.set_local_delivery(token, DeliveryState::Pending)
    }

    /// Record a delivery receipt. Returns `true` if the state advanced.
    pub fn mark_delivered(&mut self, server_id: u64) -> bool {
        let Some(pos) = self.position(MessageId::Server(server_id)) else {
            return false;
        };
        let message = &mut self.entries[pos].message;
        let advanced = message.delivery.advance(DeliveryState::Delivered);
        let changed = advanced != message.delivery;
        message.delivery = advanced;
        changed
    }

    /// Remove a local message (discard).
    pub fn remove_local(&mut self, token: CorrelationId) -> Option<ChatMessage> {
        let pos = self.position(MessageId::Local(token))?;
        Some(self.entries.remove(pos).message)
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn merge_confirmed(&mut self, mut message: ChatMessage) -> bool {
        let Some(server_id) = message.server_id() else {
            tracing::warn!(id = %message.id, "confirmed merge without server id ignored");
            return false;
        };

        let local = message.correlation.and_then(|token| {
            self.position(MessageId::Local(token))
                .filter(|&pos| self.entries[pos].message.sender_id == message.sender_id)
        });

        if let Some(pos) = self.position(MessageId::Server(server_id)) {
            // Already confirmed. A leftover local copy is a duplicate.
            if let Some(local_pos) = local {
                self.entries.remove(local_pos);
            }
            let pos = self.position(MessageId::Server(server_id)).unwrap_or(pos);
            let existing = &mut self.entries[pos].message;
            let advanced = existing.delivery.advance(message.delivery);
            let changed = advanced != existing.delivery || local.is_some();
            existing.delivery = advanced;
            return changed;
        }

        let seq = match local {
            Some(pos) => {
                let replaced = self.entries.remove(pos);
                message.delivery = replaced.message.delivery.advance(message.delivery);
                if message.avatar_color.is_none() {
                    message.avatar_color = replaced.message.avatar_color;
                }
                if message.sender_name.is_none() {
                    message.sender_name = replaced.message.sender_name;
                }
                replaced.seq
            },
            None => self.bump_seq(),
        };

        self.insert_entry(Entry { seq, message });
        true
    }

    fn set_local_delivery(&mut self, token: CorrelationId, state: DeliveryState) -> bool {
        match self.position(MessageId::Local(token)) {
            Some(pos) => {
                self.entries[pos].message.delivery = state;
                true
            },
            None => false,
        }
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.message.id == id)
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert_entry(&mut self, entry: Entry) {
        let key = entry.key();
        let pos = self.entries.partition_point(|e| e.key() <= key);
        self.entries.insert(pos, entry);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::MessageBody;

    fn confirmed(id: u64, at: u64) -> ChatMessage {
        ChatMessage {
            id: MessageId::Server(id),
            room_id: "room".into(),
            sender_id: "alice".into(),
            sender_name: Some("Alice".into()),
            avatar_color: None,
            body: MessageBody::Text(format!("m{id}")),
            created_at: at,
            delivery: DeliveryState::Sent,
            correlation: None,
        }
    }

    fn local(token: u64, at: u64, text: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::Local(CorrelationId(token)),
            room_id: "room".into(),
            sender_id: "me".into(),
            sender_name: Some("Me".into()),
            avatar_color: Some("#F29E4C".into()),
            body: MessageBody::Text(text.into()),
            created_at: at,
            delivery: DeliveryState::Pending,
            correlation: Some(CorrelationId(token)),
        }
    }

    fn ids(store: &MessageStore) -> Vec<MessageId> {
        store.iter().map(|m| m.id).collect()
    }

    #[test]
    fn confirmation_replaces_optimistic_entry() {
        let mut store = MessageStore::new();
        store.insert_optimistic(local(1, 1_000, "Hello"));

        let mut echo = confirmed(77, 1_050);
        echo.sender_id = "me".into();
        echo.body = MessageBody::Text("Hello".into());
        echo.correlation = Some(CorrelationId(1));
        assert!(store.append_live(echo));

        assert_eq!(store.len(), 1);
        let msg = store.iter().next().unwrap();
        assert_eq!(msg.id, MessageId::Server(77));
        assert_eq!(msg.delivery, DeliveryState::Sent);
        assert_eq!(msg.text(), Some("Hello"));
        assert_eq!(msg.created_at, 1_050);
        assert_eq!(msg.avatar_color.as_deref(), Some("#F29E4C"));
    }

    #[test]
    fn foreign_correlation_does_not_replace_local() {
        let mut store = MessageStore::new();
        store.insert_optimistic(local(1, 1_000, "mine"));

        let mut other = confirmed(5, 1_001);
        other.correlation = Some(CorrelationId(1));
        store.append_live(other);

        assert_eq!(store.len(), 2);
        assert!(store.local(CorrelationId(1)).is_some());
    }

    #[test]
    fn duplicate_server_ids_are_absorbed() {
        let mut store = MessageStore::new();
        assert!(store.append_live(confirmed(1, 10)));
        assert!(!store.append_live(confirmed(1, 10)));
        assert_eq!(store.prepend_history(vec![confirmed(1, 10), confirmed(0, 5)]), 1);
        assert_eq!(ids(&store), vec![MessageId::Server(0), MessageId::Server(1)]);
    }

    #[test]
    fn out_of_order_history_sorts_chronologically() {
        let mut store = MessageStore::new();
        store.append_live(confirmed(10, 100));
        store.prepend_history(vec![confirmed(3, 30), confirmed(1, 10), confirmed(2, 20)]);

        let times: Vec<u64> = store.iter().map(|m| m.created_at).collect();
        assert_eq!(times, vec![10, 20, 30, 100]);
        assert_eq!(store.oldest_server_id(), Some(1));
        assert_eq!(store.newest_server_id(), Some(10));
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let mut store = MessageStore::new();
        store.append_live(confirmed(2, 50));
        store.append_live(confirmed(1, 50));
        store.append_live(confirmed(3, 50));
        assert_eq!(
            ids(&store),
            vec![MessageId::Server(2), MessageId::Server(1), MessageId::Server(3)]
        );
    }

    #[test]
    fn delivery_only_moves_forward() {
        let mut store = MessageStore::new();
        store.append_live(confirmed(1, 10));
        assert!(store.mark_delivered(1));
        assert!(!store.mark_delivered(1));

        store.append_live(confirmed(1, 10));
        assert_eq!(store.get(MessageId::Server(1)).unwrap().delivery, DeliveryState::Delivered);
    }

    #[test]
    fn late_local_copy_is_dropped_when_server_id_known() {
        let mut store = MessageStore::new();
        let mut echo = confirmed(9, 10);
        echo.sender_id = "me".into();
        echo.correlation = Some(CorrelationId(4));
        store.append_live(echo.clone());

        store.insert_optimistic(local(4, 12, "dup"));
        assert!(store.append_live(echo));
        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().next().unwrap().id, MessageId::Server(9));
    }

    #[test]
    fn failed_then_pending_then_removed() {
        let mut store = MessageStore::new();
        store.insert_optimistic(local(1, 10, "x"));

        assert!(store.mark_failed(CorrelationId(1)));
        assert_eq!(store.local(CorrelationId(1)).unwrap().delivery, DeliveryState::Failed);
        assert!(store.mark_pending(CorrelationId(1)));
        assert!(store.remove_local(CorrelationId(1)).is_some());
        assert!(!store.mark_failed(CorrelationId(1)));
        assert!(store.is_empty());
    }
}
