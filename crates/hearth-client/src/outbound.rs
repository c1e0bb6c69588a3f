//! Outbound message queue.
//!
//! Tracks every locally authored message from validation until the server
//! confirms or refuses it. Entries keep enqueue order; a reconnect flushes
//! them in that order under their original correlation tokens.

use std::{collections::VecDeque, fmt::Debug, ops::Sub, time::Duration};

use crate::{
    error::SendError,
    message::{CorrelationId, MessageBody},
};

/// Maximum message body size in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4096;

/// Time to wait for the server to confirm a transmitted message before
/// marking it failed.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Outbound queue configuration
#[derive(Debug, Clone, Copy)]
pub struct OutboundConfig {
    /// Maximum body size in bytes (after trimming)
    pub max_body_bytes: usize,
    /// Confirmation deadline for transmitted messages
    pub ack_timeout: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self { max_body_bytes: DEFAULT_MAX_BODY_BYTES, ack_timeout: DEFAULT_ACK_TIMEOUT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<I> {
    Queued,
    InFlight { since: I },
}

#[derive(Debug, Clone)]
struct Outgoing<I> {
    token: CorrelationId,
    body: MessageBody,
    slot: Slot<I>,
}

/// Ordered queue of unconfirmed outbound messages.
///
/// Generic over `I` (Instant type) so simulation can drive it with virtual
/// time.
#[derive(Debug, Clone)]
pub struct OutboundQueue<I> {
    config: OutboundConfig,
    entries: VecDeque<Outgoing<I>>,
    next_token: u64,
}

impl<I> OutboundQueue<I>
where
    I: Copy + Ord + Debug + Sub<Output = Duration>,
{
    /// Create an empty queue. Tokens are issued sequentially from `first_token`.
    ///
    /// Seed `first_token` randomly so tokens from separate sessions of the
    /// same user do not collide in the server's de-duplication.
    pub fn new(config: OutboundConfig, first_token: u64) -> Self {
        Self { config, entries: VecDeque::new(), next_token: first_token }
    }

    /// Queue configuration.
    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }

    /// Check a message body before queuing it.
    ///
    /// Returns the body with surrounding whitespace trimmed.
    pub fn validate(&self, text: &str) -> Result<MessageBody, SendError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SendError::Empty);
        }
        if trimmed.len() > self.config.max_body_bytes {
            return Err(SendError::TooLong { len: trimmed.len(), max: self.config.max_body_bytes });
        }
        Ok(MessageBody::Text(trimmed.to_string()))
    }

    /// Issue a fresh correlation token.
    pub fn issue_token(&mut self) -> CorrelationId {
        let token = CorrelationId(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        token
    }

    /// Append a message. A token already queued is moved to the back.
    pub fn enqueue(&mut self, token: CorrelationId, body: MessageBody) {
        self.remove(token);
        self.entries.push_back(Outgoing { token, body, slot: Slot::Queued });
    }

    /// Mark every queued message in flight and return them in enqueue order.
    pub fn take_ready(&mut self, now: I) -> Vec<(CorrelationId, MessageBody)> {
        self.entries
            .iter_mut()
            .filter(|e| e.slot == Slot::Queued)
            .map(|e| {
                e.slot = Slot::InFlight { since: now };
                (e.token, e.body.clone())
            })
            .collect()
    }

    /// The server confirmed a message. Returns `false` if it was not queued.
    pub fn on_confirmed(&mut self, token: CorrelationId) -> bool {
        self.remove(token)
    }

    /// The server refused a message. Returns `false` if it was not queued.
    pub fn on_rejected(&mut self, token: CorrelationId) -> bool {
        self.remove(token)
    }

    /// The link dropped. In-flight messages will be transmitted again.
    pub fn on_link_lost(&mut self) {
        for entry in &mut self.entries {
            entry.slot = Slot::Queued;
        }
    }

    /// Remove in-flight messages unconfirmed for longer than the ack timeout.
    ///
    /// Returns their tokens in enqueue order.
    pub fn expire(&mut self, now: I) -> Vec<CorrelationId> {
        let timeout = self.config.ack_timeout;
        let mut expired = Vec::new();
        self.entries.retain(|e| match e.slot {
            Slot::InFlight { since } if now - since >= timeout => {
                expired.push(e.token);
                false
            },
            _ => true,
        });
        expired
    }

    /// Drop a message. Returns `false` if it was not queued.
    pub fn remove(&mut self, token: CorrelationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.token != token);
        self.entries.len() != before
    }

    /// Whether a message is queued or in flight.
    pub fn contains(&self, token: CorrelationId) -> bool {
        self.entries.iter().any(|e| e.token == token)
    }

    /// Whether a message has been transmitted and awaits confirmation.
    pub fn is_in_flight(&self, token: CorrelationId) -> bool {
        self.entries.iter().any(|e| e.token == token && matches!(e.slot, Slot::InFlight { .. }))
    }

    /// Tokens in enqueue order.
    pub fn tokens(&self) -> Vec<CorrelationId> {
        self.entries.iter().map(|e| e.token).collect()
    }

    /// Number of unconfirmed messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing awaits confirmation.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;

    fn queue() -> OutboundQueue<Instant> {
        OutboundQueue::new(OutboundConfig::default(), 100)
    }

    fn text(s: &str) -> MessageBody {
        MessageBody::Text(s.into())
    }

    #[test]
    fn rejects_empty_and_oversized() {
        let q = queue();
        assert_eq!(q.validate("   \n\t"), Err(SendError::Empty));
        assert_eq!(
            q.validate(&"x".repeat(DEFAULT_MAX_BODY_BYTES + 1)),
            Err(SendError::TooLong { len: DEFAULT_MAX_BODY_BYTES + 1, max: DEFAULT_MAX_BODY_BYTES })
        );
        assert_eq!(q.validate("  hi  "), Ok(text("hi")));
    }

    #[test]
    fn flush_preserves_enqueue_order_and_sends_once() {
        let now = Instant::now();
        let mut q = queue();
        let a = q.issue_token();
        let b = q.issue_token();
        q.enqueue(a, text("A"));
        q.enqueue(b, text("B"));

        let sent: Vec<_> = q.take_ready(now).into_iter().map(|(t, _)| t).collect();
        assert_eq!(sent, vec![a, b]);
        assert!(q.take_ready(now).is_empty());
    }

    #[test]
    fn link_loss_requeues_in_flight() {
        let now = Instant::now();
        let mut q = queue();
        let a = q.issue_token();
        q.enqueue(a, text("A"));
        let _ = q.take_ready(now);
        assert!(q.is_in_flight(a));

        q.on_link_lost();
        assert!(!q.is_in_flight(a));
        assert_eq!(q.take_ready(now).len(), 1);
    }

    #[test]
    fn confirmation_and_rejection_remove() {
        let mut q = queue();
        let a = q.issue_token();
        let b = q.issue_token();
        q.enqueue(a, text("A"));
        q.enqueue(b, text("B"));

        assert!(q.on_confirmed(a));
        assert!(!q.on_confirmed(a));
        assert!(q.on_rejected(b));
        assert!(q.is_empty());
    }

    #[test]
    fn ack_timeout_expires_only_in_flight() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = q.issue_token();
        q.enqueue(a, text("A"));
        let _ = q.take_ready(t0);
        let b = q.issue_token();
        q.enqueue(b, text("B"));

        assert!(q.expire(t0 + Duration::from_secs(14)).is_empty());
        assert_eq!(q.expire(t0 + DEFAULT_ACK_TIMEOUT), vec![a]);
        assert_eq!(q.tokens(), vec![b]);
    }

    #[test]
    fn retry_moves_token_to_back() {
        let mut q = queue();
        let a = q.issue_token();
        let b = q.issue_token();
        q.enqueue(a, text("A"));
        q.enqueue(b, text("B"));
        q.enqueue(a, text("A"));
        assert_eq!(q.tokens(), vec![b, a]);
    }

    proptest! {
        #[test]
        fn tokens_are_unique(seed in any::<u64>(), count in 1usize..64) {
            let mut q = OutboundQueue::<Instant>::new(OutboundConfig::default(), seed);
            let mut tokens: Vec<_> = (0..count).map(|_| q.issue_token()).collect();
            tokens.sort();
            tokens.dedup();
            prop_assert_eq!(tokens.len(), count);
        }
    }
}
