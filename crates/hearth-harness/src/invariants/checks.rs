//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::{HashMap, HashSet};

use hearth_client::DeliveryState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Timeline is sorted by `created_at`.
///
/// Ties keep insertion order, which the snapshot cannot see, so only the
/// timestamps are checked.
pub struct ChronologicalOrder;

impl Invariant for ChronologicalOrder {
    fn name(&self) -> &'static str {
        "chronological_order"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for window in client.messages.windows(2) {
                if window[1].created_at < window[0].created_at {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: {:?} at {} after {:?} at {}",
                            client.id,
                            window[1].text,
                            window[1].created_at,
                            window[0].text,
                            window[0].created_at
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// No two timeline entries share a server id.
pub struct UniqueServerIds;

impl Invariant for UniqueServerIds {
    fn name(&self) -> &'static str {
        "unique_server_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let mut seen = HashSet::new();
            for id in client.server_ids() {
                if !seen.insert(id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: server id {id} appears twice", client.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A confirmed message never sits next to its own optimistic copy, and
/// local entries have distinct correlation tokens.
pub struct NoDuplicateLocal;

impl Invariant for NoDuplicateLocal {
    fn name(&self) -> &'static str {
        "no_duplicate_local"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let confirmed: HashSet<_> = client
                .messages
                .iter()
                .filter(|m| m.server_id.is_some())
                .filter_map(|m| m.correlation.map(|c| (m.sender_id.as_str(), c)))
                .collect();

            let mut local = HashSet::new();
            for message in client.messages.iter().filter(|m| m.server_id.is_none()) {
                let Some(token) = message.correlation else {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: local entry without token", client.id),
                    });
                };
                if confirmed.contains(&(message.sender_id.as_str(), token)) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: token {token:#x} both local and confirmed",
                            client.id
                        ),
                    });
                }
                if !local.insert(token) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: token {token:#x} local twice", client.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Local entries are Pending or Failed; confirmed entries are Sent or
/// Delivered.
pub struct DeliveryMatchesId;

impl Invariant for DeliveryMatchesId {
    fn name(&self) -> &'static str {
        "delivery_matches_id"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for message in &client.messages {
                let ok = match message.server_id {
                    Some(_) => matches!(message.delivery, DeliveryState::Sent | DeliveryState::Delivered),
                    None => matches!(message.delivery, DeliveryState::Pending | DeliveryState::Failed),
                };
                if !ok {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: {:?} has id {:?} but delivery {:?}",
                            client.id, message.text, message.server_id, message.delivery
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every listed typist has time left on its indicator.
pub struct TypingNotExpired;

impl Invariant for TypingNotExpired {
    fn name(&self) -> &'static str {
        "typing_not_expired"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (user, remaining) in &client.typing {
                if remaining.is_some_and(|r| r.is_zero()) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: {user} listed after expiry", client.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Confirmed entries match the server's copy: same author, text and
/// timestamp.
///
/// Skipped when the snapshot carries no server log.
pub struct AgreesWithServer;

impl Invariant for AgreesWithServer {
    fn name(&self) -> &'static str {
        "agrees_with_server"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.server.is_empty() {
            return Ok(());
        }
        let server: HashMap<_, _> = state.server.iter().map(|m| (m.id, m)).collect();

        for client in &state.clients {
            for message in &client.messages {
                let Some(id) = message.server_id else { continue };
                let Some(expected) = server.get(&id) else {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: id {id} unknown to server", client.id),
                    });
                };
                if expected.sender_id != message.sender_id
                    || expected.text != message.text
                    || expected.created_at != message.created_at
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: id {id} diverges from server", client.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A disposed session holds nothing.
pub struct DisposedIsEmpty;

impl Invariant for DisposedIsEmpty {
    fn name(&self) -> &'static str {
        "disposed_is_empty"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in state.clients.iter().filter(|c| c.disposed) {
            if !client.messages.is_empty() || !client.typing.is_empty() || client.unconfirmed > 0 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: disposed with {} messages, {} typists, {} unconfirmed",
                        client.id,
                        client.messages.len(),
                        client.typing.len(),
                        client.unconfirmed
                    ),
                });
            }
        }
        Ok(())
    }
}
