//! Pending revision requests keyed by actor.
//!
//! An entry means: this actor pressed "request revision" on an order and their
//! next text message is the comment. Entries never expire and live only in
//! memory, so a restart drops them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_channels::ActorId;

pub trait PendingActionStore: Send + Sync {
    /// Upsert. Returns the order that was waiting before, if any.
    fn set(&self, actor_id: &ActorId, order_id: &str) -> Option<String>;

    /// Atomic read-and-remove. Of two concurrent pops for the same actor at
    /// most one observes the entry.
    fn pop(&self, actor_id: &ActorId) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct PendingAction {
    order_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemoryPendingActions {
    entries: DashMap<ActorId, PendingAction>,
}

impl InMemoryPendingActions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingActionStore for InMemoryPendingActions {
    fn set(&self, actor_id: &ActorId, order_id: &str) -> Option<String> {
        let previous = self.entries.insert(
            actor_id.clone(),
            PendingAction {
                order_id: order_id.to_string(),
                created_at: Utc::now(),
            },
        );
        previous.map(|entry| entry.order_id)
    }

    fn pop(&self, actor_id: &ActorId) -> Option<String> {
        let (_, entry) = self.entries.remove(actor_id)?;
        let waited_ms = (Utc::now() - entry.created_at).num_milliseconds();
        tracing::debug!(actor_id = %actor_id, order_id = %entry.order_id, waited_ms, "pending action consumed");
        Some(entry.order_id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
