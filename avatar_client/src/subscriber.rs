//! Attribute-change subscriptions for remote identities.
//!
//! Each tracked identity gets one forwarding task that turns record
//! notifications into [`AttrChange`] messages on the session's channel. The
//! task ends when the record is deleted, the identity is forgotten, or the
//! session goes away.
//!
//! Every `track` call opens a new generation for the identity. Changes carry
//! the generation they were read under, and the session drops any change
//! whose generation is no longer current, including changes that were
//! already queued when the identity went offline.

use std::collections::HashMap;

use anyhow::Context;
use avatar_shared::{
    backend::RecordStore,
    record::{paths, ClientId, RecordKey},
};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

/// A remote record's `attr` field was written.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrChange {
    pub id: ClientId,
    /// Subscription generation the change was delivered under.
    pub generation: u64,
    /// Whole record after the write.
    pub record: Value,
}

struct Tracked {
    generation: u64,
    task: JoinHandle<()>,
}

/// Live subscriptions keyed by identity.
#[derive(Default)]
pub struct AttrSubscriptions {
    tasks: HashMap<ClientId, Tracked>,
    next_generation: u64,
}

impl AttrSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the record of `id` to be ready and subscribes to its `attr`
    /// field. A previous subscription for the same identity is replaced.
    ///
    /// Returns the generation of the new subscription.
    pub async fn track<R: RecordStore + ?Sized>(
        &mut self,
        store: &R,
        id: ClientId,
        events: mpsc::UnboundedSender<AttrChange>,
    ) -> anyhow::Result<u64> {
        let key = RecordKey::user(&id);
        store
            .get_record(&key)
            .await
            .with_context(|| format!("load record {key}"))?;
        let mut rx = store
            .subscribe(&key, paths::ATTR)
            .await
            .with_context(|| format!("subscribe {key}"))?;

        self.next_generation += 1;
        let generation = self.next_generation;
        let forward_id = id.clone();
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let change = AttrChange {
                    id: forward_id.clone(),
                    generation,
                    record,
                };
                if events.send(change).is_err() {
                    break;
                }
            }
            debug!(client_id = %forward_id, "Attribute subscription closed");
        });

        if let Some(previous) = self.tasks.insert(id.clone(), Tracked { generation, task }) {
            previous.task.abort();
            debug!(client_id = %id, generation, "Replaced attribute subscription");
        }
        Ok(generation)
    }

    /// Stops forwarding for `id`. Changes already queued for it become stale.
    pub fn forget(&mut self, id: &ClientId) {
        if let Some(tracked) = self.tasks.remove(id) {
            tracked.task.abort();
        }
    }

    /// Whether `change` belongs to the live subscription of its identity.
    pub fn is_current(&self, change: &AttrChange) -> bool {
        self.tasks
            .get(&change.id)
            .is_some_and(|t| t.generation == change.generation)
    }

    pub fn is_tracked(&self, id: &ClientId) -> bool {
        self.tasks.get(id).is_some_and(|t| !t.task.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn abort_all(&mut self) {
        for (_, tracked) in self.tasks.drain() {
            tracked.task.abort();
        }
    }
}
