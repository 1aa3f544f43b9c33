//! In-process backend.
//!
//! A [`MemoryHub`] holds records and presence for any number of
//! [`MemoryConnection`]s, one per simulated client. Writes are
//! last-write-wins and every write notifies overlapping subscriptions, whether
//! or not the value changed.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::{AuthService, ClientProfile, Credentials, PresenceEvent, PresenceService, RecordStore};
use crate::{
    error::AuthError,
    record::{paths_overlap, set_path, ClientId, RecordKey},
};

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct HubState {
    records: HashMap<RecordKey, Value>,
    watchers: HashMap<RecordKey, Vec<Watcher>>,
    writes: HashMap<RecordKey, u64>,
    online: BTreeSet<ClientId>,
    presence_watchers: Vec<(ClientId, mpsc::UnboundedSender<PresenceEvent>)>,
    required_token: Option<String>,
}

impl HubState {
    fn notify(&mut self, key: &RecordKey, written: &[&str]) {
        let Some(watchers) = self.watchers.get_mut(key) else {
            return;
        };
        let snapshot = self.records.get(key).cloned().unwrap_or(Value::Null);
        watchers.retain(|w| {
            if written.iter().any(|p| paths_overlap(&w.path, p)) {
                w.tx.send(snapshot.clone()).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });
    }

    fn count_write(&mut self, key: &RecordKey) {
        *self.writes.entry(key.clone()).or_default() += 1;
    }

    fn broadcast_presence(&mut self, id: &ClientId, online: bool) {
        let event = PresenceEvent {
            id: id.clone(),
            online,
        };
        self.presence_watchers
            .retain(|(owner, tx)| owner == id || tx.send(event.clone()).is_ok());
    }
}

/// Shared in-memory backend.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hub that rejects logins without this token.
    pub fn with_required_token(token: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                required_token: Some(token.into()),
                ..Default::default()
            })),
        }
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            hub: self.clone(),
            identity: Mutex::new(None),
        }
    }

    /// Current data of a record, if it exists.
    pub async fn record(&self, key: &RecordKey) -> Option<Value> {
        self.state.lock().await.records.get(key).cloned()
    }

    /// Number of writes (`set` and `set_fields`) applied to a key.
    pub async fn write_count(&self, key: &RecordKey) -> u64 {
        self.state.lock().await.writes.get(key).copied().unwrap_or(0)
    }

    /// Identities currently online.
    pub async fn online(&self) -> Vec<ClientId> {
        self.state.lock().await.online.iter().cloned().collect()
    }
}

/// One client's connection to a [`MemoryHub`].
pub struct MemoryConnection {
    hub: MemoryHub,
    identity: Mutex<Option<ClientId>>,
}

impl MemoryConnection {
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    /// Identity assigned at login.
    pub async fn identity(&self) -> Option<ClientId> {
        self.identity.lock().await.clone()
    }

    async fn require_identity(&self) -> anyhow::Result<ClientId> {
        self.identity().await.ok_or_else(|| AuthError::NotLoggedIn.into())
    }
}

fn anonymous_id() -> ClientId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    ClientId(suffix.to_lowercase())
}

#[async_trait]
impl AuthService for MemoryConnection {
    async fn login(&self, credentials: &Credentials) -> Result<ClientProfile, AuthError> {
        let mut identity = self.identity.lock().await;
        if let Some(id) = identity.as_ref() {
            return Err(AuthError::AlreadyLoggedIn(id.to_string()));
        }

        let mut state = self.hub.state.lock().await;
        if let Some(required) = &state.required_token {
            if credentials.token.as_ref() != Some(required) {
                debug!(username = ?credentials.username, "Login rejected");
                return Err(AuthError::Rejected);
            }
        }

        let id = credentials
            .username
            .clone()
            .map(ClientId)
            .unwrap_or_else(anonymous_id);
        state.online.insert(id.clone());
        state.broadcast_presence(&id, true);
        *identity = Some(id.clone());

        info!(client_id = %id, "Client logged in");
        Ok(ClientProfile { id })
    }

    async fn logout(&self) -> Result<(), AuthError> {
        let mut identity = self.identity.lock().await;
        let id = identity.take().ok_or(AuthError::NotLoggedIn)?;

        let mut state = self.hub.state.lock().await;
        state.online.remove(&id);
        state.presence_watchers.retain(|(owner, _)| owner != &id);
        state.broadcast_presence(&id, false);

        info!(client_id = %id, "Client logged out");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryConnection {
    async fn get_record(&self, key: &RecordKey) -> anyhow::Result<Value> {
        let mut state = self.hub.state.lock().await;
        Ok(state
            .records
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .clone())
    }

    async fn set(&self, key: &RecordKey, value: Value) -> anyhow::Result<()> {
        let mut state = self.hub.state.lock().await;
        state.records.insert(key.clone(), value);
        state.count_write(key);
        state.notify(key, &[""]);
        Ok(())
    }

    async fn set_fields(
        &self,
        key: &RecordKey,
        fields: Vec<(String, Value)>,
    ) -> anyhow::Result<()> {
        let mut state = self.hub.state.lock().await;
        let record = state
            .records
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        for (path, value) in &fields {
            set_path(record, path, value.clone());
        }
        state.count_write(key);
        let written: Vec<&str> = fields.iter().map(|(p, _)| p.as_str()).collect();
        state.notify(key, &written);
        Ok(())
    }

    async fn subscribe(
        &self,
        key: &RecordKey,
        path: &str,
    ) -> anyhow::Result<mpsc::UnboundedReceiver<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.hub.state.lock().await;
        state.watchers.entry(key.clone()).or_default().push(Watcher {
            path: path.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn delete(&self, key: &RecordKey) -> anyhow::Result<()> {
        let mut state = self.hub.state.lock().await;
        let existed = state.records.remove(key).is_some();
        // Dropping the senders ends every subscription on this record.
        state.watchers.remove(key);
        debug!(%key, existed, "Record deleted");
        Ok(())
    }
}

#[async_trait]
impl PresenceService for MemoryConnection {
    async fn get_all(&self) -> anyhow::Result<Vec<ClientId>> {
        let me = self.require_identity().await?;
        let state = self.hub.state.lock().await;
        Ok(state.online.iter().filter(|id| **id != me).cloned().collect())
    }

    async fn subscribe(&self) -> anyhow::Result<mpsc::UnboundedReceiver<PresenceEvent>> {
        let me = self.require_identity().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.state.lock().await.presence_watchers.push((me, tx));
        Ok(rx)
    }
}
