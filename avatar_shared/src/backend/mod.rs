//! Real-time backend abstraction.
//!
//! The hosted service provides login, keyed JSON records with field-level
//! subscriptions, and presence tracking. The client only talks to it through
//! these traits; [`memory`] is an in-process implementation for tests and
//! local demos.
//!
//! Notifications are delivered over unbounded channels. A record subscription
//! yields the whole record after every write that touches the watched path and
//! closes once the record is deleted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    error::AuthError,
    record::{ClientId, RecordKey},
};

pub mod memory;

/// Login credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Requested identity; the backend picks one when absent.
    pub username: Option<String>,
    pub token: Option<String>,
}

/// Profile returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub id: ClientId,
}

/// Presence transition of a remote client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub id: ClientId,
    pub online: bool,
}

/// Authentication API.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<ClientProfile, AuthError>;
    async fn logout(&self) -> Result<(), AuthError>;
}

/// Record storage API.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Resolves once the record is loaded and returns its data.
    ///
    /// An absent record is created empty (`{}`).
    async fn get_record(&self, key: &RecordKey) -> anyhow::Result<Value>;

    /// Replaces the whole record.
    async fn set(&self, key: &RecordKey, value: Value) -> anyhow::Result<()>;

    /// Writes individual paths, leaving the rest of the record untouched.
    async fn set_fields(&self, key: &RecordKey, fields: Vec<(String, Value)>)
        -> anyhow::Result<()>;

    /// Subscribes to writes touching `path`.
    async fn subscribe(
        &self,
        key: &RecordKey,
        path: &str,
    ) -> anyhow::Result<mpsc::UnboundedReceiver<Value>>;

    /// Deletes the record and closes its subscriptions.
    async fn delete(&self, key: &RecordKey) -> anyhow::Result<()>;
}

/// Presence API. Both calls exclude the calling client.
#[async_trait]
pub trait PresenceService: Send + Sync {
    async fn get_all(&self) -> anyhow::Result<Vec<ClientId>>;
    async fn subscribe(&self) -> anyhow::Result<mpsc::UnboundedReceiver<PresenceEvent>>;
}

/// Everything a session needs from the backend.
pub trait Backend: AuthService + RecordStore + PresenceService + 'static {}

impl<T: AuthService + RecordStore + PresenceService + 'static> Backend for T {}
