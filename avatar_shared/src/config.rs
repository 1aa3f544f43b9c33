//! Configuration system.
//!
//! Loads client configuration from JSON strings (file IO left to app).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Credentials;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identity requested at login. The backend picks one when unset.
    #[serde(default)]
    pub player_name: Option<String>,
    /// Token presented at login.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Pose broadcast period.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Initial x is drawn from `[-spawn_extent, spawn_extent]`.
    #[serde(default = "default_spawn_extent")]
    pub spawn_extent: f64,
    /// Element tag of the avatar body.
    #[serde(default = "default_avatar_type")]
    pub avatar_type: String,
    #[serde(default = "default_avatar_color")]
    pub avatar_color: String,
}

fn default_broadcast_interval_ms() -> u64 {
    100
}

fn default_spawn_extent() -> f64 {
    10.0
}

fn default_avatar_type() -> String {
    "a-box".to_string()
}

fn default_avatar_color() -> String {
    "#222".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: None,
            auth_token: None,
            broadcast_interval_ms: default_broadcast_interval_ms(),
            spawn_extent: default_spawn_extent(),
            avatar_type: default_avatar_type(),
            avatar_color: default_avatar_color(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.max(1))
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.player_name.clone(),
            token: self.auth_token.clone(),
        }
    }
}
