//! Helpers shared by the integration tests.

use std::{sync::Arc, time::Duration};

use avatar_client::{Session, SessionHandle};
use avatar_shared::{
    backend::{memory::MemoryHub, Credentials},
    config::ClientConfig,
    scene::Scene,
};

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Config for a named client spawning at the origin.
pub fn config(name: &str) -> ClientConfig {
    ClientConfig {
        player_name: Some(name.to_string()),
        spawn_extent: 0.0,
        ..Default::default()
    }
}

pub fn credentials(name: &str) -> Credentials {
    Credentials {
        username: Some(name.to_string()),
        token: None,
    }
}

/// Starts a session for `name` on its own connection to `hub`.
pub async fn start_named(hub: &MemoryHub, name: &str) -> anyhow::Result<SessionHandle<Scene>> {
    Session::start(Arc::new(hub.connect()), Scene::new(), config(name)).await
}

/// Lets every session run for `ms` milliseconds of (possibly paused) time.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
