//! Pose broadcast.
//!
//! The session samples the local camera on a fixed tick and hands each sample
//! to a writer task. Writes are fire-and-forget: nothing waits for them, no
//! sample is coalesced or skipped, and failures are only logged.

use std::sync::Arc;

use avatar_shared::{
    backend::RecordStore,
    math::{Rotation, Vec3},
    record::{paths, RecordKey},
    scene::{SceneGraph, CAMERA_ID},
};
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, trace};

/// Local camera pose at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseUpdate {
    pub position: Vec3,
    pub rotation: Rotation,
}

impl PoseUpdate {
    pub fn new(position: Vec3, rotation: Rotation) -> Self {
        Self { position, rotation }
    }

    /// Reads the `user-cam` element's pose.
    pub fn read_camera<S: SceneGraph>(scene: &S) -> Option<Self> {
        let cam = scene.element_by_id(CAMERA_ID)?;
        let position = scene
            .get_attribute(cam, "position")
            .and_then(|s| Vec3::parse_attr(&s))?;
        let rotation = scene
            .get_attribute(cam, "rotation")
            .and_then(|s| Rotation::parse_attr(&s))?;
        Some(Self { position, rotation })
    }

    /// Record writes for this pose: `attr.position` as `{x, y, z}` and
    /// `attr.rotation` as `"x y z"`.
    pub fn into_fields(self) -> Vec<(String, Value)> {
        let p = self.position;
        vec![
            (
                paths::POSITION.to_string(),
                json!({"x": p.x, "y": p.y, "z": p.z}),
            ),
            (
                paths::ROTATION.to_string(),
                Value::String(self.rotation.to_attr()),
            ),
        ]
    }
}

/// Writer task for the local pose record.
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<PoseUpdate>,
    task: JoinHandle<u64>,
}

impl Broadcaster {
    pub fn spawn<R: RecordStore + 'static>(store: Arc<R>, key: RecordKey) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PoseUpdate>();
        let task = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(pose) = rx.recv().await {
                match store.set_fields(&key, pose.into_fields()).await {
                    Ok(()) => {
                        written += 1;
                        trace!(%key, position = %pose.position, "Pose written");
                    }
                    Err(e) => debug!(%key, error = %e, "Pose write failed"),
                }
            }
            written
        });
        Self { tx, task }
    }

    /// Queues a pose write.
    pub fn send(&self, pose: PoseUpdate) {
        if self.tx.send(pose).is_err() {
            debug!("Broadcaster stopped, pose dropped");
        }
    }

    /// Flushes queued writes and stops the writer. Returns the number of
    /// successful writes.
    pub async fn finish(self) -> u64 {
        drop(self.tx);
        self.task.await.unwrap_or_default()
    }
}
