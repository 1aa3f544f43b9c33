//! Client session.
//!
//! A session logs in, publishes the local avatar record, and then runs one
//! task that owns the scene and the avatar registry. That task multiplexes:
//! - the pose broadcast tick
//! - attribute changes from tracked remote records
//! - presence transitions
//! - commands from the [`SessionHandle`]
//!
//! Everything touching the scene happens on that task, one message at a time,
//! so handling of a given identity is never interleaved.

use std::sync::Arc;

use anyhow::Context;
use avatar_shared::{
    backend::{Backend, PresenceEvent, PresenceService},
    config::ClientConfig,
    record::{ClientId, RecordKey},
    scene::{SceneGraph, CAMERA_ID},
};
use rand::Rng;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    avatar::{AvatarRegistry, Transition},
    broadcast::{Broadcaster, PoseUpdate},
    error::SessionError,
    subscriber::{AttrChange, AttrSubscriptions},
};

/// State owned by the session task.
pub struct SessionContext<S> {
    pub client_id: ClientId,
    pub scene: S,
    pub registry: AvatarRegistry,
    /// Broadcast ticks so far.
    pub ticks: u64,
}

type InspectFn<S> = Box<dyn FnOnce(&SessionContext<S>) + Send>;

/// Requests sent to a running session.
pub enum Command<S> {
    MoveCamera(PoseUpdate),
    Inspect(InspectFn<S>),
    Shutdown,
}

/// Handle to a running session.
pub struct SessionHandle<S> {
    client_id: ClientId,
    commands: mpsc::UnboundedSender<Command<S>>,
    task: JoinHandle<anyhow::Result<SessionContext<S>>>,
}

impl<S: SceneGraph> SessionHandle<S> {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Moves the local camera. The next tick broadcasts the new pose.
    pub fn move_camera(&self, pose: PoseUpdate) -> Result<(), SessionError> {
        self.commands
            .send(Command::MoveCamera(pose))
            .map_err(|_| SessionError::Closed)
    }

    /// Runs `f` against the session state on the session task.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R, SessionError>
    where
        R: Send + 'static,
        F: FnOnce(&SessionContext<S>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: InspectFn<S> = Box::new(move |ctx| {
            let _ = tx.send(f(ctx));
        });
        self.commands
            .send(Command::Inspect(job))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stops the session, deletes the local record and logs out.
    pub async fn shutdown(self) -> anyhow::Result<SessionContext<S>> {
        let _ = self.commands.send(Command::Shutdown);
        self.task.await.context("session task failed")?
    }
}

/// Initial record published at login.
pub fn initial_record(cfg: &ClientConfig, id: &ClientId, x: f64) -> Value {
    json!({
        "type": cfg.avatar_type,
        "attr": {
            "position": {"x": x, "y": 0.0, "z": 0.0},
            "rotation": "0 0 0",
            "color": cfg.avatar_color,
            "id": id.as_str(),
            "depth": "1",
            "height": "1",
            "width": "1"
        }
    })
}

fn spawn_x(extent: f64) -> f64 {
    if extent > 0.0 {
        rand::thread_rng().gen_range(-extent..=extent)
    } else {
        0.0
    }
}

/// Session entry point.
pub struct Session;

impl Session {
    /// Logs in and starts the session task.
    ///
    /// A rejected login is logged and returned as [`SessionError::LoginFailed`];
    /// nothing else is started and no retry is attempted.
    pub async fn start<B: Backend, S: SceneGraph>(
        backend: Arc<B>,
        scene: S,
        cfg: ClientConfig,
    ) -> anyhow::Result<SessionHandle<S>> {
        let profile = match backend.login(&cfg.credentials()).await {
            Ok(profile) => profile,
            Err(e) => {
                error!(error = %e, "Login failed");
                return Err(SessionError::LoginFailed(e).into());
            }
        };
        let client_id = profile.id;
        info!(client_id = %client_id, "Logged in");

        let key = RecordKey::user(&client_id);
        let x = spawn_x(cfg.spawn_extent);
        backend
            .get_record(&key)
            .await
            .with_context(|| format!("load record {key}"))?;
        backend
            .set(&key, initial_record(&cfg, &client_id, x))
            .await
            .with_context(|| format!("publish record {key}"))?;
        info!(client_id = %client_id, x, "Avatar record published");

        let broadcaster = Broadcaster::spawn(backend.clone(), key);

        // Subscribe before the snapshot so no transition falls in between.
        let presence = PresenceService::subscribe(&*backend)
            .await
            .context("presence subscribe")?;
        let present = backend.get_all().await.context("presence snapshot")?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut subscriptions = AttrSubscriptions::new();
        for id in present {
            if let Err(e) = subscriptions
                .track(&*backend, id.clone(), events_tx.clone())
                .await
            {
                warn!(client_id = %id, error = %e, "Failed to track present client");
            }
        }
        info!(
            client_id = %client_id,
            tracked = subscriptions.len(),
            "Presence snapshot tracked"
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let last_pose = PoseUpdate::read_camera(&scene).unwrap_or_default();
        let runner = Runner {
            backend,
            ctx: SessionContext {
                client_id: client_id.clone(),
                scene,
                registry: AvatarRegistry::new(),
                ticks: 0,
            },
            broadcaster,
            last_pose,
            subscriptions,
            events_tx,
        };
        let interval = cfg.broadcast_interval();
        let task = tokio::spawn(runner.run(interval, events_rx, presence, commands_rx));

        Ok(SessionHandle {
            client_id,
            commands: commands_tx,
            task,
        })
    }
}

struct Runner<B, S> {
    backend: Arc<B>,
    ctx: SessionContext<S>,
    broadcaster: Broadcaster,
    /// Last camera pose that parsed; resent when the camera is unreadable.
    last_pose: PoseUpdate,
    subscriptions: AttrSubscriptions,
    events_tx: mpsc::UnboundedSender<AttrChange>,
}

impl<B: Backend, S: SceneGraph> Runner<B, S> {
    async fn run(
        mut self,
        interval: time::Duration,
        mut events: mpsc::UnboundedReceiver<AttrChange>,
        mut presence: mpsc::UnboundedReceiver<PresenceEvent>,
        mut commands: mpsc::UnboundedReceiver<Command<S>>,
    ) -> anyhow::Result<SessionContext<S>> {
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                Some(change) = events.recv() => self.on_attr_change(change),
                Some(event) = presence.recv() => self.on_presence(event).await,
                Some(command) = commands.recv() => match command {
                    Command::MoveCamera(pose) => self.move_camera(pose),
                    Command::Inspect(job) => job(&self.ctx),
                    Command::Shutdown => break,
                },
            }
        }

        self.finish().await
    }

    fn on_tick(&mut self) {
        self.ctx.ticks += 1;
        match PoseUpdate::read_camera(&self.ctx.scene) {
            Some(pose) => self.last_pose = pose,
            None => warn!("Camera pose unavailable, resending last pose"),
        }
        self.broadcaster.send(self.last_pose);
    }

    fn on_attr_change(&mut self, change: AttrChange) {
        if !self.subscriptions.is_current(&change) {
            debug!(
                client_id = %change.id,
                generation = change.generation,
                "Dropping stale attribute change"
            );
            return;
        }
        let AttrChange { id, record, .. } = change;
        match self
            .ctx
            .registry
            .apply_attr_change(&mut self.ctx.scene, &id, &record)
        {
            Ok(Transition::Created) => info!(client_id = %id, "Avatar created"),
            Ok(Transition::Updated) => trace!(client_id = %id, "Avatar updated"),
            Err(e) => warn!(client_id = %id, error = %e, "Dropping attribute change"),
        }
    }

    async fn on_presence(&mut self, event: PresenceEvent) {
        debug!(client_id = %event.id, online = event.online, "Presence event");
        if event.id == self.ctx.client_id {
            return;
        }
        if event.online {
            if let Err(e) = self
                .subscriptions
                .track(&*self.backend, event.id.clone(), self.events_tx.clone())
                .await
            {
                warn!(client_id = %event.id, error = %e, "Failed to track client");
            }
        } else {
            self.remove_avatar(&event.id).await;
        }
    }

    async fn remove_avatar(&mut self, id: &ClientId) {
        match self.ctx.registry.remove(&mut self.ctx.scene, id) {
            Ok(true) => info!(client_id = %id, "Avatar removed"),
            Ok(false) => debug!(client_id = %id, "Offline client had no avatar"),
            Err(e) => warn!(client_id = %id, error = %e, "Failed to detach avatar"),
        }
        self.subscriptions.forget(id);
        let key = RecordKey::user(id);
        if let Err(e) = self.backend.delete(&key).await {
            warn!(%key, error = %e, "Failed to delete record");
        }
    }

    fn move_camera(&mut self, pose: PoseUpdate) {
        let scene = &mut self.ctx.scene;
        let Some(cam) = scene.element_by_id(CAMERA_ID) else {
            warn!("No camera element to move");
            return;
        };
        let result = scene
            .set_attribute(cam, "position", &pose.position.to_attr())
            .and_then(|()| scene.set_attribute(cam, "rotation", &pose.rotation.to_attr()));
        if let Err(e) = result {
            warn!(error = %e, "Failed to move camera");
        }
    }

    async fn finish(mut self) -> anyhow::Result<SessionContext<S>> {
        let id = self.ctx.client_id.clone();
        let written = self.broadcaster.finish().await;
        self.subscriptions.abort_all();

        let key = RecordKey::user(&id);
        if let Err(e) = self.backend.delete(&key).await {
            warn!(%key, error = %e, "Failed to delete own record");
        }
        if let Err(e) = self.backend.logout().await {
            warn!(client_id = %id, error = %e, "Logout failed");
        }
        info!(client_id = %id, ticks = self.ctx.ticks, written, "Session stopped");
        Ok(self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_shared::{
        backend::{memory::MemoryHub, AuthService, Credentials, RecordStore},
        math::{Rotation, Vec3},
        record::get_path,
        scene::Scene,
    };
    use std::time::Duration;

    fn named(name: &str) -> ClientConfig {
        ClientConfig {
            player_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_initial_record() -> anyhow::Result<()> {
        let hub = MemoryHub::new();
        let handle = Session::start(Arc::new(hub.connect()), Scene::new(), named("me")).await?;
        assert_eq!(handle.client_id(), &ClientId::new("me"));

        let rec = hub
            .record(&RecordKey::new("user/me"))
            .await
            .expect("record published");
        assert_eq!(rec["type"], json!("a-box"));
        assert_eq!(rec["attr"]["id"], json!("me"));
        assert_eq!(rec["attr"]["color"], json!("#222"));
        assert_eq!(rec["attr"]["width"], json!("1"));

        handle.shutdown().await?;
        Ok(())
    }

    #[test]
    fn initial_record_places_body_on_the_x_axis() {
        let cfg = ClientConfig::default();
        let rec = initial_record(&cfg, &ClientId::new("a"), 3.5);
        assert_eq!(rec["attr"]["position"], json!({"x": 3.5, "y": 0.0, "z": 0.0}));
        assert_eq!(rec["attr"]["rotation"], json!("0 0 0"));
        assert_eq!(rec["attr"]["depth"], json!("1"));
        assert_eq!(rec["attr"]["height"], json!("1"));
    }

    #[test]
    fn spawn_x_stays_in_range() {
        for _ in 0..1000 {
            let x = spawn_x(10.0);
            assert!((-10.0..=10.0).contains(&x));
        }
        assert_eq!(spawn_x(0.0), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_every_interval_without_pose_changes() -> anyhow::Result<()> {
        let hub = MemoryHub::new();
        let handle = Session::start(Arc::new(hub.connect()), Scene::new(), named("ticker")).await?;
        let key = RecordKey::new("user/ticker");

        time::sleep(Duration::from_millis(50)).await;
        let before = hub.write_count(&key).await;
        time::sleep(Duration::from_millis(1000)).await;
        let after = hub.write_count(&key).await;
        assert_eq!(after - before, 10);

        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_camera_still_writes_every_tick() -> anyhow::Result<()> {
        let hub = MemoryHub::new();
        let mut scene = Scene::new();
        let cam = scene.element_by_id(CAMERA_ID).unwrap();
        scene.set_attribute(cam, "rotation", "sideways")?;
        let handle = Session::start(Arc::new(hub.connect()), scene, named("blind")).await?;
        let key = RecordKey::new("user/blind");

        time::sleep(Duration::from_millis(50)).await;
        let before = hub.write_count(&key).await;
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(hub.write_count(&key).await - before, 10);

        let rec = hub.record(&key).await.unwrap();
        assert_eq!(get_path(&rec, "attr.rotation"), Some(&json!("0 0 0")));

        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn camera_moves_are_broadcast() -> anyhow::Result<()> {
        let hub = MemoryHub::new();
        let handle = Session::start(Arc::new(hub.connect()), Scene::new(), named("mover")).await?;

        let pose = PoseUpdate::new(Vec3::new(3.0, 1.6, -4.0), Rotation::degrees(0.0, 180.0, 0.0));
        handle.move_camera(pose)?;
        time::sleep(Duration::from_millis(150)).await;

        let rec = hub.record(&RecordKey::new("user/mover")).await.unwrap();
        assert_eq!(get_path(&rec, "attr.position"), Some(&json!({"x": 3.0, "y": 1.6, "z": -4.0})));
        assert_eq!(get_path(&rec, "attr.rotation"), Some(&json!("0 180 0")));
        assert_eq!(get_path(&rec, "type"), Some(&json!("a-box")));

        let ticks = handle.inspect(|ctx| ctx.ticks).await?;
        assert!(ticks >= 2);
        handle.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_starts_nothing() {
        let hub = MemoryHub::with_required_token("s3cret");
        let result = Session::start(Arc::new(hub.connect()), Scene::new(), named("intruder")).await;

        let err = result.err().expect("login must fail");
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::LoginFailed(_))
        ));
        assert!(hub.online().await.is_empty());
        assert_eq!(hub.record(&RecordKey::new("user/intruder")).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_deletes_own_record_and_logs_out() -> anyhow::Result<()> {
        let hub = MemoryHub::new();
        let watcher = hub.connect();
        watcher
            .login(&Credentials {
                username: Some("watcher".into()),
                token: None,
            })
            .await?;

        let handle = Session::start(Arc::new(hub.connect()), Scene::new(), named("leaver")).await?;
        time::sleep(Duration::from_millis(250)).await;
        let ctx = handle.shutdown().await?;
        assert!(ctx.ticks >= 3);

        assert_eq!(hub.record(&RecordKey::new("user/leaver")).await, None);
        assert_eq!(hub.online().await, vec![ClientId::new("watcher")]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_remote_record_does_not_stop_the_session() -> anyhow::Result<()> {
        let hub = MemoryHub::new();
        let handle = Session::start(Arc::new(hub.connect()), Scene::new(), named("viewer")).await?;

        let odd = hub.connect();
        odd.login(&Credentials {
            username: Some("odd".into()),
            token: None,
        })
        .await?;
        time::sleep(Duration::from_millis(10)).await;
        let key = RecordKey::new("user/odd");
        odd.set_fields(&key, vec![("attr.rotation".into(), json!("0 0 0"))])
            .await?;
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.inspect(|ctx| ctx.registry.len()).await?, 0);

        odd.set(
            &key,
            json!({
                "type": "a-box",
                "attr": {"position": {"x": 1.0, "y": 0.0, "z": 0.0}, "rotation": "0 0 0"}
            }),
        )
        .await?;
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.inspect(|ctx| ctx.registry.len()).await?, 1);

        handle.shutdown().await?;
        Ok(())
    }
}
