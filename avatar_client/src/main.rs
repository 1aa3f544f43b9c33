//! Standalone demo binary.
//!
//! Usage:
//!   cargo run -p avatar_client -- [--config client.json] [--name me] [--token t]
//!                                 [--tick-ms 100] [--peers 3] [--secs 10]
//!
//! Runs a local session plus `--peers` wandering bot sessions against an
//! in-process backend and logs the avatars the local session renders.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use avatar_client::{broadcast::PoseUpdate, Session, SessionHandle};
use avatar_shared::{
    backend::memory::MemoryHub,
    config::ClientConfig,
    math::{Rotation, Vec3},
    scene::{Scene, CAMERA_HEIGHT},
};
use rand::Rng;
use tracing::{info, warn};

struct Args {
    cfg: ClientConfig,
    peers: usize,
    secs: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = ClientConfig::default();
    if let Some(i) = args.iter().position(|a| a == "--config") {
        let path = args.get(i + 1).context("--config needs a path")?;
        let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        cfg = ClientConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?;
    }

    let mut peers = 3;
    let mut secs = 10;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--name" if i + 1 < args.len() => {
                cfg.player_name = Some(args[i + 1].clone());
                i += 2;
            }
            "--token" if i + 1 < args.len() => {
                cfg.auth_token = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                cfg.broadcast_interval_ms = args[i + 1].parse().unwrap_or(100);
                i += 2;
            }
            "--peers" if i + 1 < args.len() => {
                peers = args[i + 1].parse().unwrap_or(3);
                i += 2;
            }
            "--secs" if i + 1 < args.len() => {
                secs = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, peers, secs })
}

/// Random walk on the ground plane at eye height.
fn wander(pose: &mut PoseUpdate) {
    let mut rng = rand::thread_rng();
    pose.position = pose
        .position
        .offset(rng.gen_range(-0.5..=0.5), 0.0, rng.gen_range(-0.5..=0.5));
    pose.rotation = Rotation::degrees(0.0, rng.gen_range(0.0..360.0), 0.0);
}

async fn start_peer(
    hub: &MemoryHub,
    n: usize,
    base: &ClientConfig,
) -> anyhow::Result<SessionHandle<Scene>> {
    let cfg = ClientConfig {
        player_name: Some(format!("peer-{n}")),
        ..base.clone()
    };
    Session::start(Arc::new(hub.connect()), Scene::new(), cfg)
        .await
        .with_context(|| format!("start peer {n}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, peers, secs } = parse_args()?;
    info!(peers, secs, tick_ms = cfg.broadcast_interval_ms, "Starting demo");

    let hub = match &cfg.auth_token {
        Some(token) => MemoryHub::with_required_token(token.clone()),
        None => MemoryHub::new(),
    };

    let local = Session::start(Arc::new(hub.connect()), Scene::new(), cfg.clone())
        .await
        .context("start local session")?;
    info!(client_id = %local.client_id(), "Local session running");

    let mut bots = Vec::with_capacity(peers);
    for n in 1..=peers {
        let bot = start_peer(&hub, n, &cfg).await?;
        let pose = PoseUpdate::new(Vec3::new(0.0, CAMERA_HEIGHT, 0.0), Rotation::ZERO);
        bots.push((bot, pose));
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    let mut beat = 0u64;
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        for (bot, pose) in &mut bots {
            wander(pose);
            if let Err(e) = bot.move_camera(*pose) {
                warn!(client_id = %bot.client_id(), error = %e, "Peer stopped");
            }
        }

        beat += 1;
        if beat % 4 == 0 {
            let (avatars, ticks) = local
                .inspect(|ctx| (ctx.registry.len(), ctx.ticks))
                .await?;
            info!(avatars, ticks, "Local view");
        }
    }

    // Leave one at a time so the remaining sessions see each departure.
    for (bot, _) in bots {
        let id = bot.client_id().clone();
        bot.shutdown().await.with_context(|| format!("stop {id}"))?;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ctx = local.shutdown().await?;
    info!(
        avatars = ctx.registry.len(),
        stale_parts = ctx.registry.stale_part_count(),
        ticks = ctx.ticks,
        "Demo finished"
    );
    Ok(())
}
