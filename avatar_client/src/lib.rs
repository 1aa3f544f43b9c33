//! `avatar_client`
//!
//! Client-side systems:
//! - Session bootstrap (login + local avatar record)
//! - Pose broadcast on a fixed tick
//! - Presence tracking and per-identity attribute subscriptions
//! - Remote avatar construction, update and removal

pub mod avatar;
pub mod broadcast;
pub mod error;
pub mod session;
pub mod subscriber;

pub use error::SessionError;
pub use session::{Session, SessionHandle};
