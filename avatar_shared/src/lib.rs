//! `avatar_shared`
//!
//! Shared libraries used by the avatar client and its tests.
//!
//! Design goals:
//! - The real-time backend and the renderer stay behind traits.
//! - In-memory implementations of both for headless runs.
//! - No `unsafe`.

pub mod backend;
pub mod config;
pub mod error;
pub mod math;
pub mod record;
pub mod scene;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::backend::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::record::*;
    pub use crate::scene::*;
}
