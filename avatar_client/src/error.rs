//! Session errors.

use avatar_shared::{
    error::{AuthError, SceneError},
    record::ClientId,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Login was refused; the session does not start.
    #[error("login failed: {0}")]
    LoginFailed(#[from] AuthError),

    /// A remote record lacks a field needed to render its avatar.
    #[error("malformed record for {id}: missing {field}")]
    MalformedRecord { id: ClientId, field: &'static str },

    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    /// The session task has stopped.
    #[error("session closed")]
    Closed,
}
