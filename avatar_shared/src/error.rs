//! Error types shared by client and backends.

use thiserror::Error;

/// Authentication errors reported by an [`AuthService`](crate::backend::AuthService).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("credentials rejected")]
    Rejected,

    #[error("already logged in as {0}")]
    AlreadyLoggedIn(String),

    #[error("not logged in")]
    NotLoggedIn,
}

/// Scene graph errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("unknown node {0}")]
    UnknownNode(u64),

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: u64, child: u64 },

    #[error("element `{0}` not found")]
    MissingElement(&'static str),
}
