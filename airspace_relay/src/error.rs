// Server-side error taxonomy.
//
// Every RPC handler returns `Result<_, RelayError>`. At the RPC boundary the
// error is flattened into a wire `RpcError { kind, message }` so the client
// can rebuild a typed error (see `client::ClientError`). Nothing is folded
// into sentinel return values.

use std::io;

use airspace_engine::EngineError;
use airspace_protocol::{ErrorKind, FrameError, RpcError, RunStatus, SessionId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown user `{0}`")]
    UnknownUser(String),
    #[error("session is already logged in as `{current}`")]
    AlreadyLoggedIn { current: String },
    #[error("please login")]
    NotAuthenticated,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Ownership(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("`{0}` is not available in embedded mode")]
    Mode(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot {op} while {from:?}")]
    InvalidTransition { op: &'static str, from: RunStatus },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Protocol(_) | RelayError::UnknownSession(_) => ErrorKind::Protocol,
            RelayError::Auth(AuthError::UnknownUser(_)) => ErrorKind::UnknownUser,
            RelayError::Auth(AuthError::AlreadyLoggedIn { .. }) => ErrorKind::AlreadyLoggedIn,
            RelayError::Auth(AuthError::NotAuthenticated) => ErrorKind::NotAuthenticated,
            RelayError::Ownership(_) => ErrorKind::Ownership,
            RelayError::Transport(_) => ErrorKind::Transport,
            RelayError::Mode(_) => ErrorKind::Mode,
            RelayError::NotFound(_) => ErrorKind::NotFound,
            RelayError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            RelayError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RelayError::Engine(EngineError::UnknownEntity { .. }) => ErrorKind::NotFound,
            RelayError::Engine(EngineError::InvalidIndex { .. }) => ErrorKind::InvalidArgument,
            RelayError::Engine(_) => ErrorKind::Engine,
        }
    }
}

impl From<FrameError> for RelayError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => RelayError::Transport(io.to_string()),
            other => RelayError::Protocol(other.to_string()),
        }
    }
}

impl From<RelayError> for RpcError {
    fn from(err: RelayError) -> Self {
        RpcError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Failure to load a config or user file at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}
