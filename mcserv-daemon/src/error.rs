use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Terminal outcome a service reports through its completion signal.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("service task panicked: {0}")]
    Panicked(String),

    #[error("service dropped its completion signal without reporting")]
    Abandoned,

    #[error("completion signal was already claimed")]
    AlreadyClaimed,

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ServiceError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

/// Errors raised while binding or running the RPC socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind rpc socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc socket already in use: {path}")]
    InUse { path: PathBuf },

    #[error("failed to check existing rpc socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc socket path {path} exists and is not a socket")]
    NotSocket { path: PathBuf },

    #[error("failed to accept connection on {path}: {source}")]
    Accept {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc connection error: {0}")]
    Connection(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when exposing a receiver's methods on the RPC server.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("rpc receiver '{receiver}' exposes no methods")]
    NoMethods { receiver: String },

    #[error("rpc method '{method}' is already registered")]
    Duplicate { method: String },

    #[error("invalid rpc name '{name}': names must be non-empty and must not contain '.'")]
    InvalidName { name: String },
}

/// Per-call failure, marshaled back to the caller as the response error.
#[derive(Debug, Error)]
pub enum MethodError {
    #[error("rpc: can't find method {method}")]
    UnknownMethod { method: String },

    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors surfaced by [`crate::RpcClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mcserv is not running (socket missing: {socket})")]
    NotRunning { socket: PathBuf },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rpc protocol error: {0}")]
    Protocol(String),

    #[error("rpc call {method} failed: {message}")]
    Remote { method: String, message: String },
}

/// One service that finished with an error, as collected by the registry.
#[derive(Debug)]
pub struct ServiceFailure {
    pub service: String,
    pub error: ServiceError,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.error)
    }
}

/// Errors returned by [`crate::ServiceRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("finished with errors: [{}]", join_failures(.0))]
    Failed(Vec<ServiceFailure>),

    #[error("failed to install signal handler: {source}")]
    SignalInstall {
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Failures collected by `wait()`, in the order they were observed.
    pub fn failures(&self) -> &[ServiceFailure] {
        match self {
            RegistryError::Failed(failures) => failures,
            RegistryError::SignalInstall { .. } => &[],
        }
    }
}

fn join_failures(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ListenerError {
    ListenerError::Io {
        path: path.into(),
        source,
    }
}
