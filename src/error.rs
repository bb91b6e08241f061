use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TorError {
    #[error("tor binary not found or not executable: {}", path.display())]
    BinaryNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tor did not publish its control port in {} within {:?} ({attempts} attempts)", state_dir.display(), waited)]
    Timeout {
        state_dir: PathBuf,
        attempts: u32,
        waited: Duration,
    },

    #[error("control connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("tor rejected authentication: {response}")]
    AuthRejected { response: String },

    #[error("tor is unavailable ({strategy})")]
    Unavailable {
        strategy: &'static str,
        #[source]
        source: Box<TorError>,
    },

    #[error("a tor daemon is already supervised (pid {pid:?})")]
    AlreadySupervising { pid: Option<u32> },

    #[error("no tor binary could be acquired for {platform}")]
    ProvisioningFailed { platform: String },

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat classification of [`TorError`], handy for matching on causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BinaryNotFound,
    Timeout,
    ConnectionFailed,
    AuthRejected,
    Unavailable,
    AlreadySupervising,
    ProvisioningFailed,
    Provision,
    Config,
    Io,
}

impl TorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BinaryNotFound { .. } => ErrorKind::BinaryNotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::AuthRejected { .. } => ErrorKind::AuthRejected,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::AlreadySupervising { .. } => ErrorKind::AlreadySupervising,
            Self::ProvisioningFailed { .. } => ErrorKind::ProvisioningFailed,
            Self::Provision(_) => ErrorKind::Provision,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// The stage error behind an `Unavailable`, or the error itself.
    pub fn cause(&self) -> &TorError {
        match self {
            Self::Unavailable { source, .. } => source.cause(),
            other => other,
        }
    }

    pub(crate) fn connection_failed(endpoint: impl ToString, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TorError>;
