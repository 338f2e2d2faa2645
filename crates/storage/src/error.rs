use thiserror::Error;

/// Error kinds for the storage routing and remote-access layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found")]
    NotFound,

    #[error("quota exceeded for remote '{remote}'")]
    QuotaExceeded { remote: String },

    #[error("remote transient error on '{remote}': {reason}")]
    RemoteTransient { remote: String, reason: String },

    #[error("no healthy remotes in group {0}")]
    NoHealthyRemotes(u32),

    #[error("daemon unavailable for remote '{0}'")]
    DaemonUnavailable(String),

    #[error("rclone invocation failed (exit {code:?}): {stderr}")]
    ToolInvocation { code: Option<i32>, stderr: String },

    #[error("group {0} is not configured")]
    UnknownGroup(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::InvalidPath(_) => 400,
            StorageError::NotFound => 404,
            StorageError::UnknownGroup(_) => 400,
            StorageError::NoHealthyRemotes(_) | StorageError::QuotaExceeded { .. } => 502,
            StorageError::RemoteTransient { .. }
            | StorageError::DaemonUnavailable(_)
            | StorageError::ToolInvocation { .. } => 502,
            StorageError::Io(_) | StorageError::Http(_) | StorageError::Other(_) => 500,
        }
    }
}
