use std::path::PathBuf;

/// Semantic error kinds shared by every engine.
///
/// Each variant corresponds to one of the error kinds listed in the
/// design document: user-input validation failures abort the current
/// command, per-entry failures during scans are logged and skipped, and
/// privilege failures are always fatal.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("configuration is invalid: {0}")]
    ConfigInvalid(String),

    #[error("you are not allowed to execute this operation")]
    AccessDenied,

    #[error("no such workspace: {0}")]
    NotFound(String),

    #[error("workspace already exists: {0}")]
    Exists(String),

    #[error("malformed entry at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("io error on {path}: {source}")]
    IoFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("privilege transition failed: {0}")]
    PrivilegeFailed(String),

    #[error("restore across filesystems is not supported")]
    CrossDevice,

    #[error("no extensions remaining")]
    NoExtensions,

    #[error("illegal workspace name: {0}")]
    NameIllegal(String),

    #[error("database magic mismatch for filesystem {0}")]
    MagicMismatch(String),

    #[error("no usable space found on filesystem {0}")]
    NoSpaceAvailable(String),
}

/// Severity bucket used to choose the stderr line prefix (`Error  :`,
/// `Warning:`, `Info   :`) mandated for user-visible diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl WsError {
    pub fn severity(&self) -> Severity {
        match self {
            WsError::PrivilegeFailed(_) => Severity::Error,
            WsError::MagicMismatch(_) => Severity::Error,
            _ => Severity::Error,
        }
    }

    /// Maps a kind onto the exit codes documented for the CLI surface:
    /// 0 success, 1 usage, >=2 runtime error.
    pub fn exit_code(&self) -> i32 {
        match self {
            WsError::NameIllegal(_) | WsError::ConfigInvalid(_) => 1,
            WsError::AccessDenied => 2,
            WsError::NotFound(_) => 3,
            WsError::Exists(_) => 4,
            WsError::Malformed { .. } => 5,
            WsError::IoFailed { .. } => 6,
            WsError::PrivilegeFailed(_) => 7,
            WsError::CrossDevice => 8,
            WsError::NoExtensions => 9,
            WsError::MagicMismatch(_) => 10,
            WsError::NoSpaceAvailable(_) => 11,
        }
    }
}

pub type Result<T> = std::result::Result<T, WsError>;
