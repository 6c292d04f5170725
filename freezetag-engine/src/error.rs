use std::path::PathBuf;
use thiserror::Error;

/// The error kinds enumerated in §7: every failure mode the freeze/thaw/
/// shave engine can surface to its (out-of-scope) CLI collaborator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("directory or freezetag does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("freezetag version {found} is newer than the {max} this build supports")]
    VersionTooNew { found: u8, max: u8 },

    #[error("unrestored freezetag temp directory found at {0}; run thaw again to finish processing")]
    UnrestoredState(PathBuf),

    #[error("no music files found under {0}")]
    NoMusic(PathBuf),

    #[error("multiple freezetag files found in {dir}, and no selection was made: {choices:?}")]
    AmbiguousSelection { dir: PathBuf, choices: Vec<PathBuf> },

    #[error("failed to parse {path}: {source}")]
    ParseFailure {
        path: PathBuf,
        #[source]
        source: freezetag_format::FormatError,
    },

    #[error("I/O failure on {path}: {source}")]
    IOFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("thaw aborted: one or more music files listed in the freezetag are missing")]
    MissingMusic,

    #[error("thaw aborted: common path of recognized files does not match the thaw directory")]
    PathMismatch,

    #[error(transparent)]
    Container(#[from] freezetag_container::ContainerError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::IOFailure {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: freezetag_format::FormatError) -> Self {
        EngineError::ParseFailure {
            path: path.into(),
            source,
        }
    }
}
