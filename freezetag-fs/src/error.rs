use std::path::PathBuf;
use thiserror::Error;

/// Failure modes `mount()` itself can raise. Once mounted, a bad file under
/// the watched directory is logged and skipped rather than surfaced here —
/// see `index::FreezeFsState::add_file`/`add_ftag`.
#[derive(Error, Debug)]
pub enum MountError {
    #[error("directory does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to watch {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to mount FUSE filesystem at {mountpoint}: {source}")]
    Fuse {
        mountpoint: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Container(#[from] freezetag_container::ContainerError),
}

pub type Result<T> = std::result::Result<T, MountError>;
