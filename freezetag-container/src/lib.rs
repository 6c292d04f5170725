//! The `.ftag` sidecar codec and the mount-time checksum cache: §4.B and
//! §4.C of the freezetag design.

pub mod cache;
pub mod error;
pub mod frozen;

pub use cache::{CacheEntry, ChecksumCache, FileKey};
pub use error::{ContainerError, Result};
pub use frozen::{FileStat, Freezetag, FreezetagSummary, Frozen, FrozenFileEntry, Mode, MAX_VERSION};
