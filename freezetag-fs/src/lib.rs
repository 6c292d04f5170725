//! FreezeFS: a read-only FUSE view of a directory that shows every frozen
//! file thawed, without ever writing a thawed copy to disk. See
//! `original_source/freezetag/freezefs.py` for the process this crate
//! replaces with an index + watcher + FUSE dispatch split across modules.

pub mod cache;
pub mod error;
pub mod fs;
pub mod fuse_file;
pub mod index;
pub mod watcher;

pub use error::{MountError, Result};
pub use fs::{mount, MountOptions};
