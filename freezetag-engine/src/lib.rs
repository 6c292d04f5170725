//! The freeze/thaw/shave engine: directory discovery, hashing, and the
//! atomic directory swap that turns a music library into a `.ftag`
//! sidecar and back. See `original_source/freezetag/commands.py` for the
//! algorithms this crate's modules are each grounded on.

pub mod discover;
pub mod error;
pub mod freeze;
pub mod shave;
pub mod thaw;

pub use discover::{find_ftag, is_ftag, to_forward_slash, walk_music_dir};
pub use error::{EngineError, Result};
pub use freeze::{freeze, FreezeOptions, FreezeOutcome};
pub use shave::{shave, ShavedFile};
pub use thaw::{show, thaw, ThawOptions, ThawWarning};
