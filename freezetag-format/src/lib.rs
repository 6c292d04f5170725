//! Strip/restore logic for the tag formats freezetag understands, plus a
//! generic fallback for anything else. Each format module owns its own
//! on-disk layout and wire serialization for the metadata it strips out;
//! [`file::ParsedFile`] dispatches to the right one by extension.

pub mod error;
pub mod file;
pub mod flac;
pub mod generic;
pub mod mp3;

pub use error::{FormatError, Result};
pub use file::{FileFormat, Metadata, ParsedFile};
