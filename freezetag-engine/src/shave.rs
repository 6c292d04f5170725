//! `shave`: strip tags from every music file under a directory in place,
//! without writing a freezetag. Grounded on
//! `original_source/freezetag/commands.py::shave`.

use crate::discover::walk_music_dir;
use crate::error::{EngineError, Result};
use freezetag_format::{FileFormat, ParsedFile};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ShavedFile {
    pub path: PathBuf,
    pub format: FileFormat,
    pub removed: Vec<(String, u32)>,
}

/// Strips every recognized music file under `root` of its tags, writing
/// each one back in place. Returns a report of what was removed per file
/// for the CLI collaborator to log.
pub fn shave(root: &Path) -> Result<Vec<ShavedFile>> {
    if !root.exists() {
        return Err(EngineError::InputNotFound(root.to_path_buf()));
    }

    let mut shaved = Vec::new();
    for (abs, _rel) in walk_music_dir(root)? {
        let file = ParsedFile::open(&abs);
        if file.format() == FileFormat::Generic {
            continue;
        }

        let metadata = file.strip().map_err(|e| EngineError::parse(&abs, e))?;
        if metadata.is_empty() {
            continue;
        }

        file.write(&abs).map_err(|e| EngineError::parse(&abs, e))?;
        shaved.push(ShavedFile {
            path: abs,
            format: file.format(),
            removed: metadata.report(),
        });
    }

    Ok(shaved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skips_generic_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let shaved = shave(dir.path()).unwrap();
        assert!(shaved.is_empty());
    }

    #[test]
    fn errors_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        match shave(&missing) {
            Err(EngineError::InputNotFound(_)) => {}
            other => panic!("expected InputNotFound, got {other:?}"),
        }
    }
}
