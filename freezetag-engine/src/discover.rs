//! Directory walking and freezetag discovery shared by `freeze`/`thaw`/
//! `shave`/`show`. Grounded on `original_source/freezetag/commands.py`'s
//! `walk_dir`/`find_ftag`.

use crate::error::{EngineError, Result};
use freezetag_common::fs::walk_relative;
use std::path::{Path, PathBuf};

/// Walks `root` in the deterministic order the whole engine relies on
/// (lexicographic by directory, then by filename), skipping `.ftag` files.
/// Returns `(absolute_path, relative_path)` pairs.
pub fn walk_music_dir<P: AsRef<Path>>(root: P) -> Result<Vec<(PathBuf, PathBuf)>> {
    let root = root.as_ref();
    walk_relative(root, is_ftag).map_err(|e| EngineError::io(root, e))
}

pub fn is_ftag(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("ftag"))
        .unwrap_or(false)
}

/// Resolves the freezetag to operate on: an explicit file, or the single
/// `.ftag` file in a directory. Multiple candidates with no explicit choice
/// is an [`EngineError::AmbiguousSelection`] — prompting for one is the
/// CLI collaborator's job, per §7's "error in non-interactive use" policy.
pub fn find_ftag(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(EngineError::InputNotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(|e| EngineError::io(path, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_ftag(p))
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(EngineError::InputNotFound(path.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(EngineError::AmbiguousSelection {
            dir: path.to_path_buf(),
            choices: candidates,
        }),
    }
}

/// A relative path rendered with forward slashes, as the wire format
/// requires (§3).
pub fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walk_skips_ftag_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.flac"), b"").unwrap();
        fs::write(dir.path().join("library.ftag"), b"").unwrap();

        let walked = walk_music_dir(dir.path()).unwrap();
        assert_eq!(walked.len(), 1);
        assert_eq!(walked[0].1, Path::new("a.flac"));
    }

    #[test]
    fn find_ftag_errors_on_multiple_candidates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ftag"), b"").unwrap();
        fs::write(dir.path().join("b.ftag"), b"").unwrap();

        match find_ftag(dir.path()) {
            Err(EngineError::AmbiguousSelection { choices, .. }) => assert_eq!(choices.len(), 2),
            other => panic!("expected AmbiguousSelection, got {other:?}"),
        }
    }

    #[test]
    fn to_forward_slash_joins_components() {
        assert_eq!(to_forward_slash(Path::new("a/b/c.flac")), "a/b/c.flac");
    }
}
