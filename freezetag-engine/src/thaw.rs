//! `thaw`: restore a directory's music files from a freezetag, splicing
//! metadata back onto stripped audio and renaming/copying files into their
//! frozen paths. Grounded on
//! `original_source/freezetag/commands.py::thaw`/`prepare_thaw`.

use crate::discover::{find_ftag, walk_music_dir};
use crate::error::{EngineError, Result};
use freezetag_common::fs::{move_file, walk_relative};
use freezetag_container::{FreezetagSummary, Freezetag, FrozenFileEntry, MAX_VERSION};
use freezetag_format::{FileFormat, ParsedFile};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone)]
pub struct ThawOptions {
    /// `--to`: a destination root outside of which `frozen.root` is
    /// recreated. Defaults to thawing in place.
    pub to: Option<PathBuf>,
    /// `--ftag`: an explicit freezetag file, or a directory to search for
    /// a single one.
    pub ftag: Option<PathBuf>,
    /// `--skip-checks`: skip the safety pass entirely and restore whatever
    /// matches by checksum.
    pub skip_checks: bool,
}

/// A condition surfaced by the safety pass that needs user confirmation.
/// The CLI collaborator supplies a callback; returning `true` continues,
/// `false` aborts with the matching [`EngineError`] variant.
#[derive(Debug)]
pub enum ThawWarning {
    PathMismatch { common: PathBuf, root: PathBuf },
    MissingMusic { missing: Vec<(String, [u8; 20])> },
}

struct ChecksumItem<'a> {
    entries: Vec<&'a FrozenFileEntry>,
    seen_on_disk: bool,
    already_thawed: bool,
}

pub fn thaw(
    root: &Path,
    options: &ThawOptions,
    mut on_warning: impl FnMut(ThawWarning) -> bool,
) -> Result<PathBuf> {
    if !root.exists() {
        return Err(EngineError::InputNotFound(root.to_path_buf()));
    }
    let root = root.canonicalize().map_err(|e| EngineError::io(root, e))?;

    let ftag_search = options.ftag.clone().unwrap_or_else(|| root.clone());
    let ftag_path = find_ftag(&ftag_search)?;

    let raw = std::fs::read(&ftag_path).map_err(|e| EngineError::io(&ftag_path, e))?;
    let found_version = Freezetag::peek_version(&raw)?;
    if found_version > MAX_VERSION {
        return Err(EngineError::VersionTooNew {
            found: found_version,
            max: MAX_VERSION,
        });
    }
    let freezetag = Freezetag::from_bytes(&raw)?;
    let frozen = &freezetag.frozen;

    let to_dir = match &options.to {
        Some(to) => to.join(&frozen.root),
        None => root.clone(),
    };
    let thaw_in_place = paths_equal(&root, &to_dir);

    let tmp_name = format!(
        "{}.ftag-tmp",
        ftag_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "freezetag".to_string())
    );
    let tmp_dir = root.join(&tmp_name);

    // Captured before the temp directory exists, so it never self-includes.
    let walk_list = walk_music_dir(&root)?;

    let mut checksum_to_item: HashMap<[u8; 20], ChecksumItem> = HashMap::new();
    for file in &frozen.files {
        checksum_to_item
            .entry(file.checksum)
            .or_insert_with(|| ChecksumItem {
                entries: Vec::new(),
                seen_on_disk: false,
                already_thawed: false,
            })
            .entries
            .push(file);
    }

    let mut recognized: HashMap<PathBuf, [u8; 20]> = HashMap::new();

    if !options.skip_checks {
        let mut common: Option<PathBuf> = None;
        let mut unrecognized_found = false;

        for (abs, _rel) in &walk_list {
            let file = ParsedFile::open(abs);
            file.strip().map_err(|e| EngineError::parse(abs, e))?;
            let checksum = file.checksum().map_err(|e| EngineError::parse(abs, e))?;

            match checksum_to_item.get_mut(&checksum) {
                Some(item) => {
                    item.seen_on_disk = true;
                    recognized.insert(abs.clone(), checksum);
                    common = Some(match common {
                        Some(c) => common_ancestor(&c, abs),
                        None => abs.clone(),
                    });
                }
                None => unrecognized_found = true,
            }
        }

        if thaw_in_place && unrecognized_found {
            let common_path = common.clone().unwrap_or_else(|| root.clone());
            if !paths_equal(&common_path, &root) {
                let proceed = on_warning(ThawWarning::PathMismatch {
                    common: common_path,
                    root: root.clone(),
                });
                if !proceed {
                    return Err(EngineError::PathMismatch);
                }
            }
        }

        let missing: Vec<(String, [u8; 20])> = frozen
            .files
            .iter()
            .filter(|f| f.format != FileFormat::Generic)
            .filter(|f| {
                !checksum_to_item
                    .get(&f.checksum)
                    .map(|i| i.seen_on_disk)
                    .unwrap_or(false)
            })
            .map(|f| (f.path.clone(), f.checksum))
            .collect();

        if !missing.is_empty() {
            let proceed = on_warning(ThawWarning::MissingMusic {
                missing: missing.clone(),
            });
            if !proceed {
                return Err(EngineError::MissingMusic);
            }
        }
    }

    for (abs, _rel) in &walk_list {
        let checksum = if options.skip_checks {
            let file = ParsedFile::open(abs);
            file.strip().map_err(|e| EngineError::parse(abs, e))?;
            match file.checksum().map_err(|e| EngineError::parse(abs, e)) {
                Ok(c) => c,
                Err(_) => continue,
            }
        } else {
            match recognized.get(abs) {
                Some(c) => *c,
                None => continue,
            }
        };

        let item = match checksum_to_item.get_mut(&checksum) {
            Some(item) => item,
            None => continue,
        };
        if item.already_thawed {
            continue;
        }
        item.already_thawed = true;

        let entries = item.entries.clone();
        for frozen_entry in &entries {
            let to_file_path = tmp_dir.join(&frozen_entry.path);
            if let Some(parent) = to_file_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }

            if frozen_entry.format == FileFormat::Generic {
                if same_path(abs, &to_file_path) {
                    continue;
                }
                if entries.len() == 1 && thaw_in_place {
                    move_file(abs, &to_file_path).map_err(|e| EngineError::io(abs, e))?;
                } else {
                    std::fs::copy(abs, &to_file_path).map_err(|e| EngineError::io(abs, e))?;
                }
            } else {
                let file = ParsedFile::open(abs);
                file.restore(&frozen_entry.metadata)
                    .map_err(|e| EngineError::parse(abs, e))?;
                file.write(&to_file_path)
                    .map_err(|e| EngineError::parse(abs, e))?;
            }
        }

        if thaw_in_place && abs.exists() {
            std::fs::remove_file(abs).map_err(|e| EngineError::io(abs, e))?;
            prune_empty_dirs(abs.parent(), &root);
        }
    }

    // Commit pass: move every file out of the temp directory into place.
    if tmp_dir.exists() {
        for (abs, rel) in walk_relative(&tmp_dir, |_| false).map_err(|e| EngineError::io(&tmp_dir, e))? {
            let dest = to_dir.join(&rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
            move_file(&abs, &dest).map_err(|e| EngineError::io(&abs, e))?;
        }
        std::fs::remove_dir_all(&tmp_dir).map_err(|e| EngineError::io(&tmp_dir, e))?;
    }

    let final_root = if thaw_in_place {
        let new_root = root
            .parent()
            .map(|p| p.join(&frozen.root))
            .unwrap_or_else(|| root.clone());
        if !paths_equal(&root, &new_root) {
            std::fs::rename(&root, &new_root).map_err(|e| EngineError::io(&root, e))?;
        }
        new_root
    } else {
        to_dir
    };

    Ok(final_root)
}

/// Reads a freezetag's summary without thawing anything, for `show`. See
/// `original_source/freezetag/commands.py::show`.
pub fn show(path: &Path) -> Result<FreezetagSummary> {
    let ftag_path = find_ftag(path)?;
    let raw = std::fs::read(&ftag_path).map_err(|e| EngineError::io(&ftag_path, e))?;
    let found_version = Freezetag::peek_version(&raw)?;
    if found_version > MAX_VERSION {
        return Err(EngineError::VersionTooNew {
            found: found_version,
            max: MAX_VERSION,
        });
    }
    Ok(Freezetag::from_bytes(&raw)?.summary()?)
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    paths_equal(a, b)
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    let a_components: Vec<_> = a.components().collect();
    let b_components: Vec<_> = b.components().collect();
    let mut out = PathBuf::new();
    for (ca, cb) in a_components.iter().zip(b_components.iter()) {
        if ca == cb {
            out.push(ca);
        } else {
            break;
        }
    }
    out
}

fn prune_empty_dirs(from: Option<&Path>, stop_at: &Path) {
    let mut dir = from;
    while let Some(d) = dir {
        if paths_equal(d, stop_at) {
            break;
        }
        match std::fs::read_dir(d) {
            Ok(mut entries) if entries.next().is_none() => {
                if std::fs::remove_dir(d).is_err() {
                    break;
                }
                dir = d.parent();
            }
            _ => break,
        }
    }
}
