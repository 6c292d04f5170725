//! `freeze`: walk a directory, hash every file, and write a new `.ftag`
//! sidecar. Grounded on `original_source/freezetag/commands.py::freeze`.

use crate::discover::{to_forward_slash, walk_music_dir};
use crate::error::{EngineError, Result};
use freezetag_container::{FileStat, Freezetag, Frozen, FrozenFileEntry, Mode};
use freezetag_format::{FileFormat, ParsedFile};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

static BACKUP_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^F\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}\.ftag$").unwrap());

#[derive(Debug, Clone)]
pub struct FreezeOptions {
    /// `--backup`: produce a version-2 freezetag with per-file `stat`, and
    /// skip rehashing files that are unchanged since the prior backup.
    pub backup: bool,
    /// `--ftag`: a directory to drop the new freezetag into, or an explicit
    /// output path. Defaults to `root`.
    pub ftag: Option<PathBuf>,
    /// Clock used to name backup freezetags (`F<timestamp>.ftag`).
    /// Overridable so tests are deterministic.
    pub now: SystemTime,
}

impl Default for FreezeOptions {
    fn default() -> Self {
        FreezeOptions {
            backup: false,
            ftag: None,
            now: SystemTime::now(),
        }
    }
}

#[derive(Debug)]
pub enum FreezeOutcome {
    /// Backup mode detected that every path already matched the prior
    /// backup's entries and the root name is unchanged; nothing was
    /// written.
    NoChanges { latest: PathBuf },
    Written {
        path: PathBuf,
        freezetag: Freezetag,
    },
}

struct FileStatSnapshot {
    mtime: f64,
    size: u64,
}

fn stat_snapshot(path: &Path) -> Result<FileStatSnapshot> {
    let metadata = std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    let mtime = mtime_seconds(&metadata);
    Ok(FileStatSnapshot {
        mtime,
        size: metadata.len(),
    })
}

#[cfg(unix)]
fn mtime_seconds(metadata: &std::fs::Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    metadata.mtime() as f64 + metadata.mtime_nsec() as f64 / 1e9
}

#[cfg(not(unix))]
fn mtime_seconds(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Finds the most-recently-mtimed `F<date>.ftag` in `dir`, matching
/// `commands.py::freeze`'s backup-mode lookup.
fn find_latest_backup(dir: &Path) -> Result<Option<PathBuf>> {
    let mut latest: Option<(PathBuf, std::time::SystemTime)> = None;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !BACKUP_NAME_RE.is_match(&name) {
            continue;
        }
        let mtime = entry
            .metadata()
            .map_err(|e| EngineError::io(entry.path(), e))?
            .modified()
            .map_err(|e| EngineError::io(entry.path(), e))?;
        if latest.as_ref().map(|(_, t)| mtime > *t).unwrap_or(true) {
            latest = Some((entry.path(), mtime));
        }
    }
    Ok(latest.map(|(path, _)| path))
}

pub fn freeze(root: &Path, options: &FreezeOptions) -> Result<FreezeOutcome> {
    if !root.exists() {
        return Err(EngineError::InputNotFound(root.to_path_buf()));
    }
    let root = root
        .canonicalize()
        .map_err(|e| EngineError::io(root, e))?;

    for entry in std::fs::read_dir(&root).map_err(|e| EngineError::io(&root, e))? {
        let entry = entry.map_err(|e| EngineError::io(&root, e))?;
        let name = entry.file_name();
        if name.to_string_lossy().to_lowercase().ends_with(".ftag-tmp") {
            return Err(EngineError::UnrestoredState(entry.path()));
        }
    }

    let to_path = options.ftag.clone().unwrap_or_else(|| root.clone());
    let to_dir = if to_path.is_dir() {
        to_path.clone()
    } else {
        to_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| root.clone())
    };

    let mut existing: HashMap<String, FrozenFileEntry> = HashMap::new();
    let mut existing_root: Option<String> = None;
    let mut latest_backup_path: Option<PathBuf> = None;
    if options.backup {
        if let Some(latest) = find_latest_backup(&to_dir)? {
            let prior = Freezetag::from_path(&latest)?;
            existing_root = Some(prior.frozen.root.clone());
            for file in prior.frozen.files {
                existing.insert(file.path.clone(), file);
            }
            latest_backup_path = Some(latest);
        }
    }

    let mut files = Vec::new();
    let mut music_checksums = Vec::new();
    let mut metadata_checksums = Vec::new();
    let mut existing_path_count = 0usize;

    for (abs, rel) in walk_music_dir(&root)? {
        let rel_str = to_forward_slash(&rel);

        let reused = if options.backup {
            match existing.get(&rel_str) {
                Some(prior) => {
                    let stat = stat_snapshot(&abs)?;
                    match prior.stat {
                        Some(prior_stat)
                            if prior_stat.size == stat.size
                                && (prior_stat.mtime - stat.mtime).abs() < 1e-3 =>
                        {
                            Some(prior.clone())
                        }
                        _ => None,
                    }
                }
                None => None,
            }
        } else {
            None
        };

        let entry = if let Some(entry) = reused {
            existing_path_count += 1;
            entry
        } else {
            let file = ParsedFile::open(&abs);
            let metadata = file
                .strip()
                .map_err(|e| EngineError::parse(&abs, e))?;
            let checksum = file
                .checksum()
                .map_err(|e| EngineError::parse(&abs, e))?;
            let stat = if options.backup {
                let snap = stat_snapshot(&abs)?;
                Some(FileStat {
                    mtime: snap.mtime,
                    size: snap.size,
                })
            } else {
                None
            };
            FrozenFileEntry {
                path: rel_str,
                format: file.format(),
                checksum,
                stat,
                metadata,
            }
        };

        if entry.format != FileFormat::Generic {
            music_checksums.push(entry.checksum);
            metadata_checksums.push(entry.metadata.checksum());
        }

        files.push(entry);
    }

    if music_checksums.is_empty() {
        return Err(EngineError::NoMusic(root));
    }

    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if options.backup
        && existing_path_count == existing.len()
        && existing_path_count == files.len()
        && existing_root.as_deref() == Some(root_name.as_str())
    {
        return Ok(FreezeOutcome::NoChanges {
            latest: latest_backup_path.expect("existing entries imply a prior backup file"),
        });
    }

    let music_checksum = Frozen::compute_music_checksum(&mut music_checksums);
    let metadata_checksum = Frozen::compute_metadata_checksum(&mut metadata_checksums);

    let mode = if options.backup {
        Mode::Backup
    } else {
        Mode::Default
    };
    let version = if options.backup { 2 } else { 1 };

    let frozen = Frozen {
        mode,
        music_checksum,
        metadata_checksum,
        root: root_name,
        files,
    };
    let freezetag = Freezetag::new(version, frozen);

    let filename = if options.backup {
        let datetime: chrono::DateTime<chrono::Local> = options.now.into();
        format!("F{}.ftag", datetime.format("%Y-%m-%d_%H-%M-%S"))
    } else {
        format!("{}.ftag", freezetag.get_id()?)
    };

    let final_path = if to_path.is_dir() {
        to_path.join(filename)
    } else {
        to_path
    };

    freezetag.write(&final_path)?;

    Ok(FreezeOutcome::Written {
        path: final_path,
        freezetag,
    })
}
