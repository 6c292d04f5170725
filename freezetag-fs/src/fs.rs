//! The live FUSE view: one `FreezeFsState` shared between the FUSE callback
//! dispatch and the directory watcher thread, per the design note that both
//! should "route onto a single work queue, or guard every index with the
//! same mutex" (§9). Grounded on
//! `original_source/freezetag/freezefs.py`'s `FreezeFS` class, which is
//! simultaneously a `fuse.Operations` and a `watchdog.FileSystemEventHandler`
//! mixin; here that's one `FreezeFsState` with plain methods for both call
//! sites, wrapped by a thin [`FreezeFs`] adapter that implements
//! `fuser::Filesystem` by delegating into it.

use crate::cache::FreezetagRefCache;
use crate::error::{MountError, Result};
use crate::fuse_file::FuseFile;
use crate::index::{self, EntryKind, FreezeIndex, FrozenItemFileEntry, FrozenItemFreezetagEntry, ROOT_INODE};
use crate::watcher::spawn_watcher;
use freezetag_container::ChecksumCache;
use freezetag_format::{Metadata, ParsedFile};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const TTL: Duration = Duration::from_secs(1);

/// Mount-time options, corresponding to the `mount directory mount_point
/// [--verbose]` command in §6. `verbose` only affects how much this crate
/// logs about its own scan/watch activity; the CLI collaborator owns
/// logger initialization.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub verbose: bool,
}

struct OpenHandle {
    file: FuseFile,
    /// Set when the virtual file carries non-empty frozen metadata, so
    /// `release` knows to give back the reference `open` took.
    freezetag_path: Option<PathBuf>,
}

/// All state shared between FUSE dispatch and the watcher thread. `index`
/// is the second mutex called for in §5 ("otherwise require a second
/// mutex"); `ref_cache` is the one already described in §4.E/§5 guarding
/// the freezetag LRU, its refcounts, and its keep-alive timers.
pub struct FreezeFsState {
    directory: PathBuf,
    index: Mutex<FreezeIndex>,
    ref_cache: Arc<FreezetagRefCache>,
    checksum_cache: Mutex<ChecksumCache>,
    fh_table: Mutex<HashMap<u64, OpenHandle>>,
    next_fh: AtomicU64,
    uid: u32,
    gid: u32,
}

impl FreezeFsState {
    fn new(directory: PathBuf, checksum_cache: ChecksumCache) -> Arc<Self> {
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Arc::new(FreezeFsState {
            directory,
            index: Mutex::new(FreezeIndex::new()),
            ref_cache: Arc::new(FreezetagRefCache::new()),
            checksum_cache: Mutex::new(checksum_cache),
            fh_table: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            uid,
            gid,
        })
    }

    // -- watcher-facing events -------------------------------------------

    pub fn on_created(&self, path: &Path) {
        if path.is_dir() {
            return;
        }
        if is_ftag_path(path) {
            self.add_ftag(path);
        } else {
            self.add_file(path);
        }
    }

    pub fn on_deleted(&self, path: &Path) {
        if is_ftag_path(path) {
            self.remove_ftag(path);
        } else {
            self.index.lock().remove_path_entry(path);
        }
    }

    pub fn on_moved(&self, from: &Path, to: &Path) {
        if is_ftag_path(from) || is_ftag_path(to) {
            self.ref_cache.force_purge(from);
            let mut index = self.index.lock();
            index.rename_freezetag(from, to.to_path_buf());
            return;
        }

        let mut index = self.index.lock();
        if to.is_dir() {
            for old_path in index.paths_under(from) {
                let rel = old_path.strip_prefix(from).unwrap_or(&old_path).to_path_buf();
                index.rename_path_entry(&old_path, to.join(rel));
            }
        } else {
            index.rename_path_entry(from, to.to_path_buf());
        }
    }

    /// `modified` is handled as delete-then-create (§5): any index state an
    /// open handle relied on is dropped here and rebuilt from scratch,
    /// which is why opens survive a rename but not a modify.
    pub fn on_modified(&self, path: &Path) {
        self.on_deleted(path);
        if path.exists() {
            self.on_created(path);
        }
    }

    // -- indexing ----------------------------------------------------------

    fn add_file(&self, path: &Path) {
        match self.compute_file_info(path) {
            Ok(Some((checksum, metadata_info, metadata_len))) => {
                self.index.lock().add_path_entry(
                    checksum,
                    FrozenItemFileEntry {
                        real_path: path.to_path_buf(),
                        metadata_info,
                        metadata_len,
                    },
                );
            }
            Ok(None) => {}
            Err(e) => warn!("failed to parse {}: {e}", path.display()),
        }
    }

    fn compute_file_info(
        &self,
        path: &Path,
    ) -> std::result::Result<Option<([u8; 20], Vec<(String, u32)>, u32)>, freezetag_format::FormatError> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        if !meta.is_file() {
            return Ok(None);
        }

        let (device, inode) = file_key(&meta);
        let mtime = mtime_seconds(&meta);

        {
            let cache = self.checksum_cache.lock();
            if let Some(entry) = cache.get(device, inode, mtime) {
                return Ok(Some((entry.checksum, entry.metadata_info.clone(), entry.metadata_len)));
            }
        }

        let file = ParsedFile::open(path);
        let metadata = file.strip()?;
        let checksum = file.checksum()?;
        let metadata_info = metadata.metadata_info();
        let metadata_len = metadata.metadata_len();

        self.checksum_cache
            .lock()
            .add(device, inode, mtime, checksum, metadata_info.clone(), metadata_len);

        Ok(Some((checksum, metadata_info, metadata_len)))
    }

    fn add_ftag(&self, path: &Path) {
        if let Err(e) = self.try_add_ftag(path) {
            warn!("failed to parse freezetag {}: {e}", path.display());
        }
    }

    fn try_add_ftag(&self, path: &Path) -> std::result::Result<(), freezetag_container::ContainerError> {
        let freezetag = self.ref_cache.load_and_schedule_purge(path)?;
        let root = freezetag.frozen.root.clone();

        let mut index = self.index.lock();
        if index.root_is_active(&root) {
            index.mark_inactive(root, path.to_path_buf());
            return Ok(());
        }

        let mut checksums = Vec::with_capacity(freezetag.frozen.files.len());
        for file in &freezetag.frozen.files {
            let mut virtual_path = vec![root.clone()];
            virtual_path.extend(index::split_virtual_path(&file.path));
            index.add_freezetag_entry(
                file.checksum,
                FrozenItemFreezetagEntry {
                    freezetag_path: path.to_path_buf(),
                    virtual_path,
                    metadata_len: file.metadata.metadata_len(),
                },
            );
            checksums.push(file.checksum);
        }
        index.register_freezetag(path.to_path_buf(), root, checksums);
        Ok(())
    }

    fn remove_ftag(&self, path: &Path) {
        self.ref_cache.force_purge(path);
        let promotable = {
            let mut index = self.index.lock();
            index.remove_freezetag(path).and_then(|root| index.take_inactive_for_root(&root))
        };
        if let Some(promoted) = promotable {
            self.add_ftag(&promoted);
        }
    }

    /// One full synchronous pass over `directory` before the FUSE loop
    /// starts, matching `freezefs.py::mount`'s `for path in walk_dir(...)`
    /// ahead of `FUSE(...)`. Backing files are indexed before freezetags so
    /// a freezetag's entries are immediately visible rather than waiting
    /// for a later watcher event.
    fn initial_scan(&self) -> Result<()> {
        let entries = freezetag_common::fs::walk_relative(&self.directory, |_| false)?;
        let (ftags, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|(abs, _)| is_ftag_path(abs));
        for (abs, _) in &files {
            self.add_file(abs);
        }
        for (abs, _) in &ftags {
            self.add_ftag(abs);
        }
        if let Err(e) = self.checksum_cache.lock().flush() {
            warn!("failed to flush checksum cache after initial scan: {e}");
        }
        Ok(())
    }

    // -- FUSE operations -----------------------------------------------------

    fn dir_attr(&self, ino: u64) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// `getattr`'s size adjustment (§4.E): the real backing file's size,
    /// shifted by `frozen.metadata_len - file.metadata_len` so a caller
    /// sees the restored size without anything ever being materialized.
    /// Returns `None` for a leaf with no freezetag entry or no file entry,
    /// per the `ENOENT` rule in §4.E.
    fn file_attr(&self, index: &mut FreezeIndex, path: &[String]) -> Option<FileAttr> {
        let checksum = index.checksum_at(path)?;
        let item = index.frozen_item(&checksum)?;
        let file_entry = item.file_entries.first()?;
        let ftag_entry = item.freezetag_entries.iter().find(|e| e.virtual_path == path)?;

        let real_meta = std::fs::metadata(&file_entry.real_path).ok()?;
        let real_size = real_meta.len() as i64;
        let delta = ftag_entry.metadata_len as i64 - file_entry.metadata_len as i64;
        let size = (real_size + delta).max(0) as u64;
        let ino = index.ino_for_path(path);

        let now = SystemTime::now();
        Some(FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: real_meta.accessed().unwrap_or(now),
            mtime: real_meta.modified().unwrap_or(now),
            ctime: real_meta.modified().unwrap_or(now),
            crtime: real_meta.created().unwrap_or(now),
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        })
    }

    fn fuse_lookup(&self, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut index = self.index.lock();
        let Some(parent_path) = index.path_for_ino(parent).map(|p| p.to_vec()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut child_path = parent_path;
        child_path.push(name.to_string());

        match index.entry_kind(&child_path) {
            Some(EntryKind::Dir) => {
                let ino = index.ino_for_path(&child_path);
                reply.entry(&TTL, &self.dir_attr(ino), 0);
            }
            Some(EntryKind::File) => match self.file_attr(&mut index, &child_path) {
                Some(attr) => reply.entry(&TTL, &attr, 0),
                None => reply.error(libc::ENOENT),
            },
            None => reply.error(libc::ENOENT),
        }
    }

    fn fuse_getattr(&self, ino: u64, reply: ReplyAttr) {
        if ino == ROOT_INODE {
            reply.attr(&TTL, &self.dir_attr(ROOT_INODE));
            return;
        }
        let mut index = self.index.lock();
        let Some(path) = index.path_for_ino(ino).map(|p| p.to_vec()) else {
            reply.error(libc::ENOENT);
            return;
        };
        match index.entry_kind(&path) {
            Some(EntryKind::Dir) => reply.attr(&TTL, &self.dir_attr(ino)),
            Some(EntryKind::File) => match self.file_attr(&mut index, &path) {
                Some(attr) => reply.attr(&TTL, &attr),
                None => reply.error(libc::ENOENT),
            },
            None => reply.error(libc::ENOENT),
        }
    }

    fn fuse_readdir(&self, ino: u64, offset: i64, mut reply: ReplyDirectory) {
        let mut index = self.index.lock();
        let Some(path) = index.path_for_ino(ino).map(|p| p.to_vec()) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(children) = index.children(&path) else {
            reply.error(libc::ENOENT);
            return;
        };

        let parent_path = if path.is_empty() { Vec::new() } else { path[..path.len() - 1].to_vec() };
        let parent_ino = if parent_path.is_empty() {
            ROOT_INODE
        } else {
            index.existing_ino(&parent_path).unwrap_or(ROOT_INODE)
        };

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for (name, kind) in children {
            let mut child_path = path.clone();
            child_path.push(name.clone());
            match kind {
                EntryKind::Dir => {
                    let child_ino = index.ino_for_path(&child_path);
                    entries.push((child_ino, FileType::Directory, name));
                }
                EntryKind::File => {
                    if self.file_attr(&mut index, &child_path).is_some() {
                        let child_ino = index.ino_for_path(&child_path);
                        entries.push((child_ino, FileType::RegularFile, name));
                    }
                }
            }
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn fuse_open(&self, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_ino(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    /// The body of `open`, split out from its `fuser::Filesystem` glue so it
    /// can be exercised directly (with plain inodes and `libc` flag/errno
    /// values) without a real mounted FUSE session.
    fn open_ino(&self, ino: u64, flags: i32) -> std::result::Result<u64, libc::c_int> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(libc::EACCES);
        }

        let (path, checksum, item) = {
            let mut index = self.index.lock();
            let path = index.path_for_ino(ino).map(|p| p.to_vec()).ok_or(libc::ENOENT)?;
            let checksum = index.checksum_at(&path).ok_or(libc::ENOENT)?;
            let item = index.frozen_item(&checksum).cloned().ok_or(libc::ENOENT)?;
            (path, checksum, item)
        };

        let file_entry = item.file_entries.first().ok_or(libc::ENOENT)?;
        let ftag_entry = item
            .freezetag_entries
            .iter()
            .find(|e| e.virtual_path == path)
            .ok_or(libc::ENOENT)?;

        let real_size = std::fs::metadata(&file_entry.real_path)
            .map_err(|_| libc::ENOENT)?
            .len();

        let fuse_file = if ftag_entry.metadata_len == 0 {
            FuseFile::passthrough(file_entry.real_path.clone(), real_size).map_err(|_| libc::EIO)?
        } else {
            let freezetag = self.ref_cache.acquire(&ftag_entry.freezetag_path).map_err(|_| libc::EIO)?;
            let rel_path = index::relative_from_virtual(&ftag_entry.virtual_path);
            let frozen_entry = freezetag
                .frozen
                .files
                .iter()
                .find(|f| f.checksum == checksum && f.path == rel_path);

            let built = match frozen_entry.map(|e| &e.metadata) {
                Some(Metadata::Flac(m)) => {
                    FuseFile::for_flac(file_entry.real_path.clone(), real_size, file_entry.metadata_len, m)
                        .map_err(|_| ())
                }
                Some(Metadata::Mp3(m)) => FuseFile::for_mp3(
                    file_entry.real_path.clone(),
                    real_size,
                    &file_entry.metadata_info,
                    file_entry.metadata_len,
                    m,
                )
                .map_err(|_| ()),
                Some(Metadata::Generic) | None => {
                    FuseFile::passthrough(file_entry.real_path.clone(), real_size).map_err(|_| ())
                }
            };

            match built {
                Ok(f) => f,
                Err(()) => {
                    self.ref_cache.release(ftag_entry.freezetag_path.clone());
                    return Err(libc::EIO);
                }
            }
        };

        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        let freezetag_path = (ftag_entry.metadata_len != 0).then(|| ftag_entry.freezetag_path.clone());
        self.fh_table.lock().insert(fh, OpenHandle { file: fuse_file, freezetag_path });
        Ok(fh)
    }

    fn fuse_read(&self, fh: u64, offset: i64, size: u32, reply: ReplyData) {
        match self.read_fh(fh, offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    /// The body of `read`, split out the same way as [`Self::open_ino`].
    fn read_fh(&self, fh: u64, offset: u64, size: u32) -> std::result::Result<Vec<u8>, libc::c_int> {
        let table = self.fh_table.lock();
        match table.get(&fh) {
            Some(handle) => handle.file.read(offset, size).map_err(|_| libc::EIO),
            None => Err(libc::EBADF),
        }
    }

    fn fuse_release(&self, fh: u64, reply: ReplyEmpty) {
        self.release_fh(fh);
        reply.ok();
    }

    /// The body of `release`, split out the same way as [`Self::open_ino`].
    fn release_fh(&self, fh: u64) {
        let handle = self.fh_table.lock().remove(&fh);
        if let Some(handle) = handle {
            if let Some(path) = handle.freezetag_path {
                self.ref_cache.release(path);
            }
        }
    }
}

fn is_ftag_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("ftag"))
        .unwrap_or(false)
}

#[cfg(unix)]
fn file_key(meta: &std::fs::Metadata) -> (u32, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev() as u32, meta.ino())
}

#[cfg(not(unix))]
fn file_key(_meta: &std::fs::Metadata) -> (u32, u64) {
    (0, 0)
}

#[cfg(unix)]
fn mtime_seconds(meta: &std::fs::Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9
}

#[cfg(not(unix))]
fn mtime_seconds(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn checksum_cache_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "freezetag").map(|dirs| dirs.cache_dir().join("freezefs.db"))
}

/// Thin adapter implementing `fuser::Filesystem` over a shared
/// [`FreezeFsState`]; every method just delegates, since all the real state
/// lives behind `Arc` + interior mutability so the watcher thread can see
/// it too.
pub struct FreezeFs {
    state: Arc<FreezeFsState>,
}

impl Filesystem for FreezeFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> std::result::Result<(), libc::c_int> {
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.state.fuse_lookup(parent, name, reply);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        self.state.fuse_getattr(ino, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, reply: ReplyDirectory) {
        self.state.fuse_readdir(ino, offset, reply);
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.state.fuse_open(ino, flags, reply);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.state.fuse_read(fh, offset, size, reply);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.state.fuse_release(fh, reply);
    }
}

/// Mounts `directory`'s thawed view at `mountpoint`: one full synchronous
/// scan, a watcher to keep the index coherent afterward, then a blocking
/// single-threaded FUSE loop (§5's "FUSE is mounted single-threaded"). Only
/// returns once the filesystem is unmounted.
pub fn mount(directory: &Path, mountpoint: &Path, options: &MountOptions) -> Result<()> {
    if !directory.exists() {
        return Err(MountError::InputNotFound(directory.to_path_buf()));
    }
    let directory = directory.canonicalize()?;

    let cache_path = checksum_cache_path();
    let checksum_cache = match &cache_path {
        Some(path) => ChecksumCache::open(path),
        None => ChecksumCache::open(directory.join(".freezefs.db")),
    };

    let state = FreezeFsState::new(directory.clone(), checksum_cache);

    if options.verbose {
        info!("scanning {} before mount", directory.display());
    }
    state.initial_scan()?;

    let _watcher = spawn_watcher(state.clone(), directory.clone())?;

    let fuse_options = vec![MountOption::RO, MountOption::FSName("freezetag".to_string())];
    fuser::mount2(FreezeFs { state }, mountpoint, &fuse_options).map_err(|e| MountError::Fuse {
        mountpoint: mountpoint.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Exercises the splice path end to end without a real FUSE mount: `fuser`'s
/// `Reply*` types are only constructible from inside a live kernel session,
/// so these tests drive `FreezeFsState` through the plain-data methods
/// (`open_ino`/`read_fh`) `fuse_open`/`fuse_read` are thin wrappers around,
/// per spec §8 testable property 6.
#[cfg(test)]
mod splice_tests {
    use super::*;
    use freezetag_engine::{freeze, shave, FreezeOptions};

    fn write_flac_block(out: &mut Vec<u8>, last: bool, block_type: u8, data: &[u8]) {
        let first = ((last as u8) << 7) | block_type;
        out.push(first);
        let size = data.len() as u32;
        out.extend_from_slice(&size.to_be_bytes()[1..]);
        out.extend_from_slice(data);
    }

    /// `"fLaC" || STREAMINFO || VORBIS_COMMENT(comment) || audio`, the same
    /// shape `freezetag-format::flac`'s own tests build.
    fn sample_flac(comment: &[u8], audio: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"fLaC");
        write_flac_block(&mut bytes, comment.is_empty(), 0, &[0u8; 34]);
        if !comment.is_empty() {
            write_flac_block(&mut bytes, true, 4, comment);
        }
        bytes.extend_from_slice(audio);
        bytes
    }

    fn virtual_path_for(root: &Path, rel: &[&str]) -> Vec<String> {
        let mut path = vec![root.file_name().unwrap().to_string_lossy().to_string()];
        path.extend(rel.iter().map(|s| s.to_string()));
        path
    }

    #[test]
    fn open_and_read_reproduces_the_original_file_across_whole_and_chunked_reads() {
        let root = tempfile::tempdir().unwrap();
        let album_dir = root.path().join("album");
        std::fs::create_dir_all(&album_dir).unwrap();
        let track_path = album_dir.join("track.flac");

        let audio: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let original = sample_flac(b"title=Sample Track", &audio);
        std::fs::write(&track_path, &original).unwrap();

        // freeze the tagged file, then shave it in place so the backing
        // file on disk matches what a real deployment would mount: bare
        // stripped audio plus a sidecar carrying the tags.
        freeze(root.path(), &FreezeOptions::default()).unwrap();
        shave(root.path()).unwrap();
        assert_ne!(std::fs::read(&track_path).unwrap(), original);

        let cache_dir = tempfile::tempdir().unwrap();
        let checksum_cache = ChecksumCache::open(cache_dir.path().join("freezefs.db"));
        let canonical_root = root.path().canonicalize().unwrap();
        let state = FreezeFsState::new(canonical_root.clone(), checksum_cache);
        state.initial_scan().unwrap();

        let virtual_path = virtual_path_for(&canonical_root, &["album", "track.flac"]);
        let ino = {
            let index = state.index.lock();
            index
                .existing_ino(&virtual_path)
                .expect("track.flac should be indexed by the initial scan")
        };

        let fh = state.open_ino(ino, libc::O_RDONLY).expect("open should succeed");

        let whole = state
            .read_fh(fh, 0, original.len() as u32 + 64)
            .expect("a single large read should succeed");
        assert_eq!(whole, original);

        // chunked reads at a mix of 4KB-ish and misaligned offsets
        let mut reassembled = Vec::new();
        let mut offset = 0u64;
        let chunk_sizes = [4096u32, 17, 4096, 4096, 4096, 4096];
        let mut i = 0;
        while (offset as usize) < original.len() {
            let size = chunk_sizes[i % chunk_sizes.len()];
            i += 1;
            let chunk = state.read_fh(fh, offset, size).expect("chunked read should succeed");
            if chunk.is_empty() {
                break;
            }
            reassembled.extend_from_slice(&chunk);
            offset += chunk.len() as u64;
        }
        assert_eq!(reassembled, original);

        let attr = {
            let mut index = state.index.lock();
            state
                .file_attr(&mut index, &virtual_path)
                .expect("getattr should resolve the thawed file")
        };
        assert_eq!(attr.size, original.len() as u64);

        state.release_fh(fh);
    }
}
