//! The mount-time checksum cache: a persistent `(device, inode, mtime) ->
//! (checksum, metadata layout)` mapping so repeated mounts don't re-parse
//! unchanged files. Grounded on `original_source/freezetag/core.py`'s
//! `ChecksumDB`/`ChecksumDBAdapter`.

use crate::error::Result;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use freezetag_common::decode;
use log::warn;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

const DB_VERSION: u8 = 1;

/// Key into the cache: a file's device and inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub device: u32,
    pub inode: u64,
}

/// A cached file's checksum and metadata layout, keyed by `(device, inode)`
/// and validated against `mtime` on lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub mtime: f64,
    pub checksum: [u8; 20],
    pub metadata_len: u32,
    /// `(region/block label, reported size)`, e.g. `("head-ID3v2.3", 128)` —
    /// see [`freezetag_format::mp3::Mp3Metadata::metadata_info`].
    pub metadata_info: Vec<(String, u32)>,
}

/// A buffered on-disk mapping; writes are flushed every 50 mutations and on
/// explicit [`ChecksumCache::flush`], per §4.C.
pub struct ChecksumCache {
    path: PathBuf,
    entries: HashMap<FileKey, CacheEntry>,
    dirty_count: u32,
}

impl ChecksumCache {
    /// Opens the cache at `path`. A missing or corrupt file is not an
    /// error: this starts an empty in-memory map and logs a warning,
    /// mirroring `ChecksumDB.__init__`'s bare `except`.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match decode_entries(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("checksum cache at {} is corrupt, starting fresh: {e}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => {
                warn!("no existing checksum cache at {}, creating one", path.display());
                HashMap::new()
            }
        };
        ChecksumCache {
            path,
            entries,
            dirty_count: 0,
        }
    }

    /// Looks up `(device, inode)`. A mismatched `mtime` is treated as a
    /// miss, per §4.C.
    pub fn get(&self, device: u32, inode: u64, mtime: f64) -> Option<&CacheEntry> {
        let entry = self.entries.get(&FileKey { device, inode })?;
        if entry.mtime != mtime {
            return None;
        }
        Some(entry)
    }

    pub fn add(
        &mut self,
        device: u32,
        inode: u64,
        mtime: f64,
        checksum: [u8; 20],
        metadata_info: Vec<(String, u32)>,
        metadata_len: u32,
    ) {
        self.entries.insert(
            FileKey { device, inode },
            CacheEntry {
                mtime,
                checksum,
                metadata_len,
                metadata_info,
            },
        );
        self.dirty_count += 1;
        if self.dirty_count >= 50 {
            if let Err(e) = self.flush() {
                warn!("failed to flush checksum cache: {e}");
            }
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.dirty_count = 0;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = encode_entries(&self.entries)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

fn encode_entries(entries: &HashMap<FileKey, CacheEntry>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u8(DB_VERSION)?;
    for (key, entry) in entries {
        buf.write_u32::<BigEndian>(key.device)?;
        buf.write_u64::<BigEndian>(key.inode)?;
        buf.write_f64::<BigEndian>(entry.mtime)?;
        buf.write_all(&entry.checksum)?;
        buf.write_u32::<BigEndian>(entry.metadata_len)?;
        buf.write_u8(entry.metadata_info.len() as u8)?;
        for (label, size) in &entry.metadata_info {
            buf.write_all(label.as_bytes())?;
            buf.write_u8(0)?;
            buf.write_u32::<BigEndian>(*size)?;
        }
    }
    Ok(buf)
}

fn decode_entries(bytes: &[u8]) -> Result<HashMap<FileKey, CacheEntry>> {
    let mut cursor = Cursor::new(bytes);
    let version = decode::u8(&mut cursor)?;
    if version != DB_VERSION {
        return Err(crate::error::ContainerError::UnsupportedVersion(version));
    }

    let mut entries = HashMap::new();
    loop {
        let device = match cursor.read_u32::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let inode = cursor.read_u64::<BigEndian>()?;
        let mtime = cursor.read_f64::<BigEndian>()?;
        let checksum = {
            let bytes = decode::take(&mut cursor, 20)?;
            let mut arr = [0u8; 20];
            arr.copy_from_slice(&bytes);
            arr
        };
        let metadata_len = cursor.read_u32::<BigEndian>()?;
        let count = decode::u8(&mut cursor)?;
        let mut metadata_info = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let label = decode::take_cstring(&mut cursor)?;
            let size = cursor.read_u32::<BigEndian>()?;
            metadata_info.push((label, size));
        }
        entries.insert(
            FileKey { device, inode },
            CacheEntry {
                mtime,
                checksum,
                metadata_len,
                metadata_info,
            },
        );
    }
    Ok(entries)
}
