//! The `.ftag` wire format: `"freezetag" | version | frozen-body`, where the
//! frozen body's `files` array is LZMA-compressed and length-prefixed. See
//! <https://xiph.org/flac/format.html> for nothing in particular — this
//! module's layout instead follows `freezetag/core.py`'s `construct` grammar
//! (`FreezeFormat`/`FrozenFormatV1`/`FrozenFormatV2`) field for field.

use crate::error::{ContainerError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use freezetag_common::decode;
use freezetag_format::{FileFormat, Metadata};
use sha1::{Digest, Sha1};
use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::path::Path;

const SIGNATURE: &[u8] = b"freezetag";

/// Highest freezetag wire version this crate can decode. `freezetag-engine`
/// compares a freezetag's `version` against this before trusting its
/// contents, raising its own `VersionTooNew` rather than letting a parse
/// failure surface first.
pub const MAX_VERSION: u8 = 2;

/// Whether a freezetag was produced by a normal `freeze` or a `freeze
/// --backup` run. Only `Backup` carries per-file [`FileStat`] so unchanged
/// files can skip rehashing on the next backup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default = 0,
    Backup = 1,
}

impl Mode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Mode::Default),
            1 => Ok(Mode::Backup),
            other => Err(ContainerError::BadMode(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Backup => "backup",
        }
    }
}

/// `(mtime, size)` of a file at the time it was frozen, present only on
/// version-2 backup freezetags. Used by `freeze --backup` to reuse a prior
/// entry verbatim instead of rehashing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub mtime: f64,
    pub size: u64,
}

impl FileStat {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(FileStat {
            mtime: r.read_f64::<BigEndian>()?,
            size: r.read_u64::<BigEndian>()?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_f64::<BigEndian>(self.mtime)?;
        w.write_u64::<BigEndian>(self.size)?;
        Ok(())
    }
}

/// One file's entry in a freezetag: its relative path, format, stripped
/// audio checksum, optional backup-mode stat, and the format-specific
/// metadata needed to restore it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenFileEntry {
    /// Relative path with forward slashes, as specified in §3.
    pub path: String,
    pub format: FileFormat,
    pub checksum: [u8; 20],
    pub stat: Option<FileStat>,
    pub metadata: Metadata,
}

impl FrozenFileEntry {
    fn write<W: Write>(&self, w: &mut W, mode: Mode) -> Result<()> {
        write_cstring(w, &self.path)?;
        w.write_u8(self.format.id())?;
        w.write_all(&self.checksum)?;
        if let Mode::Backup = mode {
            let stat = self
                .stat
                .expect("backup-mode entries always carry a stat");
            stat.write(w)?;
        }
        w.write_all(&self.metadata.to_bytes())?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R, mode: Mode) -> Result<Self> {
        let path = decode::take_cstring(r)?;
        let format = FileFormat::from_id(decode::u8(r)?)?;
        let checksum = read_array::<_, 20>(r)?;
        let stat = match mode {
            Mode::Backup => Some(FileStat::read(r)?),
            Mode::Default => None,
        };
        let metadata = Metadata::from_reader(format, r)?;
        Ok(FrozenFileEntry {
            path,
            format,
            checksum,
            stat,
            metadata,
        })
    }
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let bytes = decode::take(r, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

fn write_cstring<W: Write>(w: &mut W, s: &str) -> Result<()> {
    w.write_all(s.as_bytes())?;
    w.write_u8(0)?;
    Ok(())
}

/// The frozen state of a directory: the two short audio/metadata digests
/// used for the freezetag ID, the root directory name, and every file's
/// entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Frozen {
    pub mode: Mode,
    pub music_checksum: [u8; 8],
    pub metadata_checksum: [u8; 4],
    pub root: String,
    pub files: Vec<FrozenFileEntry>,
}

impl Frozen {
    /// `music_checksum = SHA-1(sorted(checksums))[0:8]`, as specified in §3.
    pub fn compute_music_checksum(checksums: &mut [[u8; 20]]) -> [u8; 8] {
        checksums.sort_unstable();
        let mut hasher = Sha1::new();
        for c in checksums.iter() {
            hasher.update(c);
        }
        let digest: [u8; 20] = hasher.finalize().into();
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[0..8]);
        out
    }

    /// `metadata_checksum = SHA-1(sorted(checksums))[0:4]`, as specified in
    /// §3.
    pub fn compute_metadata_checksum(checksums: &mut [[u8; 20]]) -> [u8; 4] {
        checksums.sort_unstable();
        let mut hasher = Sha1::new();
        for c in checksums.iter() {
            hasher.update(c);
        }
        let digest: [u8; 20] = hasher.finalize().into();
        let mut out = [0u8; 4];
        out.copy_from_slice(&digest[0..4]);
        out
    }

    fn write<W: Write>(&self, w: &mut W, version: u8) -> Result<()> {
        if version == 2 {
            w.write_u8(self.mode as u8)?;
        }
        w.write_all(&self.music_checksum)?;
        w.write_all(&self.metadata_checksum)?;
        write_cstring(w, &self.root)?;

        let mut files_buf = Vec::new();
        files_buf.write_u16::<BigEndian>(self.files.len() as u16)?;
        for file in &self.files {
            file.write(&mut files_buf, self.mode)?;
        }
        let compressed = lzma_compress(&files_buf)?;
        w.write_all(&compressed)?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R, version: u8) -> Result<Self> {
        let mode = match version {
            1 => Mode::Default,
            2 => Mode::from_u8(decode::u8(r)?)?,
            other => return Err(ContainerError::UnsupportedVersion(other)),
        };
        let music_checksum = read_array::<_, 8>(r)?;
        let metadata_checksum = read_array::<_, 4>(r)?;
        let root = decode::take_cstring(r)?;

        let compressed = decode::take_to_end(r)?;
        let files_buf = lzma_decompress(&compressed)?;
        let mut cursor = Cursor::new(files_buf);
        let count = cursor.read_u16::<BigEndian>()?;
        let mut files = Vec::with_capacity(count as usize);
        for _ in 0..count {
            files.push(FrozenFileEntry::read(&mut cursor, mode)?);
        }

        Ok(Frozen {
            mode,
            music_checksum,
            metadata_checksum,
            root,
            files,
        })
    }
}

fn lzma_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out).map_err(|_| ContainerError::Lzma)?;
    Ok(out)
}

fn lzma_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut out).map_err(|_| ContainerError::Lzma)?;
    Ok(out)
}

/// A read-only summary of a freezetag's contents, for `show`: see
/// `original_source/freezetag/commands.py::show`.
#[derive(Debug, Clone)]
pub struct FreezetagSummary {
    pub version: u8,
    pub mode: &'static str,
    pub id: String,
    pub root: String,
    pub files: Vec<(String, [u8; 20])>,
}

/// A parsed freezetag. Bytes are built once and memoized; call
/// [`Freezetag::invalidate`] after mutating [`Freezetag::frozen`] directly.
pub struct Freezetag {
    pub version: u8,
    pub frozen: Frozen,
    bytes: RefCell<Option<Vec<u8>>>,
}

impl Freezetag {
    pub fn new(version: u8, frozen: Frozen) -> Self {
        Freezetag {
            version,
            frozen,
            bytes: RefCell::new(None),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let signature = decode::take(&mut cursor, SIGNATURE.len())?;
        if signature != SIGNATURE {
            return Err(ContainerError::BadSignature);
        }
        let version = decode::u8(&mut cursor)?;
        let frozen = Frozen::read(&mut cursor, version)?;

        if (cursor.position() as usize) != bytes.len() {
            return Err(ContainerError::TrailingBytes);
        }

        let freezetag = Freezetag::new(version, frozen);
        *freezetag.bytes.borrow_mut() = Some(bytes.to_vec());
        Ok(freezetag)
    }

    /// Reads just the signature and version byte, without attempting to
    /// decode the frozen body. Lets a caller (e.g. `freezetag-engine`)
    /// reject a too-new freezetag with its own error before a full decode
    /// would fail on an unrecognized body layout.
    pub fn peek_version(bytes: &[u8]) -> Result<u8> {
        let mut cursor = Cursor::new(bytes);
        let signature = decode::take(&mut cursor, SIGNATURE.len())?;
        if signature != SIGNATURE {
            return Err(ContainerError::BadSignature);
        }
        Ok(decode::u8(&mut cursor)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Invalidate the memoized byte representation after `self.frozen` has
    /// been mutated directly.
    pub fn invalidate(&self) {
        *self.bytes.borrow_mut() = None;
    }

    /// The serialized bytes of this freezetag, building and memoizing them
    /// on first access.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        if self.bytes.borrow().is_none() {
            let mut buf = Vec::new();
            buf.extend_from_slice(SIGNATURE);
            buf.write_u8(self.version)?;
            self.frozen.write(&mut buf, self.version)?;
            *self.bytes.borrow_mut() = Some(buf);
        }
        Ok(self.bytes.borrow().as_ref().unwrap().clone())
    }

    /// `"F" + hex(music_checksum) + "-" + hex(metadata_checksum) + "-" +
    /// hex(SHA-1(bytes)[0:4])`, as specified in §3. Pure function of
    /// [`Freezetag::bytes`].
    pub fn get_id(&self) -> Result<String> {
        let bytes = self.bytes()?;
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        let digest: [u8; 20] = hasher.finalize().into();
        Ok(format!(
            "F{}-{}-{}",
            hex::encode(self.frozen.music_checksum),
            hex::encode(self.frozen.metadata_checksum),
            hex::encode(&digest[0..4]),
        ))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.bytes()?)?;
        Ok(())
    }

    pub fn summary(&self) -> Result<FreezetagSummary> {
        Ok(FreezetagSummary {
            version: self.version,
            mode: self.frozen.mode.name(),
            id: self.get_id()?,
            root: self.frozen.root.clone(),
            files: self
                .frozen
                .files
                .iter()
                .map(|f| (f.path.clone(), f.checksum))
                .collect(),
        })
    }
}
