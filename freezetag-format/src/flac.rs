//! FLAC container parsing: splits a file into an opaque audio tail plus an
//! ordered sequence of metadata blocks, per the layout at
//! <https://xiph.org/flac/format.html>.

use crate::error::{FormatError, Result};
use freezetag_common::decode;
use sha1::{Digest, Sha1};
use std::cell::{RefCell, RefMut};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8] = b"fLaC";
const STREAMINFO_BLOCK_TYPE: u8 = 0;

const BLOCK_TYPE_NAMES: [&str; 7] = [
    "STREAMINFO",
    "PADDING",
    "APPLICATION",
    "SEEKTABLE",
    "VORBIS_COMMENT",
    "CUESHEET",
    "PICTURE",
];

/// Human-readable name for a METADATA_BLOCK type index, falling back to
/// `"INVALID"` for the reserved/unused range (7-126) and the forbidden
/// 127 value.
pub fn block_type_name(block_type: u8) -> &'static str {
    BLOCK_TYPE_NAMES
        .get(block_type as usize)
        .copied()
        .unwrap_or("INVALID")
}

/// One `METADATA_BLOCK`: a 1-byte `last|type` header, a 24-bit big-endian
/// size, and `size` bytes of opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacBlock {
    pub last: bool,
    pub block_type: u8,
    pub data: Vec<u8>,
}

impl FlacBlock {
    /// Body length in bytes, exclusive of the 4-byte block header. This is
    /// the definition used consistently for both UI-facing reporting and
    /// mount metadata-length bookkeeping.
    pub fn reported_size(&self) -> u32 {
        self.data.len() as u32
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let first = decode::u8(reader)?;
        let last = first & 0b1000_0000 != 0;
        let block_type = first & 0b0111_1111;
        let size = decode::u24_be(reader)?;
        let data = decode::take(reader, size as usize)?;
        Ok(FlacBlock {
            last,
            block_type,
            data,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let first = ((self.last as u8) << 7) | (self.block_type & 0b0111_1111);
        w.write_all(&[first])?;
        let size = self.data.len() as u32;
        w.write_all(&size.to_be_bytes()[1..])?;
        w.write_all(&self.data)
    }

    /// Raw on-disk bytes of this block (header + body), as it appears in a
    /// live FLAC file. Public so `freezetag-fs` can splice blocks directly
    /// into a virtual file without going through the frozen wire format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        self.write(w)
    }
}

/// The non-STREAMINFO metadata blocks stripped from a FLAC file, in their
/// original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlacMetadata {
    pub blocks: Vec<FlacBlock>,
}

impl FlacMetadata {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// `(block type name, reported size)` for each block, in order. Used by
    /// `shave`/`show` to summarize what was stripped.
    pub fn report(&self) -> Vec<(&'static str, u32)> {
        self.blocks
            .iter()
            .map(|b| (block_type_name(b.block_type), b.reported_size()))
            .collect()
    }

    /// Sum of per-block reported (header-exclusive) sizes, as used for mount
    /// `metadata_len` bookkeeping.
    pub fn metadata_len(&self) -> u32 {
        self.blocks.iter().map(|b| b.reported_size()).sum()
    }

    /// Serializes this block list as `count:u8 | MetaBlock*`, the format
    /// carried inside a `FrozenFileEntry`'s metadata for `format==1`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.blocks.len() * 8);
        buf.push(self.blocks.len() as u8);
        for block in &self.blocks {
            block.write(&mut buf).expect("writing to a Vec never fails");
        }
        buf
    }

    /// Parses `count:u8 | MetaBlock*` directly off a shared reader, so a
    /// caller walking a larger stream (e.g. a freezetag's file list) can
    /// read exactly the bytes belonging to this entry and no more.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let count = decode::u8(reader)?;
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            blocks.push(FlacBlock::read(reader)?);
        }
        Ok(FlacMetadata { blocks })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(&mut Cursor::new(bytes))
    }

    /// Raw concatenated block bytes (header + body per block, no leading
    /// count), as they sit after STREAMINFO in a live FLAC file — distinct
    /// from [`to_bytes`](Self::to_bytes)'s count-prefixed wire form stored
    /// inside a frozen file entry. Used by `freezetag-fs` to splice frozen
    /// metadata back onto stripped audio without re-parsing anything.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for block in &self.blocks {
            block
                .write_to(&mut buf)
                .expect("writing to a Vec never fails");
        }
        buf
    }

    /// SHA-1 of [`to_bytes`](Self::to_bytes); this is the per-file
    /// contribution to a freezetag's `metadata_checksum`.
    pub fn checksum(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }
}

struct FlacInstance {
    streaminfo: FlacBlock,
    blocks: Vec<FlacBlock>,
    audio: Vec<u8>,
}

impl FlacInstance {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let magic = decode::take(&mut cursor, MAGIC.len())?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagicNumber);
        }

        let streaminfo = FlacBlock::read(&mut cursor)?;
        if streaminfo.block_type != STREAMINFO_BLOCK_TYPE {
            return Err(FormatError::InvalidFirstBlock);
        }

        let mut blocks = Vec::new();
        let mut is_last = streaminfo.last;
        while !is_last {
            let block = FlacBlock::read(&mut cursor)?;
            is_last = block.last;
            blocks.push(block);
        }

        let audio = decode::take_to_end(&mut cursor)?;
        Ok(FlacInstance {
            streaminfo,
            blocks,
            audio,
        })
    }

    fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAGIC.len() + 42 + self.audio.len());
        out.extend_from_slice(MAGIC);
        self.streaminfo
            .write(&mut out)
            .expect("writing to a Vec never fails");
        for block in &self.blocks {
            block.write(&mut out).expect("writing to a Vec never fails");
        }
        out.extend_from_slice(&self.audio);
        out
    }

    /// Bytes of the stripped instance: `"fLaC" || STREAMINFO{last=true} ||
    /// audio`, independent of whatever blocks are currently attached. This is
    /// what `checksum()` hashes, so tag edits never change it.
    fn build_stripped(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAGIC.len() + 42 + self.audio.len());
        out.extend_from_slice(MAGIC);
        let mut streaminfo = self.streaminfo.clone();
        streaminfo.last = true;
        streaminfo
            .write(&mut out)
            .expect("writing to a Vec never fails");
        out.extend_from_slice(&self.audio);
        out
    }
}

/// A parsed FLAC file: a lazily-built, memoized instance over bytes read
/// once from `path`. `strip`/`restore` mutate the in-memory metadata block
/// list; `checksum` is unaffected by either.
pub struct FlacFile {
    path: PathBuf,
    instance: RefCell<Option<FlacInstance>>,
}

impl FlacFile {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        FlacFile {
            path: path.as_ref().to_path_buf(),
            instance: RefCell::new(None),
        }
    }

    fn instance(&self) -> Result<RefMut<'_, FlacInstance>> {
        if self.instance.borrow().is_none() {
            let bytes = std::fs::read(&self.path)?;
            let parsed = FlacInstance::parse(&bytes)?;
            *self.instance.borrow_mut() = Some(parsed);
        }
        Ok(RefMut::map(self.instance.borrow_mut(), |o| {
            o.as_mut().unwrap()
        }))
    }

    pub fn strip(&self) -> Result<FlacMetadata> {
        let mut instance = self.instance()?;
        instance.streaminfo.last = true;
        let blocks = std::mem::take(&mut instance.blocks);
        Ok(FlacMetadata { blocks })
    }

    pub fn restore(&self, metadata: &FlacMetadata) -> Result<()> {
        let mut instance = self.instance()?;
        instance.streaminfo.last = metadata.is_empty();
        instance.blocks = metadata.blocks.clone();
        Ok(())
    }

    pub fn checksum(&self) -> Result<[u8; 20]> {
        let instance = self.instance()?;
        let mut hasher = Sha1::new();
        hasher.update(instance.build_stripped());
        Ok(hasher.finalize().into())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let instance = self.instance()?;
        std::fs::write(path, instance.build())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn minimal_streaminfo_body() -> Vec<u8> {
        // 34-byte STREAMINFO body; contents are opaque to us.
        vec![0u8; 34]
    }

    fn write_block(out: &mut Vec<u8>, last: bool, block_type: u8, data: &[u8]) {
        let first = ((last as u8) << 7) | block_type;
        out.push(first);
        let size = data.len() as u32;
        out.extend_from_slice(&size.to_be_bytes()[1..]);
        out.extend_from_slice(data);
    }

    fn sample_flac(comment: &[u8], audio: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        write_block(&mut bytes, comment.is_empty(), 0, &minimal_streaminfo_body());
        if !comment.is_empty() {
            write_block(&mut bytes, true, 4, comment);
        }
        bytes.extend_from_slice(audio);
        bytes
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn strip_then_restore_round_trips_bytes() {
        let original = sample_flac(b"title=X", b"audiobytesaudiobytes");
        let tmp = write_temp(&original);
        let file = FlacFile::from_path(tmp.path());

        let metadata = file.strip().unwrap();
        assert_eq!(metadata.report(), vec![("VORBIS_COMMENT", 7)]);

        file.restore(&metadata).unwrap();
        let instance = file.instance().unwrap();
        assert_eq!(instance.build(), original);
    }

    #[test]
    fn strip_is_idempotent() {
        let original = sample_flac(b"title=X", b"audio");
        let tmp = write_temp(&original);
        let file = FlacFile::from_path(tmp.path());

        let first = file.strip().unwrap();
        let second = file.strip().unwrap();
        assert!(second.is_empty());
        assert_ne!(first, second);
    }

    #[test]
    fn checksum_is_unchanged_by_tag_edits() {
        let with_x = sample_flac(b"title=X", b"sameaudio");
        let with_y = sample_flac(b"title=Y", b"sameaudio");

        let file_x = FlacFile::from_path(write_temp(&with_x).path());
        let file_y = FlacFile::from_path(write_temp(&with_y).path());

        assert_eq!(file_x.checksum().unwrap(), file_y.checksum().unwrap());
    }

    #[test]
    fn checksum_changes_with_audio() {
        let a = sample_flac(b"title=X", b"audio-a");
        let b = sample_flac(b"title=X", b"audio-b");

        let file_a = FlacFile::from_path(write_temp(&a).path());
        let file_b = FlacFile::from_path(write_temp(&b).path());

        assert_ne!(file_a.checksum().unwrap(), file_b.checksum().unwrap());
    }

    #[test]
    fn no_metadata_round_trips() {
        let original = sample_flac(b"", b"audio-only");
        let tmp = write_temp(&original);
        let file = FlacFile::from_path(tmp.path());

        let metadata = file.strip().unwrap();
        assert!(metadata.is_empty());
        file.restore(&metadata).unwrap();
        assert_eq!(file.instance().unwrap().build(), original);
    }

    #[test]
    fn metadata_wire_round_trips() {
        let mut metadata = FlacMetadata::default();
        metadata.blocks.push(FlacBlock {
            last: false,
            block_type: 2,
            data: b"appdata".to_vec(),
        });
        metadata.blocks.push(FlacBlock {
            last: true,
            block_type: 4,
            data: b"title=X".to_vec(),
        });

        let bytes = metadata.to_bytes();
        let decoded = FlacMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn rejects_bad_magic() {
        let file = FlacFile::from_path(write_temp(b"notflac").path());
        match file.strip() {
            Err(FormatError::InvalidMagicNumber) => {}
            other => panic!("expected InvalidMagicNumber, got {other:?}"),
        }
    }
}
