//! Splices frozen metadata back onto stripped backing audio without ever
//! writing a thawed copy to disk: a virtual file's bytes are a short list
//! of regions, each either held in memory (a frozen tag) or sliced
//! straight out of the real file on read. Grounded on the FUSE `open`/
//! `read` description in this crate's design notes and cross-checked
//! against the real-size formula `getattr` already uses, since no
//! `FuseFile`-equivalent source survived in `original_source/`.

use freezetag_format::flac::FlacMetadata;
use freezetag_format::mp3::Mp3Metadata;
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

#[derive(Debug, Clone)]
enum Region {
    Mem(Vec<u8>),
    Disk { offset: u64, len: u64 },
}

impl Region {
    fn len(&self) -> u64 {
        match self {
            Region::Mem(bytes) => bytes.len() as u64,
            Region::Disk { len, .. } => *len,
        }
    }
}

/// A read-only view that presents a thawed file without materializing it:
/// `total_len()` is the virtual size `getattr` reports, and `read` walks
/// `regions` to answer any `(offset, size)` request.
///
/// The backing `File` is opened once, when the handle is created, and kept
/// for the handle's whole lifetime rather than reopened from `real_path` on
/// every `read`: an open file descriptor stays valid after its path is
/// renamed away from under it (it only goes away once the file is actually
/// unlinked), and a FUSE handle must survive exactly that rename.
pub struct FuseFile {
    file: RefCell<File>,
    regions: Vec<Region>,
}

impl FuseFile {
    /// A file untouched by any format (or one whose frozen metadata is
    /// empty): the virtual file is just the real file, unchanged.
    pub fn passthrough(real_path: PathBuf, file_size: u64) -> io::Result<Self> {
        let file = File::open(&real_path)?;
        Ok(FuseFile {
            file: RefCell::new(file),
            regions: vec![Region::Disk { offset: 0, len: file_size }],
        })
    }

    /// `real_path`'s own STREAMINFO is always kept verbatim on disk except
    /// for its `last` bit (it isn't part of the stripped metadata); only
    /// the blocks after it are frozen, so the backing slice for "rest of
    /// file" starts right where the real file's own metadata block run
    /// ends. The on-disk copy was stripped, so its STREAMINFO always has
    /// `last=1`; that bit must flip back to `0` whenever frozen metadata
    /// follows, or a reader would stop parsing blocks right after
    /// STREAMINFO and treat the frozen bytes as audio.
    pub fn for_flac(
        real_path: PathBuf,
        file_size: u64,
        real_metadata_len: u32,
        frozen: &FlacMetadata,
    ) -> io::Result<Self> {
        // 4-byte magic + 4-byte STREAMINFO header + 34-byte STREAMINFO body,
        // all always present and never stripped.
        const HEAD_LEN: u64 = 4 + 4 + 34;
        const LAST_BYTE_OFFSET: usize = 4;

        let mut file = File::open(&real_path)?;
        let mut patched_head = vec![0u8; LAST_BYTE_OFFSET + 1];
        file.read_exact(&mut patched_head)?;
        file.seek(SeekFrom::Start(0))?;

        if frozen.is_empty() {
            patched_head[LAST_BYTE_OFFSET] |= 0b1000_0000;
        } else {
            patched_head[LAST_BYTE_OFFSET] &= 0b0111_1111;
        }

        let mut regions = vec![Region::Mem(patched_head)];
        regions.push(Region::Disk {
            offset: (LAST_BYTE_OFFSET + 1) as u64,
            len: HEAD_LEN - (LAST_BYTE_OFFSET + 1) as u64,
        });
        regions.push(Region::Mem(frozen.raw_bytes()));
        let audio_offset = HEAD_LEN + real_metadata_len as u64;
        let audio_len = file_size.saturating_sub(audio_offset);
        regions.push(Region::Disk { offset: audio_offset, len: audio_len });
        Ok(FuseFile { file: RefCell::new(file), regions })
    }

    /// `original_head_len` is read off the cached `metadata_info` for the
    /// real file (scanning for the entry whose label starts with
    /// `"head-ID3v2"`), not re-parsed from the file itself, matching how
    /// the checksum cache already stores exactly that information.
    ///
    /// The audio region's length is `real file size - real file's own
    /// metadata length`: the true on-disk audio byte count is invariant
    /// across re-tagging, so it must come from the *current* file's own
    /// bookkeeping rather than the frozen entry's, which is what makes the
    /// splice's total length agree with `getattr`'s `real_size +
    /// (frozen_len - file_len)` adjustment algebraically.
    pub fn for_mp3(
        real_path: PathBuf,
        file_size: u64,
        real_metadata_info: &[(String, u32)],
        real_metadata_len: u32,
        frozen: &Mp3Metadata,
    ) -> io::Result<Self> {
        let file = File::open(&real_path)?;
        let mut regions = Vec::new();
        if let Some(head) = &frozen.head {
            regions.push(Region::Mem(head.raw().to_vec()));
        }

        let original_head_len = real_metadata_info
            .iter()
            .find(|(label, _)| label.starts_with("head-ID3v2"))
            .map(|(_, reported_size)| 10 + *reported_size as u64)
            .unwrap_or(0);
        let audio_len = file_size.saturating_sub(real_metadata_len as u64);
        regions.push(Region::Disk { offset: original_head_len, len: audio_len });

        if let Some(tail) = &frozen.tail {
            regions.push(Region::Mem(tail.raw().to_vec()));
        }
        if let Some(v1) = &frozen.v1 {
            regions.push(Region::Mem(v1.as_ref().to_vec()));
        }
        Ok(FuseFile { file: RefCell::new(file), regions })
    }

    pub fn total_len(&self) -> u64 {
        self.regions.iter().map(Region::len).sum()
    }

    /// Reads up to `size` bytes starting at `offset`, walking regions in
    /// order, skipping those fully before `offset` and stopping once
    /// enough bytes have been collected.
    pub fn read(&self, offset: u64, size: u32) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size as usize);
        let mut remaining_offset = offset;
        let mut remaining = size as u64;

        for region in &self.regions {
            if remaining == 0 {
                break;
            }
            let region_len = region.len();
            if remaining_offset >= region_len {
                remaining_offset -= region_len;
                continue;
            }

            let start = remaining_offset;
            let take = (region_len - start).min(remaining);
            match region {
                Region::Mem(bytes) => {
                    out.extend_from_slice(&bytes[start as usize..(start + take) as usize]);
                }
                Region::Disk { offset: disk_offset, .. } => {
                    let mut f = self.file.borrow_mut();
                    f.seek(SeekFrom::Start(disk_offset + start))?;
                    let mut buf = vec![0u8; take as usize];
                    f.read_exact(&mut buf)?;
                    out.extend_from_slice(&buf);
                }
            }

            remaining -= take;
            remaining_offset = 0;
        }

        Ok(out)
    }
}
