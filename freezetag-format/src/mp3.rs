//! MP3 container parsing: detaches the optional ID3v2 head, ID3v2 tail and
//! ID3v1 regions surrounding the raw audio frames, treating each region as
//! opaque bytes (no frame-level decoding beyond what locates region
//! boundaries) per the "no ID3v2 validation beyond round-trip" non-goal.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::cell::{RefCell, RefMut};
use std::io::Read;
use std::path::{Path, PathBuf};

const ID3V1_LEN: usize = 128;
const ID3V2_HEADER_LEN: usize = 10;

fn decode_syncsafe(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 21)
        | ((bytes[1] as u32) << 14)
        | ((bytes[2] as u32) << 7)
        | (bytes[3] as u32)
}

fn encode_syncsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7f) as u8,
        ((value >> 14) & 0x7f) as u8,
        ((value >> 7) & 0x7f) as u8,
        (value & 0x7f) as u8,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Id3v2Header {
    version_major: u8,
    version_rev: u8,
    unsynchronisation: bool,
    extended: bool,
    experimental: bool,
    footer: bool,
    /// Body size in bytes: the header/footer's own `size` field, syncsafe
    /// both in ID3v2.3 and ID3v2.4. Excludes the 10-byte header/footer
    /// themselves.
    size: u32,
}

impl Id3v2Header {
    fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ID3V2_HEADER_LEN {
            return None;
        }
        if &bytes[0..3] != b"ID3" && &bytes[0..3] != b"3DI" {
            return None;
        }
        let flags = bytes[5];
        Some(Id3v2Header {
            version_major: bytes[3],
            version_rev: bytes[4],
            unsynchronisation: flags & 0b1000_0000 != 0,
            extended: flags & 0b0100_0000 != 0,
            experimental: flags & 0b0010_0000 != 0,
            footer: flags & 0b0001_0000 != 0,
            size: decode_syncsafe(&bytes[6..10]),
        })
    }

    fn total_len(&self) -> usize {
        ID3V2_HEADER_LEN + self.size as usize + if self.footer { ID3V2_HEADER_LEN } else { 0 }
    }
}

/// A detached ID3v2 region (head or tail), kept as the raw bytes of the
/// whole region (header, body, optional footer) so restoring it is always
/// byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3v2Region {
    header: Id3v2Header,
    raw: Vec<u8>,
}

impl Id3v2Region {
    pub fn version_major(&self) -> u8 {
        self.header.version_major
    }

    /// Reported size: the tag's `size` field, i.e. the body length
    /// exclusive of the 10-byte header and any footer.
    pub fn reported_size(&self) -> u32 {
        self.header.size
    }

    /// Raw on-disk bytes of this region (header, body, optional footer).
    /// Public so `freezetag-fs` can splice a frozen head/tail directly into
    /// a virtual file.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn parse_head(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ID3V2_HEADER_LEN || &bytes[0..3] != b"ID3" {
            return None;
        }
        let header = Id3v2Header::read(&bytes[0..ID3V2_HEADER_LEN])?;
        let total = header.total_len();
        if total > bytes.len() {
            return None;
        }
        Some(Id3v2Region {
            header,
            raw: bytes[0..total].to_vec(),
        })
    }

    /// Looks for an ID3v2 tail by peeking a 10-byte header/footer at
    /// `offset -138` (when an ID3v1 tag follows) or `offset -10` (EOF),
    /// then walking back over its declared body to find the tag's true
    /// start.
    fn parse_tail(bytes: &[u8], head_len: usize, has_v1: bool) -> Option<Self> {
        let len = bytes.len();
        let peek_pos = if has_v1 {
            len.checked_sub(138)?
        } else {
            len.checked_sub(10)?
        };
        if peek_pos < head_len || peek_pos + ID3V2_HEADER_LEN > len {
            return None;
        }

        let footer = Id3v2Header::read(&bytes[peek_pos..peek_pos + ID3V2_HEADER_LEN])?;
        let tail_start = peek_pos.checked_sub(footer.size as usize + ID3V2_HEADER_LEN)?;
        if tail_start < head_len {
            return None;
        }

        let header = Id3v2Header::read(&bytes[tail_start..tail_start + ID3V2_HEADER_LEN])?;
        let end = peek_pos + ID3V2_HEADER_LEN;
        Some(Id3v2Region {
            header,
            raw: bytes[tail_start..end].to_vec(),
        })
    }

    /// Regions are self-describing: the header's own `size` (and `footer`
    /// flag) give the total length, so no separate length prefix is
    /// written on the wire.
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.raw);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let head = freezetag_common::decode::take(reader, ID3V2_HEADER_LEN)?;
        let header =
            Id3v2Header::read(&head).expect("region bytes always carry a valid header");
        let rest = freezetag_common::decode::take(reader, header.total_len() - ID3V2_HEADER_LEN)?;
        let mut raw = head;
        raw.extend_from_slice(&rest);
        Ok(Id3v2Region { header, raw })
    }
}

/// The ID3v2 head/tail and ID3v1 regions stripped from an MP3 file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mp3Metadata {
    pub head: Option<Id3v2Region>,
    pub tail: Option<Id3v2Region>,
    pub v1: Option<Box<[u8; ID3V1_LEN]>>,
}

impl Mp3Metadata {
    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.tail.is_none() && self.v1.is_none()
    }

    /// Display labels matching `show`/`shave` output: `ID3v2.<major>`,
    /// `ID3v2.<major> (end)`, `ID3v1`.
    pub fn report(&self) -> Vec<(String, u32)> {
        let mut out = Vec::new();
        if let Some(head) = &self.head {
            out.push((format!("ID3v2.{}", head.version_major()), head.reported_size()));
        }
        if let Some(tail) = &self.tail {
            out.push((
                format!("ID3v2.{} (end)", tail.version_major()),
                tail.reported_size(),
            ));
        }
        if self.v1.is_some() {
            out.push(("ID3v1".to_string(), ID3V1_LEN as u32));
        }
        out
    }

    /// Labels as stored in the checksum cache / mount index, distinguishing
    /// head from tail by prefix so `FuseFile` can locate the original head
    /// length by scanning for an entry starting with `"head-ID3v2"`.
    pub fn metadata_info(&self) -> Vec<(String, u32)> {
        let mut out = Vec::new();
        if let Some(head) = &self.head {
            out.push((
                format!("head-ID3v2.{}", head.version_major()),
                head.reported_size(),
            ));
        }
        if let Some(tail) = &self.tail {
            out.push((
                format!("tail-ID3v2.{}", tail.version_major()),
                tail.reported_size(),
            ));
        }
        if self.v1.is_some() {
            out.push(("v1".to_string(), ID3V1_LEN as u32));
        }
        out
    }

    pub fn metadata_len(&self) -> u32 {
        self.report().iter().map(|(_, size)| *size).sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let flags = (self.head.is_some() as u8)
            | (self.tail.is_some() as u8) << 1
            | (self.v1.is_some() as u8) << 2;
        buf.push(flags);
        if let Some(head) = &self.head {
            head.write_to(&mut buf);
        }
        if let Some(tail) = &self.tail {
            tail.write_to(&mut buf);
        }
        if let Some(v1) = &self.v1 {
            buf.extend_from_slice(v1.as_ref());
        }
        buf
    }

    /// Parses `flags | head? | tail? | v1?` directly off a shared reader,
    /// so a caller walking a larger stream can read exactly the bytes
    /// belonging to this entry and no more.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let flags = freezetag_common::decode::u8(reader)?;
        let head = if flags & 0b001 != 0 {
            Some(Id3v2Region::read_from(reader)?)
        } else {
            None
        };
        let tail = if flags & 0b010 != 0 {
            Some(Id3v2Region::read_from(reader)?)
        } else {
            None
        };
        let v1 = if flags & 0b100 != 0 {
            let bytes = freezetag_common::decode::take(reader, ID3V1_LEN)?;
            let mut arr = [0u8; ID3V1_LEN];
            arr.copy_from_slice(&bytes);
            Some(Box::new(arr))
        } else {
            None
        };
        Ok(Mp3Metadata { head, tail, v1 })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(&mut std::io::Cursor::new(bytes))
    }

    pub fn checksum(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }
}

fn parse_v1(bytes: &[u8]) -> Option<Box<[u8; ID3V1_LEN]>> {
    if bytes.len() < ID3V1_LEN {
        return None;
    }
    let tail = &bytes[bytes.len() - ID3V1_LEN..];
    if &tail[0..3] != b"TAG" {
        return None;
    }
    let mut arr = [0u8; ID3V1_LEN];
    arr.copy_from_slice(tail);
    Some(Box::new(arr))
}

struct Mp3Instance {
    head: Option<Id3v2Region>,
    tail: Option<Id3v2Region>,
    v1: Option<Box<[u8; ID3V1_LEN]>>,
    audio: Vec<u8>,
}

impl Mp3Instance {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let head = Id3v2Region::parse_head(bytes);
        let head_len = head.as_ref().map(|h| h.raw.len()).unwrap_or(0);
        let v1 = parse_v1(bytes);
        let tail = Id3v2Region::parse_tail(bytes, head_len, v1.is_some());
        let v1_len = if v1.is_some() { ID3V1_LEN } else { 0 };
        let tail_len = tail.as_ref().map(|t| t.raw.len()).unwrap_or(0);
        let audio_end = bytes.len().saturating_sub(v1_len + tail_len);
        let audio = bytes[head_len..audio_end.max(head_len)].to_vec();
        Ok(Mp3Instance {
            head,
            tail,
            v1,
            audio,
        })
    }

    fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(head) = &self.head {
            out.extend_from_slice(&head.raw);
        }
        out.extend_from_slice(&self.audio);
        if let Some(tail) = &self.tail {
            out.extend_from_slice(&tail.raw);
        }
        if let Some(v1) = &self.v1 {
            out.extend_from_slice(v1.as_ref());
        }
        out
    }
}

/// A parsed MP3 file, lazily read into memory and memoized on first access.
pub struct Mp3File {
    path: PathBuf,
    instance: RefCell<Option<Mp3Instance>>,
}

impl Mp3File {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Mp3File {
            path: path.as_ref().to_path_buf(),
            instance: RefCell::new(None),
        }
    }

    fn instance(&self) -> Result<RefMut<'_, Mp3Instance>> {
        if self.instance.borrow().is_none() {
            let bytes = std::fs::read(&self.path)?;
            let parsed = Mp3Instance::parse(&bytes)?;
            *self.instance.borrow_mut() = Some(parsed);
        }
        Ok(RefMut::map(self.instance.borrow_mut(), |o| {
            o.as_mut().unwrap()
        }))
    }

    pub fn strip(&self) -> Result<Mp3Metadata> {
        let mut instance = self.instance()?;
        Ok(Mp3Metadata {
            head: instance.head.take(),
            tail: instance.tail.take(),
            v1: instance.v1.take(),
        })
    }

    pub fn restore(&self, metadata: &Mp3Metadata) -> Result<()> {
        let mut instance = self.instance()?;
        instance.head = metadata.head.clone();
        instance.tail = metadata.tail.clone();
        instance.v1 = metadata.v1.clone();
        Ok(())
    }

    pub fn checksum(&self) -> Result<[u8; 20]> {
        let instance = self.instance()?;
        let mut hasher = Sha1::new();
        hasher.update(&instance.audio);
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

    fn id3v2_header(size: u32, footer: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"ID3");
        out.push(3); // version_major
        out.push(0); // version_rev
        out.push(if footer { 0b0001_0000 } else { 0 });
        out.extend_from_slice(&encode_syncsafe(size));
        out
    }

    fn sample_head(body: &[u8]) -> Vec<u8> {
        let mut out = id3v2_header(body.len() as u32, false);
        out.extend_from_slice(body);
        out
    }

    fn sample_v1() -> [u8; 128] {
        let mut v1 = [0u8; 128];
        v1[0..3].copy_from_slice(b"TAG");
        v1
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn strip_then_restore_round_trips_head_and_v1() {
        let mut original = sample_head(b"framebytes00");
        original.extend_from_slice(b"mp3audioframes");
        original.extend_from_slice(&sample_v1());

        let tmp = write_temp(&original);
        let file = Mp3File::from_path(tmp.path());

        let metadata = file.strip().unwrap();
        assert!(metadata.head.is_some());
        assert!(metadata.v1.is_some());
        assert!(metadata.tail.is_none());

        file.restore(&metadata).unwrap();
        assert_eq!(file.instance().unwrap().build(), original);
    }

    #[test]
    fn checksum_ignores_tags() {
        let mut tagged = sample_head(b"tag-a");
        tagged.extend_from_slice(b"sameaudio");
        tagged.extend_from_slice(&sample_v1());

        let bare = b"sameaudio".to_vec();

        let tagged_file = Mp3File::from_path(write_temp(&tagged).path());
        let bare_file = Mp3File::from_path(write_temp(&bare).path());

        assert_eq!(
            tagged_file.checksum().unwrap(),
            bare_file.checksum().unwrap()
        );
    }

    #[test]
    fn generic_file_with_no_tags_has_no_metadata() {
        let original = b"plainmp3audio".to_vec();
        let file = Mp3File::from_path(write_temp(&original).path());
        let metadata = file.strip().unwrap();
        assert!(metadata.is_empty());
        file.restore(&metadata).unwrap();
        assert_eq!(file.instance().unwrap().build(), original);
    }

    #[test]
    fn metadata_wire_round_trips() {
        let head = Id3v2Region::parse_head(&sample_head(b"hi")).unwrap();
        let metadata = Mp3Metadata {
            head: Some(head),
            tail: None,
            v1: Some(Box::new(sample_v1())),
        };
        let bytes = metadata.to_bytes();
        let decoded = Mp3Metadata::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn report_labels_match_show_style() {
        let head = Id3v2Region::parse_head(&sample_head(b"hi")).unwrap();
        let metadata = Mp3Metadata {
            head: Some(head),
            tail: None,
            v1: Some(Box::new(sample_v1())),
        };
        assert_eq!(
            metadata.report(),
            vec![("ID3v2.3".to_string(), 2), ("ID3v1".to_string(), 128)]
        );
        assert_eq!(
            metadata.metadata_info(),
            vec![("head-ID3v2.3".to_string(), 2), ("v1".to_string(), 128)]
        );
    }
}
