//! Extension-based dispatch across the known container formats.

use crate::error::{FormatError, Result};
use crate::flac::{FlacFile, FlacMetadata};
use crate::generic::GenericFile;
use crate::mp3::{Mp3File, Mp3Metadata};
use std::path::Path;

/// The numeric format tag stored alongside each file's metadata in a
/// freezetag container, so `thaw` can pick the right restore path without
/// re-sniffing the extension.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileFormat {
    Generic = 0,
    Flac = 1,
    Mp3 = 2,
}

impl FileFormat {
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(FileFormat::Generic),
            1 => Ok(FileFormat::Flac),
            2 => Ok(FileFormat::Mp3),
            other => Err(FormatError::UnknownExtension(format!("format id {other}"))),
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn of_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("flac") => FileFormat::Flac,
            Some("mp3") => FileFormat::Mp3,
            _ => FileFormat::Generic,
        }
    }
}

/// Metadata stripped from a file, tagged by the format it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Generic,
    Flac(FlacMetadata),
    Mp3(Mp3Metadata),
}

impl Metadata {
    pub fn format(&self) -> FileFormat {
        match self {
            Metadata::Generic => FileFormat::Generic,
            Metadata::Flac(_) => FileFormat::Flac,
            Metadata::Mp3(_) => FileFormat::Mp3,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Metadata::Generic => true,
            Metadata::Flac(m) => m.is_empty(),
            Metadata::Mp3(m) => m.is_empty(),
        }
    }

    pub fn metadata_len(&self) -> u32 {
        match self {
            Metadata::Generic => 0,
            Metadata::Flac(m) => m.metadata_len(),
            Metadata::Mp3(m) => m.metadata_len(),
        }
    }

    /// Display labels as used by `show`/`shave`.
    pub fn report(&self) -> Vec<(String, u32)> {
        match self {
            Metadata::Generic => Vec::new(),
            Metadata::Flac(m) => m
                .report()
                .into_iter()
                .map(|(name, size)| (name.to_string(), size))
                .collect(),
            Metadata::Mp3(m) => m.report(),
        }
    }

    /// Labels as stored in the checksum cache / mount index: like
    /// [`Metadata::report`], but distinguishing an MP3 head region from its
    /// tail by prefix so [`crate`]'s callers can locate the original head
    /// length (`freezetag-fs`'s `FuseFile` does exactly this).
    pub fn metadata_info(&self) -> Vec<(String, u32)> {
        match self {
            Metadata::Generic => Vec::new(),
            Metadata::Flac(m) => m
                .report()
                .into_iter()
                .map(|(name, size)| (name.to_string(), size))
                .collect(),
            Metadata::Mp3(m) => m.metadata_info(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Metadata::Generic => Vec::new(),
            Metadata::Flac(m) => m.to_bytes(),
            Metadata::Mp3(m) => m.to_bytes(),
        }
    }

    pub fn from_bytes(format: FileFormat, bytes: &[u8]) -> Result<Self> {
        Ok(match format {
            FileFormat::Generic => Metadata::Generic,
            FileFormat::Flac => Metadata::Flac(FlacMetadata::from_bytes(bytes)?),
            FileFormat::Mp3 => Metadata::Mp3(Mp3Metadata::from_bytes(bytes)?),
        })
    }

    /// Parses directly off a shared reader, consuming exactly the bytes
    /// belonging to this format's metadata. Used by callers (the freezetag
    /// container codec) walking a larger stream of back-to-back entries.
    pub fn from_reader<R: std::io::Read>(format: FileFormat, reader: &mut R) -> Result<Self> {
        Ok(match format {
            FileFormat::Generic => Metadata::Generic,
            FileFormat::Flac => Metadata::Flac(FlacMetadata::from_reader(reader)?),
            FileFormat::Mp3 => Metadata::Mp3(Mp3Metadata::from_reader(reader)?),
        })
    }

    pub fn checksum(&self) -> [u8; 20] {
        match self {
            Metadata::Generic => {
                use sha1::{Digest, Sha1};
                Sha1::new().finalize().into()
            }
            Metadata::Flac(m) => m.checksum(),
            Metadata::Mp3(m) => m.checksum(),
        }
    }
}

/// A file opened for strip/restore, dispatched to the parser matching its
/// extension.
pub enum ParsedFile {
    Generic(GenericFile),
    Flac(FlacFile),
    Mp3(Mp3File),
}

impl ParsedFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match FileFormat::of_path(path) {
            FileFormat::Flac => ParsedFile::Flac(FlacFile::from_path(path)),
            FileFormat::Mp3 => ParsedFile::Mp3(Mp3File::from_path(path)),
            FileFormat::Generic => ParsedFile::Generic(GenericFile::from_path(path)),
        }
    }

    pub fn format(&self) -> FileFormat {
        match self {
            ParsedFile::Generic(_) => FileFormat::Generic,
            ParsedFile::Flac(_) => FileFormat::Flac,
            ParsedFile::Mp3(_) => FileFormat::Mp3,
        }
    }

    pub fn strip(&self) -> Result<Metadata> {
        Ok(match self {
            ParsedFile::Generic(f) => {
                f.strip()?;
                Metadata::Generic
            }
            ParsedFile::Flac(f) => Metadata::Flac(f.strip()?),
            ParsedFile::Mp3(f) => Metadata::Mp3(f.strip()?),
        })
    }

    pub fn restore(&self, metadata: &Metadata) -> Result<()> {
        match (self, metadata) {
            (ParsedFile::Generic(f), Metadata::Generic) => f.restore(&()),
            (ParsedFile::Flac(f), Metadata::Flac(m)) => f.restore(m),
            (ParsedFile::Mp3(f), Metadata::Mp3(m)) => f.restore(m),
            (file, metadata) => Err(FormatError::UnknownExtension(format!(
                "metadata format {:?} does not match file format {:?}",
                metadata.format(),
                file.format()
            ))),
        }
    }

    pub fn checksum(&self) -> Result<[u8; 20]> {
        match self {
            ParsedFile::Generic(f) => f.checksum(),
            ParsedFile::Flac(f) => f.checksum(),
            ParsedFile::Mp3(f) => f.checksum(),
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        match self {
            ParsedFile::Generic(f) => f.write(path),
            ParsedFile::Flac(f) => f.write(path),
            ParsedFile::Mp3(f) => f.write(path),
        }
    }
}

impl std::fmt::Debug for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileFormat::Generic => "generic",
            FileFormat::Flac => "flac",
            FileFormat::Mp3 => "mp3",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_extension() {
        assert_eq!(FileFormat::of_path(Path::new("a/b.flac")), FileFormat::Flac);
        assert_eq!(FileFormat::of_path(Path::new("a/b.FLAC")), FileFormat::Flac);
        assert_eq!(FileFormat::of_path(Path::new("a/b.mp3")), FileFormat::Mp3);
        assert_eq!(FileFormat::of_path(Path::new("a/b.txt")), FileFormat::Generic);
        assert_eq!(FileFormat::of_path(Path::new("a/b")), FileFormat::Generic);
    }

    #[test]
    fn format_id_round_trips() {
        for format in [FileFormat::Generic, FileFormat::Flac, FileFormat::Mp3] {
            assert_eq!(FileFormat::from_id(format.id()).unwrap(), format);
        }
    }
}
