//! Fallback handling for files with no known tag container: the whole file
//! is the audio, there is no metadata to strip, and identity is the
//! checksum of the file's bytes.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

pub struct GenericFile {
    path: PathBuf,
    bytes: RefCell<Option<Vec<u8>>>,
}

impl GenericFile {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        GenericFile {
            path: path.as_ref().to_path_buf(),
            bytes: RefCell::new(None),
        }
    }

    fn bytes(&self) -> Result<std::cell::Ref<'_, Vec<u8>>> {
        if self.bytes.borrow().is_none() {
            let data = std::fs::read(&self.path)?;
            *self.bytes.borrow_mut() = Some(data);
        }
        Ok(std::cell::Ref::map(self.bytes.borrow(), |o| {
            o.as_ref().unwrap()
        }))
    }

    /// Generic files carry no separable metadata; stripping is a no-op.
    pub fn strip(&self) -> Result<()> {
        self.bytes()?;
        Ok(())
    }

    pub fn restore(&self, _metadata: &()) -> Result<()> {
        Ok(())
    }

    pub fn checksum(&self) -> Result<[u8; 20]> {
        let mut hasher = Sha1::new();
        hasher.update(&*self.bytes()?);
        Ok(hasher.finalize().into())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, &*self.bytes()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn checksum_is_over_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"some opaque bytes").unwrap();
        tmp.flush().unwrap();

        let file = GenericFile::from_path(tmp.path());
        file.strip().unwrap();
        let mut hasher = Sha1::new();
        hasher.update(b"some opaque bytes");
        let expected: [u8; 20] = hasher.finalize().into();
        assert_eq!(file.checksum().unwrap(), expected);
    }

    #[test]
    fn write_round_trips_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"round trip me").unwrap();
        tmp.flush().unwrap();

        let file = GenericFile::from_path(tmp.path());
        let out = tempfile::NamedTempFile::new().unwrap();
        file.write(out.path()).unwrap();
        assert_eq!(std::fs::read(out.path()).unwrap(), b"round trip me");
    }
}
