use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("not a freezetag file: bad signature")]
    BadSignature,
    #[error("trailing bytes after freezetag body")]
    TrailingBytes,
    #[error("unsupported freezetag version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid freeze mode byte {0}")]
    BadMode(u8),
    #[error("lzma stream is corrupt")]
    Lzma,
    #[error(transparent)]
    Format(#[from] freezetag_format::FormatError),
    #[error(transparent)]
    Decode(#[from] freezetag_common::decode::DecodeError),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
