use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("invalid magic number, expected \"fLaC\"")]
    InvalidMagicNumber,
    #[error("invalid first FLAC block, must be STREAMINFO")]
    InvalidFirstBlock,
    #[error("flac file truncated before a block with the last-block flag was seen")]
    UnterminatedMetadata,
    #[error("unrecognized file extension for {0}")]
    UnknownExtension(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] freezetag_common::decode::DecodeError),
}

pub type Result<T> = std::result::Result<T, FormatError>;
