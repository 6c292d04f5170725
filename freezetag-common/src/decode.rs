use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io;
use std::io::Read;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    IOError(#[from] io::Error),
    #[error(transparent)]
    FromUtf8Error(#[from] FromUtf8Error),
    #[error("invalid token, expected {expected:?}, got {got:?}")]
    InvalidTokenError { expected: Vec<u8>, got: Vec<u8> },
}

type DecodeResult<T> = std::result::Result<T, DecodeError>;

pub fn take<R: Read>(reader: &mut R, len: usize) -> DecodeResult<Vec<u8>> {
    let mut r = Vec::with_capacity(len);
    std::io::copy(&mut reader.take(len as u64), &mut r)?;
    Ok(r)
}

pub fn take_to_end<R: Read>(reader: &mut R) -> DecodeResult<Vec<u8>> {
    let mut r = Vec::new();
    reader.read_to_end(&mut r)?;
    Ok(r)
}

#[inline]
pub fn take_string<R: Read>(reader: &mut R, len: usize) -> DecodeResult<String> {
    Ok(String::from_utf8(take(reader, len)?)?)
}

/// Reads a NUL-terminated UTF-8 string, not including the terminator.
pub fn take_cstring<R: Read>(reader: &mut R) -> DecodeResult<String> {
    let mut buf = Vec::new();
    loop {
        let byte = u8(reader)?;
        if byte == 0 {
            break;
        }
        buf.push(byte);
    }
    Ok(String::from_utf8(buf)?)
}

#[inline]
pub fn skip<R: Read>(reader: &mut R, len: usize) -> DecodeResult<u64> {
    Ok(std::io::copy(
        &mut reader.take(len as u64),
        &mut std::io::sink(),
    )?)
}

pub fn token<R: Read>(reader: &mut R, token: &[u8]) -> DecodeResult<()> {
    let got = take(reader, token.len())?;
    if got[..] == token[..] {
        Ok(())
    } else {
        Err(DecodeError::InvalidTokenError {
            expected: token.to_owned(),
            got,
        })
    }
}

#[inline]
pub fn u8<R: Read>(reader: &mut R) -> DecodeResult<u8> {
    Ok(reader.read_u8()?)
}

#[inline]
pub fn u32_le<R: Read>(reader: &mut R) -> DecodeResult<u32> {
    Ok(reader.read_u32::<LittleEndian>()?)
}

#[inline]
pub fn u32_be<R: Read>(reader: &mut R) -> DecodeResult<u32> {
    Ok(reader.read_u32::<BigEndian>()?)
}

#[inline]
pub fn u16_be<R: Read>(reader: &mut R) -> DecodeResult<u16> {
    Ok(reader.read_u16::<BigEndian>()?)
}

#[inline]
pub fn u24_be<R: Read>(reader: &mut R) -> DecodeResult<u32> {
    Ok(reader.read_u24::<BigEndian>()?)
}
