//! VarInt and length-prefixed frame encoding used by the Java Edition protocol.
//! [Data types](https://wiki.vg/Protocol#VarInt_and_VarLong)
//!
//! Encoding writes into an in-memory buffer; decoding is available both for
//! byte slices already in memory and for async streams.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Error;

/// The maximum number of bytes an `i32` VarInt may occupy.
pub const MAX_VARINT_LEN: usize = 5;

/// Upper bound on an accepted frame length (the protocol's 3-byte VarInt limit).
pub const MAX_FRAME_LEN: usize = (1 << 21) - 1;

const SEGMENT_BITS: u8 = 0x7f;
const CONTINUE_BIT: u8 = 0x80;

/// Incremental VarInt decoder fed one byte at a time.
#[derive(Debug, Default)]
struct VarIntDecoder {
    value: u32,
    read: usize,
}

impl VarIntDecoder {
    /// Returns `Some` once the terminating byte has been pushed.
    fn push(&mut self, byte: u8) -> Result<Option<i32>, Error> {
        if self.read == MAX_VARINT_LEN {
            return Err(Error::MalformedVarInt);
        }
        self.value |= u32::from(byte & SEGMENT_BITS) << (7 * self.read);
        self.read += 1;
        if byte & CONTINUE_BIT == 0 {
            #[allow(clippy::cast_possible_wrap)]
            let value = self.value as i32;
            return Ok(Some(value));
        }
        if self.read == MAX_VARINT_LEN {
            return Err(Error::MalformedVarInt);
        }
        Ok(None)
    }
}

/// Appends `value` as a VarInt: 7-bit groups, least significant first.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn write_varint(sink: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !u32::from(SEGMENT_BITS) == 0 {
            sink.push(value as u8);
            return;
        }
        sink.push((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

/// Decodes a VarInt from the front of `source`, advancing it.
///
/// # Errors
/// [`Error::MalformedVarInt`] after five continuation bytes,
/// [`Error::TruncatedFrame`] if `source` runs out first.
pub fn decode_varint(source: &mut &[u8]) -> Result<i32, Error> {
    let mut decoder = VarIntDecoder::default();
    loop {
        let Some((&byte, rest)) = source.split_first() else {
            return Err(Error::TruncatedFrame);
        };
        *source = rest;
        if let Some(value) = decoder.push(byte)? {
            return Ok(value);
        }
    }
}

/// Reads a VarInt from an async stream.
///
/// # Errors
/// [`Error::MalformedVarInt`] after five continuation bytes,
/// [`Error::TruncatedFrame`] on EOF, [`Error::ConnectionFailed`] on other I/O errors.
pub async fn read_varint<R: AsyncRead + Unpin>(source: &mut R) -> Result<i32, Error> {
    let mut decoder = VarIntDecoder::default();
    loop {
        let byte = source.read_u8().await.map_err(truncated_on_eof)?;
        if let Some(value) = decoder.push(byte)? {
            return Ok(value);
        }
    }
}

/// Appends `payload` prefixed with its VarInt-encoded length.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn write_frame(sink: &mut Vec<u8>, payload: &[u8]) {
    write_varint(sink, payload.len() as i32);
    sink.extend_from_slice(payload);
}

/// Reads one length-prefixed frame and returns its payload.
///
/// # Errors
/// [`Error::TruncatedFrame`] if the stream ends before the declared length,
/// [`Error::InvalidServerResponse`] for a negative or oversized length.
pub async fn read_frame<R: AsyncRead + Unpin>(source: &mut R) -> Result<Vec<u8>, Error> {
    let len = frame_len(read_varint(source).await?)?;
    let mut payload = vec![0; len];
    source
        .read_exact(&mut payload)
        .await
        .map_err(truncated_on_eof)?;
    Ok(payload)
}

/// Appends a VarInt-prefixed UTF-8 string.
pub fn write_string(sink: &mut Vec<u8>, value: &str) {
    write_frame(sink, value.as_bytes());
}

/// Decodes a VarInt-prefixed UTF-8 string from the front of `source`.
///
/// # Errors
/// [`Error::TruncatedFrame`] if fewer bytes remain than declared,
/// [`Error::InvalidServerResponse`] for bad lengths or invalid UTF-8.
pub fn decode_string(source: &mut &[u8]) -> Result<String, Error> {
    let len = frame_len(decode_varint(source)?)?;
    if source.len() < len {
        return Err(Error::TruncatedFrame);
    }
    let (bytes, rest) = source.split_at(len);
    *source = rest;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::InvalidServerResponse(format!("string is not UTF-8: {e}")))
}

fn frame_len(len: i32) -> Result<usize, Error> {
    let len = usize::try_from(len)
        .map_err(|_| Error::InvalidServerResponse(format!("negative length {len}")))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::InvalidServerResponse(format!(
            "length {len} exceeds {MAX_FRAME_LEN}"
        )));
    }
    Ok(len)
}

fn truncated_on_eof(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::TruncatedFrame
    } else {
        Error::ConnectionFailed(e)
    }
}
