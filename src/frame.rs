// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Upper bound for the element vector allocated up front; a client announcing a huge array must
/// actually send the elements before we grow past it.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Same limit Redis applies to a single bulk string (`proto-max-bulk-len`).
const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("Protocol error: expected '{expected}', got '{actual}'")]
    InvalidDataType { expected: char, actual: char },
    #[error("Protocol error: invalid {kind} length '{value}'")]
    InvalidLength { kind: &'static str, value: String },
    #[error("Protocol error: bulk string is not terminated by CRLF")]
    MissingCrlf,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// Null bulk string, the reply of a missing key.
    Null,
    NullArray,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Parses a single client request from `src`.
    ///
    /// Clients send commands as an array of bulk strings:
    /// `*<number-of-elements>\r\n` followed by `$<length>\r\n<data>\r\n` per element. The frame
    /// is returned only once every announced element is buffered, otherwise
    /// [`Error::Incomplete`] is returned and the cursor position is meaningless.
    ///
    /// Bulk payloads are read by length, never by searching for a delimiter, so they may contain
    /// any byte sequence including `\r\n`.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        expect_data_type(src, DataType::Array)?;
        let count = get_length(src, "multibulk")?;

        let mut frames = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        for _ in 0..count {
            // $<length>\r\n<data>\r\n
            expect_data_type(src, DataType::BulkString)?;
            let length = get_length(src, "bulk")?;
            if length > MAX_BULK_LENGTH {
                return Err(Error::InvalidLength {
                    kind: "bulk",
                    value: length.to_string(),
                });
            }
            let data = get_bulk_bytes(src, length)?;
            frames.push(Frame::Bulk(Bytes::copy_from_slice(data)));
        }

        Ok(Frame::Array(frames))
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleString));
                extend_line(&mut bytes, s);
                bytes.extend_from_slice(CRLF);
                bytes
            }
            // Every error reply carries the generic `ERR` prefix.
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(5 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(b"ERR ");
                extend_line(&mut bytes, s);
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(bytes) => {
                let length_str = bytes.len().to_string();
                let mut result = Vec::with_capacity(
                    1 + length_str.len() + CRLF.len() + bytes.len() + CRLF.len(),
                );
                result.push(u8::from(DataType::BulkString));
                result.extend_from_slice(length_str.as_bytes());
                result.extend_from_slice(CRLF);
                result.extend_from_slice(bytes);
                result.extend_from_slice(CRLF);
                result
            }
            Frame::Null => b"$-1\r\n".to_vec(),
            Frame::NullArray => b"*-1\r\n".to_vec(),
            Frame::Array(arr) => {
                let length_str = arr.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(length_str.as_bytes());
                bytes.extend_from_slice(CRLF);
                for frame in arr {
                    bytes.extend(frame.serialize());
                }
                bytes
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-ERR {}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::NullArray => write!(f, "*-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// Appends `line` to a simple reply. A CR or LF would end the reply early, so both become spaces.
fn extend_line(bytes: &mut Vec<u8>, line: &str) {
    bytes.extend(line.bytes().map(|byte| match byte {
        b'\r' | b'\n' => b' ',
        byte => byte,
    }));
}

/// Returns the bytes up to the next CRLF and moves the cursor past it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let line_end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&buf[start..line_end])
}

fn get_length(src: &mut Cursor<&[u8]>, kind: &'static str) -> Result<usize, Error> {
    let line = get_line(src)?;

    // Negative lengths are rejected here: requests never carry null values.
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::InvalidLength {
            kind,
            value: String::from_utf8_lossy(line).into_owned(),
        })
}

fn get_bulk_bytes<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    if buf.len() - start < length + CRLF.len() {
        return Err(Error::Incomplete);
    }

    let end = start + length;
    if &buf[end..end + CRLF.len()] != CRLF {
        src.set_position(end as u64);
        return Err(Error::MissingCrlf);
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

fn expect_data_type(src: &mut Cursor<&[u8]>, expected: DataType) -> Result<(), Error> {
    let byte = get_byte(src)?;
    let expected = u8::from(expected);

    if byte != expected {
        return Err(Error::InvalidDataType {
            expected: char::from(expected),
            actual: char::from(byte),
        });
    }

    Ok(())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    BulkString,   // '$'
    SimpleError,  // '-'
    Integer,      // ':'
    Array,        // '*'
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
