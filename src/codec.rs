use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::frame::{self, Frame};
use crate::Error;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// A decoded request. Protocol errors are yielded as items rather than as decoder errors: a
/// `FramedRead` stream terminates after its decoder fails, while a malformed request must only
/// produce an error reply.
pub type Decoded = Result<Frame, frame::Error>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// The buffer starts at a frame boundary.
    Ready,
    /// Input is being discarded after a protocol error, up to the next line starting with `*`.
    /// `mid_line` is set while the current line has not yet been terminated by a LF.
    Resync { mid_line: bool },
}

/// Splits a client byte stream into requests.
///
/// The codec is owned by a single connection. Bytes that do not yet form a complete frame stay in
/// the read buffer between calls, so frames may arrive split at any byte boundary and several
/// frames may arrive in a single read.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    state: State,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec {
            max_frame_size,
            state: State::Ready,
        }
    }

    /// Drops input until the buffer starts with a line beginning with `*`. Returns `false` when
    /// the buffer ran out before such a line was found.
    fn resync(&mut self, src: &mut BytesMut) -> bool {
        let State::Resync { mut mid_line } = self.state else {
            return true;
        };

        loop {
            if mid_line {
                // Lines end at LF, so a bare "\r\n" after the offending byte is not mistaken
                // for the start of the next frame's header.
                match src.iter().position(|&byte| byte == b'\n') {
                    Some(index) => src.advance(index + 1),
                    None => {
                        src.clear();
                        self.state = State::Resync { mid_line: true };
                        return false;
                    }
                }
            }

            match src.first() {
                None => {
                    self.state = State::Resync { mid_line: false };
                    return false;
                }
                Some(b'*') => {
                    debug!("resynchronized on next frame boundary");
                    self.state = State::Ready;
                    return true;
                }
                Some(_) => mid_line = true,
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Decoded;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.resync(src) {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        match Frame::parse(&mut cursor) {
            Ok(frame) => {
                let position = cursor.position() as usize;

                // Remove the parsed frame from the buffer.
                src.advance(position);

                Ok(Some(Ok(frame)))
            }
            Err(frame::Error::Incomplete) => {
                // Check the buffered size to prevent a client from growing it without bound.
                if src.len() > self.max_frame_size {
                    return Err(format!(
                        "frame size exceeds limit of {} bytes",
                        self.max_frame_size
                    )
                    .into());
                }

                Ok(None)
            }
            Err(err) => {
                let position = cursor.position() as usize;
                let mid_line = !src[..position].ends_with(b"\n");

                src.advance(position);
                self.state = State::Resync { mid_line };

                Ok(Some(Err(err)))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                if !src.is_empty() {
                    debug!(
                        remaining = src.len(),
                        "discarding incomplete frame at end of stream"
                    );
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn decode_chunks(codec: &mut FrameCodec, chunks: &[&[u8]]) -> Vec<Decoded> {
        let mut buffer = BytesMut::new();
        let mut decoded = vec![];

        for chunk in chunks {
            buffer.extend_from_slice(chunk);
            while let Some(item) = codec.decode(&mut buffer).unwrap() {
                decoded.push(item);
            }
        }

        decoded
    }

    fn request(parts: &[&str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }

    const SET: &[u8] = b"*5\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nva\r\nl\r\n$2\r\nPX\r\n$3\r\n100\r\n";

    #[test]
    fn whole_frame() {
        let decoded = decode_chunks(&mut FrameCodec::default(), &[SET]);

        assert_eq!(
            decoded,
            vec![Ok(request(&["SET", "key", "va\r\nl", "PX", "100"]))]
        );
    }

    #[test]
    fn split_at_every_byte_boundary() {
        let whole = decode_chunks(&mut FrameCodec::default(), &[SET]);

        for split in 0..=SET.len() {
            let (head, tail) = SET.split_at(split);
            let decoded = decode_chunks(&mut FrameCodec::default(), &[head, tail]);

            assert_eq!(decoded, whole, "split at {}", split);
        }
    }

    #[test]
    fn split_into_random_chunks() {
        let mut rng = StdRng::seed_from_u64(7);
        let whole = decode_chunks(&mut FrameCodec::default(), &[SET]);

        for _ in 0..200 {
            let mut chunks = vec![];
            let mut rest = SET;
            while !rest.is_empty() {
                let (chunk, tail) = rest.split_at(rng.gen_range(1..=rest.len()));
                chunks.push(chunk);
                rest = tail;
            }

            assert_eq!(decode_chunks(&mut FrameCodec::default(), &chunks), whole);
        }
    }

    #[test]
    fn byte_at_a_time() {
        let chunks: Vec<&[u8]> = SET.chunks(1).collect();

        let decoded = decode_chunks(&mut FrameCodec::default(), &chunks);

        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn pipelined_frames_in_one_chunk() {
        let data = b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\n*1\r\n$4\r\nPING\r\n";

        let decoded = decode_chunks(&mut FrameCodec::default(), &[data]);

        assert_eq!(
            decoded,
            vec![
                Ok(request(&["SET", "a", "1"])),
                Ok(request(&["GET", "a"])),
                Ok(request(&["PING"])),
            ]
        );
    }

    #[test]
    fn incomplete_frame_stays_buffered() {
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::from(&b"*1\r\n$4\r\nPI"[..]);

        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], b"*1\r\n$4\r\nPI");
    }

    #[test]
    fn negative_bulk_length_then_valid_frame() {
        let data = b"*2\r\n$-1\r\n...\r\n*1\r\n$4\r\nPING\r\n";

        let decoded = decode_chunks(&mut FrameCodec::default(), &[data]);

        assert_eq!(
            decoded,
            vec![
                Err(frame::Error::InvalidLength {
                    kind: "bulk",
                    value: "-1".to_string()
                }),
                Ok(request(&["PING"])),
            ]
        );
    }

    #[test]
    fn wrong_leading_byte_then_valid_frame() {
        let data = b"+PING\r\n*1\r\n$4\r\nPING\r\n";

        let decoded = decode_chunks(&mut FrameCodec::default(), &[data]);

        assert_eq!(decoded.len(), 2);
        assert!(matches!(
            decoded[0],
            Err(frame::Error::InvalidDataType { actual: '+', .. })
        ));
        assert_eq!(decoded[1], Ok(request(&["PING"])));
    }

    #[test]
    fn empty_line_then_valid_frame() {
        let data = b"\r\n*1\r\n$4\r\nPING\r\n";

        let decoded = decode_chunks(&mut FrameCodec::default(), &[data]);

        assert_eq!(decoded.len(), 2);
        assert!(matches!(
            decoded[0],
            Err(frame::Error::InvalidDataType { actual: '\r', .. })
        ));
        assert_eq!(decoded[1], Ok(request(&["PING"])));
    }

    #[test]
    fn stray_line_feed_then_valid_frame() {
        let data = b"\n*1\r\n$4\r\nPING\r\n";

        let decoded = decode_chunks(&mut FrameCodec::default(), &[data]);

        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_err());
        assert_eq!(decoded[1], Ok(request(&["PING"])));
    }

    #[test]
    fn cr_and_lf_in_separate_reads() {
        let decoded = decode_chunks(
            &mut FrameCodec::default(),
            &[b"\r", b"\n*1\r\n$4\r\nPING\r\n"],
        );

        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_err());
        assert_eq!(decoded[1], Ok(request(&["PING"])));
    }

    #[test]
    fn resync_across_reads() {
        let mut codec = FrameCodec::default();

        let decoded = decode_chunks(
            &mut codec,
            &[b"hello wor", b"ld\r", b"\nmore garbage\r\n", b"*1\r\n$4\r\nPI", b"NG\r\n"],
        );

        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_err());
        assert_eq!(decoded[1], Ok(request(&["PING"])));
    }

    #[test]
    fn frame_size_limit() {
        let mut codec = FrameCodec::new(16);
        let mut buffer = BytesMut::from(&b"*1\r\n$100\r\n0123456789"[..]);

        assert!(codec.decode(&mut buffer).is_err());
    }

    #[test]
    fn complete_frames_are_not_limited_by_pending_size() {
        let mut codec = FrameCodec::new(16);
        let mut buffer = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Ok(request(&["PING"]))));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Ok(request(&["PING"]))));
    }

    #[test]
    fn partial_frame_at_eof_is_discarded() {
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::from(&b"*1\r\n$4\r\nPI"[..]);

        assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());
    }
}
