use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use uuid::Uuid;

use crate::codec::{Decoded, FrameCodec};
use crate::frame::Frame;
use crate::Error;

/// One client's transport: requests are decoded from `reader` and replies are written to
/// `writer`. Any `AsyncRead`/`AsyncWrite` pair works, a TCP stream is the common case.
pub struct Connection<R, W> {
    pub id: Uuid,
    /// Peer address, when the transport has one.
    pub client_address: Option<SocketAddr>,
    // Data is read from the reader into the codec's buffer. When a frame is parsed, the
    // corresponding data is removed from the buffer.
    reader: FramedRead<R, FrameCodec>,
    writer: W,
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    pub fn from_tcp(stream: TcpStream, client_address: SocketAddr, codec: FrameCodec) -> Self {
        let (reader, writer) = stream.into_split();
        let mut connection = Connection::new(reader, writer, codec);
        connection.client_address = Some(client_address);
        connection
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, codec: FrameCodec) -> Self {
        Connection {
            id: Uuid::new_v4(),
            client_address: None,
            reader: FramedRead::new(reader, codec),
            writer,
        }
    }

    /// Reads the next request. Returns `None` once the peer closed the stream.
    ///
    /// A malformed request is returned as `Some(Err(_))` and the connection stays usable; the
    /// outer error is reserved for transport failures.
    pub async fn read_frame(&mut self) -> Result<Option<Decoded>, Error> {
        self.reader.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        self.writer.write_all(&frame.serialize()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
