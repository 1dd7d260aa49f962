use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::FrameCodec;
use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::sweeper::Sweeper;
use crate::Error;

pub async fn run(config: Config) -> Result<(), Error> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

    serve(listener, config).await
}

/// Accepts connections on `listener` forever, serving each from its own task over one shared
/// store.
pub async fn serve(listener: TcpListener, config: Config) -> Result<(), Error> {
    let store = Store::new();
    let _sweeper = config
        .sweep_interval()
        .map(|interval| Sweeper::spawn(store.clone(), interval));

    info!("Redis server listening on {}", listener.local_addr()?);

    loop {
        let (socket, client_address) = listener.accept().await?;
        let store = store.clone();
        let codec = FrameCodec::new(config.max_frame_size);
        let connection = Connection::from_tcp(socket, client_address, codec);
        info!(
            connection_id = %connection.id,
            "Accepted connection from {:?}", client_address
        );

        tokio::spawn(async move {
            if let Err(e) = handle_connection(connection, store).await {
                error!(error = %e, "Connection terminated");
            }
        });
    }
}

/// Serves requests from `connection` until the peer disconnects. Replies are written in request
/// order, one per request.
#[instrument(name = "connection", skip_all, fields(connection_id, client_address))]
pub async fn handle_connection<R, W>(
    mut connection: Connection<R, W>,
    store: Store,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let span = tracing::Span::current();
    span.record("connection_id", connection.id.to_string());
    if let Some(client_address) = connection.client_address {
        span.record("client_address", client_address.to_string());
    }

    while let Some(decoded) = connection.read_frame().await? {
        let res = match decoded {
            Ok(frame) => {
                debug!("Received frame from client: {}", frame);
                execute(frame, store.clone())
            }
            Err(e) => {
                warn!("Malformed request: {}", e);
                Frame::Error(e.to_string())
            }
        };

        debug!("Sending response to client: {}", res);
        connection.write_frame(&res).await?;
    }

    info!("Connection closed");
    Ok(())
}

/// Runs one request against the store. Every failure becomes an error reply.
pub fn execute(frame: Frame, store: Store) -> Frame {
    let cmd = match Command::try_from(frame) {
        Ok(cmd) => cmd,
        Err(e) => return Frame::Error(e.to_string()),
    };

    cmd.exec(store).unwrap_or_else(|e| Frame::Error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(parts: &[&str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn execute_commands() {
        let store = Store::new();

        assert_eq!(
            execute(request(&["SET", "a", "1"]), store.clone()),
            Frame::Simple("OK".to_string())
        );
        assert_eq!(
            execute(request(&["GET", "a"]), store.clone()),
            Frame::Bulk(Bytes::from("1"))
        );
        assert_eq!(execute(request(&["GET", "b"]), store.clone()), Frame::Null);
    }

    #[test]
    fn execute_errors_become_replies() {
        let store = Store::new();

        assert_eq!(
            execute(request(&["NOPE"]), store.clone()),
            Frame::Error("unknown command 'nope'".to_string())
        );
        assert_eq!(
            execute(request(&["SET", "a", "1", "PX", "x"]), store.clone()).serialize(),
            b"-ERR value is not an integer or out of range\r\n"
        );
        assert_eq!(execute(request(&["GET", "a"]), store.clone()), Frame::Null);
    }
}
