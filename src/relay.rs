use crate::error::{DialError, RelayError};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::JoinHandle,
};
use tracing::{debug, trace};

/// Size of the per-direction read buffer
pub const RELAY_BUF_SIZE: usize = 16 * 1024;

/// dial makes a single connection attempt to `host:port`, bounded by `timeout`.
/// `host` is a domain name or a literal IPv4/IPv6 address.
pub async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, DialError> {
    dial_within(timeout, TcpStream::connect((host, port))).await
}

/// dial_within bounds an in-flight connect by `timeout`. The connect future
/// is dropped (and the attempt abandoned) when the timeout fires first.
pub(crate) async fn dial_within<F>(timeout: Duration, connect: F) -> Result<TcpStream, DialError>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(DialError::ConnectFailed(e)),
        Err(_) => Err(DialError::Timeout(timeout)),
    }
}

/// RelayPair ties a client socket to its target socket once the dial has
/// succeeded. Client -> target bytes go through `send_to_target`; target ->
/// client bytes are forwarded by a dedicated task. Dropping the pair closes
/// the target side.
pub struct RelayPair {
    upstream: OwnedWriteHalf,
    downstream: JoinHandle<Result<u64, RelayError>>,
    sent: u64,
}

/// RelayPair implementation block
impl RelayPair {
    /// establish takes over the client's write half and the connected
    /// target, and starts forwarding target -> client
    pub fn establish(client_writer: OwnedWriteHalf, target: TcpStream) -> Self {
        let (target_reader, upstream) = target.into_split();
        let downstream = tokio::spawn(forward(target_reader, client_writer));

        Self {
            upstream,
            downstream,
            sent: 0,
        }
    }

    /// send_to_target writes one client chunk to the target verbatim
    pub async fn send_to_target(&mut self, chunk: &[u8]) -> Result<(), RelayError> {
        self.upstream
            .write_all(chunk)
            .await
            .map_err(RelayError::Write)?;
        self.sent += chunk.len() as u64;

        debug!("forwarded {} bytes to target", chunk.len());
        Ok(())
    }

    /// Bytes forwarded client -> target so far
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// closed resolves once the target -> client direction has ended,
    /// yielding the number of bytes it forwarded. Must not be polled again
    /// after it resolves.
    pub async fn closed(&mut self) -> Result<u64, RelayError> {
        (&mut self.downstream).await?
    }

    /// close tears down both directions. Safe to call more than once.
    pub async fn close(&mut self) {
        self.downstream.abort();
        // Already shut down or reset by the peer: nothing left to do
        let _ = self.upstream.shutdown().await;
    }
}

impl Drop for RelayPair {
    fn drop(&mut self) {
        self.downstream.abort();
    }
}

/// forward copies chunks from the target to the client in receipt order
/// until EOF or an error on either socket
async fn forward(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) -> Result<u64, RelayError> {
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await.map_err(RelayError::Read)?;
        if n == 0 {
            debug!("target closed the connection");
            // Client may already be gone; the session tears it down either way
            let _ = writer.shutdown().await;
            return Ok(total);
        }

        trace!("target -> client: {:02x?}", &buf[..n]);
        writer
            .write_all(&buf[..n])
            .await
            .map_err(RelayError::Write)?;
        total += n as u64;

        debug!("forwarded {n} bytes to client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Connected (client-side, server-side) socket pair on loopback
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn dial_connects_to_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = dial("127.0.0.1", port, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn dial_refused_is_connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = dial("127.0.0.1", port, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DialError::ConnectFailed(_)));
    }

    #[tokio::test]
    async fn dial_times_out_when_connect_never_settles() {
        let timeout = Duration::from_millis(50);
        let err = dial_within(timeout, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, DialError::Timeout(d) if d == timeout));
    }

    #[tokio::test]
    async fn relays_both_directions_in_order() {
        let (mut client, client_peer) = socket_pair().await;
        let (target, mut target_peer) = socket_pair().await;

        let (_client_reader, client_writer) = client_peer.into_split();
        let mut relay = RelayPair::establish(client_writer, target);

        // client -> target
        relay.send_to_target(b"hello ").await.unwrap();
        relay.send_to_target(b"target").await.unwrap();
        let mut buf = [0u8; 12];
        target_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello target");
        assert_eq!(relay.bytes_sent(), 12);

        // target -> client
        target_peer.write_all(b"hi client").await.unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi client");

        // target closing ends the downstream direction
        drop(target_peer);
        assert_eq!(relay.closed().await.unwrap(), 9);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_target() {
        let (_client, client_peer) = socket_pair().await;
        let (target, mut target_peer) = socket_pair().await;

        let (_client_reader, client_writer) = client_peer.into_split();
        let mut relay = RelayPair::establish(client_writer, target);

        relay.close().await;
        relay.close().await;
        drop(relay);

        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), target_peer.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
