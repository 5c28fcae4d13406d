//! Per-connection SOCKS5 state machine.
//!
//! A session reads the client one chunk at a time and interprets each chunk
//! according to its current state: greeting, then CONNECT request, then raw
//! payload. The outbound dial runs concurrently with the client reads, and
//! whatever the client sends while it is in flight is dropped.

use crate::address::TargetAddr;
use crate::codec::{GREETING_REPLY, decode_greeting, decode_request, success_reply};
use crate::error::{DialError, RelayError, SessionError};
use crate::relay::{RELAY_BUF_SIZE, RelayPair, dial};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{debug, info, trace};

/// State is where a session stands in the SOCKS5 exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the client greeting
    Init,
    /// Greeting answered; waiting for the CONNECT request or its dial
    AwaitTarget,
    /// Relaying payload between client and target
    Data,
}

type PendingDial = Pin<Box<dyn Future<Output = Result<TcpStream, DialError>> + Send>>;

/// Phase carries the data that only exists in a given state, so a relay is
/// present exactly when the session is in DATA
enum Phase {
    Init,
    AwaitTarget(Option<(TargetAddr, PendingDial)>),
    Data(RelayPair),
}

/// Event is something other than client bytes that moves the session on
enum Event {
    Dialed(Result<TcpStream, DialError>),
    TargetClosed(Result<u64, RelayError>),
}

/// Session drives one client connection from greeting to teardown
pub struct Session {
    peer: SocketAddr,
    reader: OwnedReadHalf,
    writer: Option<OwnedWriteHalf>,
    phase: Phase,
    timeout: Duration,
}

/// Session implementation block
impl Session {
    /// new wraps an accepted client connection; `timeout` bounds the
    /// outbound dial
    pub fn new(stream: TcpStream, timeout: Duration) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            peer,
            reader,
            writer: Some(writer),
            phase: Phase::Init,
            timeout,
        })
    }

    pub fn state(&self) -> State {
        match self.phase {
            Phase::Init => State::Init,
            Phase::AwaitTarget(_) => State::AwaitTarget,
            Phase::Data(_) => State::Data,
        }
    }

    /// run drives the session until either side closes or an error occurs.
    /// Both sockets are closed when this returns, whatever the outcome.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut buf = vec![0u8; RELAY_BUF_SIZE];

        loop {
            tokio::select! {
                read = self.reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        self.on_client_closed().await;
                        return Ok(());
                    }
                    self.on_client_bytes(&buf[..n]).await?;
                }
                event = next_event(&mut self.phase) => match event {
                    Event::Dialed(result) => self.on_dialed(result).await?,
                    Event::TargetClosed(result) => {
                        self.on_target_closed(result?).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    /// on_client_bytes interprets one chunk read from the client
    async fn on_client_bytes(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        trace!("{} [{:?}] received {:02x?}", self.peer, self.state(), chunk);

        match &mut self.phase {
            Phase::Init => {
                let greeting = decode_greeting(chunk)?;
                debug!(
                    "{} offered methods {:02x?} (no-auth offered: {})",
                    self.peer,
                    greeting.methods,
                    greeting.offers_no_auth()
                );

                self.reply(&GREETING_REPLY).await?;
                self.phase = Phase::AwaitTarget(None);
                debug!("{} sent no-auth response", self.peer);
            }
            Phase::AwaitTarget(None) => {
                let target = decode_request(chunk)?;
                debug!("{} requested {target}", self.peer);

                let host = target.host_string();
                let port = target.port;
                let timeout = self.timeout;
                let pending: PendingDial = Box::pin(async move { dial(&host, port, timeout).await });

                self.phase = Phase::AwaitTarget(Some((target, pending)));
            }
            Phase::AwaitTarget(Some(_)) => {
                debug!(
                    "{} dropped {} bytes received while dialing",
                    self.peer,
                    chunk.len()
                );
            }
            Phase::Data(relay) => relay.send_to_target(chunk).await?,
        }

        Ok(())
    }

    /// on_dialed answers the client once the outbound dial has settled
    async fn on_dialed(&mut self, result: Result<TcpStream, DialError>) -> Result<(), SessionError> {
        let target = match std::mem::replace(&mut self.phase, Phase::AwaitTarget(None)) {
            Phase::AwaitTarget(Some((target, _))) => target,
            other => {
                self.phase = other;
                return Ok(());
            }
        };

        // No SOCKS5 failure reply: the client only sees the connection close
        let outbound = result.map_err(|source| SessionError::Dial { target: target.clone(), source })?;

        let local = outbound.local_addr()?;
        self.reply(&success_reply(local)).await?;

        let writer = self.writer.take().ok_or_else(client_writer_gone)?;
        self.phase = Phase::Data(RelayPair::establish(writer, outbound));

        info!("{} connected to {target} via {local}", self.peer);
        Ok(())
    }

    async fn on_client_closed(&mut self) {
        match &mut self.phase {
            Phase::Data(relay) => {
                relay.close().await;
                info!(
                    "{} client closed the connection: {} bytes from client",
                    self.peer,
                    relay.bytes_sent()
                );
            }
            _ => debug!("{} client closed during {:?}", self.peer, self.state()),
        }
    }

    async fn on_target_closed(&mut self, received: u64) {
        if let Phase::Data(relay) = &mut self.phase {
            relay.close().await;
            info!(
                "{} connection closed: {} bytes from client, {} bytes from server",
                self.peer,
                relay.bytes_sent(),
                received
            );
        }
    }

    /// reply writes a handshake response to the client
    async fn reply(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(client_writer_gone)?;
        writer.write_all(bytes).await
    }
}

/// next_event resolves when the pending dial settles or, in DATA, when the
/// target side of the relay ends. It never resolves in the other states.
async fn next_event(phase: &mut Phase) -> Event {
    match phase {
        Phase::AwaitTarget(Some((_, pending))) => Event::Dialed(pending.await),
        Phase::Data(relay) => Event::TargetClosed(relay.closed().await),
        _ => std::future::pending().await,
    }
}

fn client_writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "client writer handed to relay")
}
