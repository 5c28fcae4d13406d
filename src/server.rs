use crate::error::SessionError;
use crate::session::Session;
use anyhow::{Result, anyhow, bail};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{error, info};

/// Connection timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    pub timeout: Duration,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            timeout: DEFAULT_TIMEOUT,
            listener: None,
        }
    }

    /// with_timeout sets the bound on each outbound dial
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// bind to the listen address; fails when called twice
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("[ERR] listener already bound");
        }

        // Instantiate tokio listener
        let listener = tokio::time::timeout(self.timeout, TcpListener::bind(&self.listen_addr))
            .await
            .map_err(|_| anyhow!("[ERR] binding {} timed out", self.listen_addr))??;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// run_until serves connections until `shutdown` resolves, then closes
    /// the listener and aborts every in-flight session
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("[ERR] listener not bound"))?;

        serve(listener, self.timeout, shutdown).await
    }
}

/// Pause after a failed accept so fd exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept is the listening side of the server
trait Accept {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// serve accepts connections and spawns one session each until `shutdown`
/// resolves. Accept errors are logged and never end the loop.
async fn serve<A, F>(listener: A, timeout: Duration, shutdown: F) -> Result<()>
where
    A: Accept,
    F: Future<Output = ()>,
{
    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    // Listen for connections to proxy
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                // Accept incoming connection
                let (inbound, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                sessions.spawn(async move {
                    info!("new client: {peer_addr}");

                    // Send connection to connection handler
                    if let Err(e) = handle_connection(inbound, timeout).await {
                        error!("connection error: {e}");
                    }
                });
            }
            // Reap finished sessions
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    drop(listener);
    info!("listener closed, aborting {} sessions", sessions.len());
    sessions.shutdown().await;

    Ok(())
}

/// handle_connection runs the SOCKS5 session for one client
async fn handle_connection(stream: TcpStream, timeout: Duration) -> Result<(), SessionError> {
    Session::new(stream, timeout)?.run().await
}

/// start binds `listen_address:listen_port` and proxies until Ctrl-C
pub async fn start(listen_address: &str, listen_port: u16, timeout: Duration) -> Result<()> {
    let listen_addr = match listen_address.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, listen_port).to_string(),
        Err(_) => format!("{listen_address}:{listen_port}"),
    };

    let mut server = Socks5Server::new(listen_addr).with_timeout(timeout);
    server.bind().await?;
    info!("Connection timeout: {} seconds", timeout.as_secs());

    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown initiated by Ctrl-C"),
                Err(e) => {
                    error!("failed to listen for Ctrl-C: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}
