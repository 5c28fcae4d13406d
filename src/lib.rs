//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT to IPv4, IPv6 and domain name targets
//!     - No Authentication
//!     - Async using tokio, one task per session plus one per relay direction
//!     - Outbound dial bounded by a configurable timeout
//!     - Failures close the client connection without a SOCKS5 error reply
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use socksrelay::Socks5Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Socks5Server::new("127.0.0.1:1080").with_timeout(Duration::from_secs(5));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use address::{Host, TargetAddr};
pub use error::{DialError, ProtocolError, RelayError, SessionError};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use relay::{RelayPair, dial};
pub use server::{Socks5Server, start};
pub use session::{Session, State};
