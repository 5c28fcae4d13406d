//! SOCKS5 handshake framing. Pure byte transforms, no socket I/O.
//!
//! Each decoder works on a single chunk as delivered by one read; a
//! message split across reads is reported as [`ProtocolError::Truncated`].

use crate::address::{TargetAddr, parse_target_address};
use crate::error::ProtocolError;
use crate::protocol::{AddressType, AuthMethod, Command, RSV, ReplyCode, Version};
use std::net::{Ipv4Addr, SocketAddr};

/// Greeting is the decoded client hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Authentication methods offered by the client
    pub methods: Vec<u8>,
}

impl Greeting {
    pub fn offers_no_auth(&self) -> bool {
        self.methods.contains(&(AuthMethod::NoAuth as u8))
    }
}

/// Reply to every greeting: no authentication required, whatever the
/// client offered
pub const GREETING_REPLY: [u8; 2] = [Version::SOCKS5 as u8, AuthMethod::NoAuth as u8];

/// Length of a success reply carrying an IPv4 bound address
pub const SUCCESS_REPLY_LEN: usize = 10;

/// decode_greeting validates a client hello
pub fn decode_greeting(data: &[u8]) -> Result<Greeting, ProtocolError> {
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    check_version(data)?;

    let n_methods = *data.get(1).ok_or(ProtocolError::Truncated {
        needed: 2,
        got: data.len(),
    })? as usize;

    let methods = data
        .get(2..2 + n_methods)
        .ok_or(ProtocolError::Truncated {
            needed: 2 + n_methods,
            got: data.len(),
        })?
        .to_vec();

    Ok(Greeting { methods })
}

/// decode_request parses a CONNECT request into its target
pub fn decode_request(data: &[u8]) -> Result<TargetAddr, ProtocolError> {
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    check_version(data)?;

    if data.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            got: data.len(),
        });
    }

    // RSV (data[2]) is not checked
    let command = data[1];
    match Command::from_byte(command) {
        Some(Command::Connect) => {}
        _ => return Err(ProtocolError::UnsupportedCommand(command)),
    }

    let atyp = AddressType::from_byte(data[3]).ok_or(ProtocolError::BadAddressType(data[3]))?;

    let mut offset = 4;
    parse_target_address(data, &mut offset, atyp)
}

/// encode_success_reply builds the fixed 10 byte success reply
pub fn encode_success_reply(bound_addr: u32, bound_port: u16) -> [u8; SUCCESS_REPLY_LEN] {
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   |    4     |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut reply = [0u8; SUCCESS_REPLY_LEN];
    reply[0] = Version::SOCKS5 as u8;
    reply[1] = ReplyCode::Succeeded as u8;
    reply[2] = RSV;
    reply[3] = AddressType::IPv4 as u8;
    reply[4..8].copy_from_slice(&bound_addr.to_be_bytes());
    reply[8..].copy_from_slice(&bound_port.to_be_bytes());
    reply
}

/// success_reply encodes the local address of the outbound socket.
/// Replies are always IPv4 shaped: an IPv6 local address is sent as its
/// mapped IPv4 form when it has one, else as 0.0.0.0.
pub fn success_reply(local: SocketAddr) -> [u8; SUCCESS_REPLY_LEN] {
    let ip = match local {
        SocketAddr::V4(addr) => *addr.ip(),
        SocketAddr::V6(addr) => addr.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    };
    encode_success_reply(u32::from(ip), local.port())
}

fn check_version(data: &[u8]) -> Result<(), ProtocolError> {
    match data.first() {
        None => Err(ProtocolError::Truncated { needed: 1, got: 0 }),
        Some(&v) if v != Version::SOCKS5 as u8 => Err(ProtocolError::BadVersion(v)),
        Some(_) => Ok(()),
    }
}
