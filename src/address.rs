use crate::error::ProtocolError;
use crate::protocol::AddressType;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Host is the destination named in a CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    IPv4(Ipv4Addr),
    DomainName(String),
    IPv6(Ipv6Addr),
}

/// TargetAddr is the parsed destination of a CONNECT request: address
/// and port. It only lives for the duration of request parsing and the dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: Host,
    pub port: u16,
}

impl TargetAddr {
    pub fn address_type(&self) -> AddressType {
        match self.host {
            Host::IPv4(_) => AddressType::IPv4,
            Host::DomainName(_) => AddressType::DomainName,
            Host::IPv6(_) => AddressType::IPv6,
        }
    }

    /// host_string returns the host as handed to the resolver: a domain
    /// name, or a literal IP without brackets
    pub fn host_string(&self) -> String {
        match &self.host {
            Host::IPv4(ip) => ip.to_string(),
            Host::DomainName(domain) => domain.clone(),
            Host::IPv6(ip) => ip.to_string(),
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::IPv4(ip) => write!(f, "{ip}:{}", self.port),
            Host::DomainName(domain) => write!(f, "{domain}:{}", self.port),
            Host::IPv6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

/// parse_target_address parses DST.ADDR and DST.PORT from a request
/// buffer, starting right after the ATYP byte at `offset`
pub fn parse_target_address(
    data: &[u8],
    offset: &mut usize,
    atyp: AddressType,
) -> Result<TargetAddr, ProtocolError> {
    let host = match atyp {
        AddressType::IPv4 => Host::IPv4(parse_ipv4_address(data, offset)?),
        AddressType::DomainName => Host::DomainName(parse_domain_address(data, offset)?),
        AddressType::IPv6 => Host::IPv6(parse_ipv6_address(data, offset)?),
    };
    let port = parse_port(data, offset)?;

    Ok(TargetAddr { host, port })
}

/// ensure checks that `len` more bytes are available past `offset`
fn ensure(data: &[u8], offset: usize, len: usize) -> Result<(), ProtocolError> {
    let needed = offset + len;
    if needed > data.len() {
        return Err(ProtocolError::Truncated {
            needed,
            got: data.len(),
        });
    }
    Ok(())
}

/// parse_ipv4_address parses an IPv4 address from a byte slice
pub fn parse_ipv4_address(data: &[u8], offset: &mut usize) -> Result<Ipv4Addr, ProtocolError> {
    ensure(data, *offset, 4)?;

    let mut octets = [0u8; 4];
    octets.copy_from_slice(&data[*offset..*offset + 4]);

    // Push offset past address -> 4 bytes
    *offset += 4;

    Ok(Ipv4Addr::from(octets))
}

/// parse_ipv6_address parses an IPv6 address from a byte slice
pub fn parse_ipv6_address(data: &[u8], offset: &mut usize) -> Result<Ipv6Addr, ProtocolError> {
    ensure(data, *offset, 16)?;

    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[*offset..*offset + 16]);

    // Push offset past address -> 16 bytes
    *offset += 16;

    Ok(Ipv6Addr::from(octets))
}

/// parse_domain_address parses a length-prefixed domain from a byte slice
pub fn parse_domain_address(data: &[u8], offset: &mut usize) -> Result<String, ProtocolError> {
    ensure(data, *offset, 1)?;

    // First octet contains the number of octets to follow
    let domain_len = data[*offset] as usize;
    if domain_len == 0 {
        return Err(ProtocolError::InvalidDomain);
    }
    ensure(data, *offset + 1, domain_len)?;

    // Push offset to start of domain
    *offset += 1;

    let domain = std::str::from_utf8(&data[*offset..*offset + domain_len])
        .map_err(|_| ProtocolError::InvalidDomain)?
        .to_string();

    *offset += domain_len;

    Ok(domain)
}

/// parse_port reads a big-endian (network order) port
pub fn parse_port(data: &[u8], offset: &mut usize) -> Result<u16, ProtocolError> {
    ensure(data, *offset, 2)?;

    let port = u16::from_be_bytes([data[*offset], data[*offset + 1]]);
    *offset += 2;

    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_consumes_length_prefix_and_name() {
        let data = [0x03, b'a', b'b', b'c', 0x01, 0xbb, 0xff];
        let mut offset = 0;
        let target = parse_target_address(&data, &mut offset, AddressType::DomainName).unwrap();

        assert_eq!(target.host, Host::DomainName("abc".into()));
        assert_eq!(target.port, 443);
        assert_eq!(offset, 6);
    }

    #[test]
    fn zero_length_domain_is_rejected() {
        let mut offset = 0;
        let err = parse_domain_address(&[0x00, 0x00, 0x50], &mut offset).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidDomain));
    }

    #[test]
    fn non_utf8_domain_is_rejected() {
        let mut offset = 0;
        let err = parse_domain_address(&[0x02, 0xff, 0xfe], &mut offset).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidDomain));
    }

    #[test]
    fn short_ipv4_reports_truncation() {
        let mut offset = 1;
        let err = parse_ipv4_address(&[0x00, 127, 0, 0], &mut offset).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 5, got: 4 }));
        assert_eq!(offset, 1);
    }

    #[test]
    fn ipv6_display_is_bracketed() {
        let target = TargetAddr {
            host: Host::IPv6(Ipv6Addr::LOCALHOST),
            port: 8080,
        };
        assert_eq!(target.to_string(), "[::1]:8080");
        assert_eq!(target.host_string(), "::1");
        assert_eq!(target.address_type(), AddressType::IPv6);
    }
}
