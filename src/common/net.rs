//! Network utilities and the tunnel address header

use crate::{Error, Result};
use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let _ = sock.set_reuse_address(true);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let _ = sock.set_reuse_port(true);
}

/// Destination address as carried in SOCKS5 requests and in the tunnel's
/// first encrypted payload. Domain names are kept verbatim; resolution is
/// the resolver's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Parse one address header from the start of `buf`.
    ///
    /// Returns the parsed address, the port, and the number of bytes
    /// consumed; `buf[consumed..]` is the remainder (first tunneled payload
    /// bytes on the server peer).
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, u16, usize)> {
        if buf.is_empty() {
            return Err(Error::address("empty address header"));
        }

        match buf[0] {
            ATYP_IPV4 => {
                if buf.len() < 1 + 4 + 2 {
                    return Err(Error::address("short IPv4 address header"));
                }
                let addr = Address::Ipv4(Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]));
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok((addr, port, 7))
            }
            ATYP_DOMAIN => {
                if buf.len() < 2 {
                    return Err(Error::address("short domain address header"));
                }
                let len = buf[1] as usize;
                if buf.len() < 2 + len + 2 {
                    return Err(Error::address("short domain address header"));
                }
                let domain = String::from_utf8(buf[2..2 + len].to_vec())
                    .map_err(|e| Error::address(format!("invalid domain: {}", e)))?;
                let port = u16::from_be_bytes([buf[2 + len], buf[2 + len + 1]]);
                Ok((Address::Domain(domain), port, 2 + len + 2))
            }
            ATYP_IPV6 => {
                if buf.len() < 1 + 16 + 2 {
                    return Err(Error::address("short IPv6 address header"));
                }
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[1..17]);
                let addr = Address::Ipv6(Ipv6Addr::from(ip));
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                Ok((addr, port, 19))
            }
            t => Err(Error::address(format!("unknown address type: {}", t))),
        }
    }

    /// Emit the address header (ATYP + address + big-endian port).
    pub fn to_bytes(&self, port: u16) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len());
        match self {
            Address::Ipv4(ip) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                if bytes.len() > 255 {
                    return Err(Error::address("domain name too long"));
                }
                buf.push(ATYP_DOMAIN);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
        Ok(buf)
    }

    /// Read the address/port following an already-consumed ATYP byte.
    pub async fn read_tail<R: AsyncRead + Unpin>(reader: &mut R, atyp: u8) -> Result<(Self, u16)> {
        match atyp {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((addr, port))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                buf.truncate(len);
                let domain = String::from_utf8(buf)
                    .map_err(|e| Error::address(format!("invalid domain: {}", e)))?;
                Ok((Address::Domain(domain), port))
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                let addr = Address::Ipv6(Ipv6Addr::from(ip));
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((addr, port))
            }
            t => Err(Error::address(format!("unknown address type: {}", t))),
        }
    }

    /// Get bytes length
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,             // atyp + ip + port
            Address::Ipv6(_) => 1 + 16 + 2,            // atyp + ip + port
            Address::Domain(d) => 1 + 1 + d.len() + 2, // atyp + len + domain + port
        }
    }

    /// Convert to string representation
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }

    /// Get as IP if already literal
    pub fn to_ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }

    /// Get as host string
    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => ip.to_string(),
            Address::Domain(d) => d.clone(),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::Ipv6(ip)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(domain: String) -> Self {
        if let Ok(ip) = domain.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = domain.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_ip() {
        let addr = Address::from(Ipv4Addr::new(127, 0, 0, 1));
        assert!(matches!(addr, Address::Ipv4(_)));
    }

    #[test]
    fn test_address_from_domain() {
        let addr = Address::from("example.com".to_string());
        assert!(matches!(addr, Address::Domain(_)));
    }

    #[test]
    fn test_address_len() {
        let ipv4 = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(ipv4.len(), 7);

        let domain = Address::Domain("example.com".to_string());
        assert_eq!(domain.len(), 1 + 1 + 11 + 2);
    }

    #[test]
    fn test_header_round_trip_ipv4() {
        let addr = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1));
        let bytes = addr.to_bytes(9).unwrap();
        let (parsed, port, consumed) = Address::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(port, 9);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_header_round_trip_ipv6() {
        let addr = Address::Ipv6("2001:db8::1".parse().unwrap());
        let bytes = addr.to_bytes(443).unwrap();
        let (parsed, port, consumed) = Address::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(port, 443);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_header_round_trip_max_domain() {
        let domain = "a".repeat(255);
        let addr = Address::Domain(domain.clone());
        let bytes = addr.to_bytes(65535).unwrap();
        assert_eq!(bytes.len(), 1 + 1 + 255 + 2);
        let (parsed, port, consumed) = Address::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, Address::Domain(domain));
        assert_eq!(port, 65535);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_header_remainder() {
        let addr = Address::Domain("example.com".to_string());
        let mut bytes = addr.to_bytes(80).unwrap();
        bytes.extend_from_slice(b"GET / HTTP/1.1");
        let (_, _, consumed) = Address::from_bytes(&bytes).unwrap();
        assert_eq!(&bytes[consumed..], b"GET / HTTP/1.1");
    }

    #[test]
    fn test_header_short_input() {
        let addr = Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1));
        let bytes = addr.to_bytes(80).unwrap();
        assert!(Address::from_bytes(&bytes[..5]).is_err());
    }

    #[test]
    fn test_header_unknown_atyp() {
        assert!(Address::from_bytes(&[0x02, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_domain_too_long() {
        let addr = Address::Domain("a".repeat(256));
        assert!(addr.to_bytes(80).is_err());
    }
}
