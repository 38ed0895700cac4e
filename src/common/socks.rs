//! SOCKS5 protocol machinery (RFC 1928 subset: no-auth, CONNECT)

use super::net::Address;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Client greeting: VER NMETHODS METHODS[..]
#[derive(Debug)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        if head[0] != SOCKS5_VERSION {
            return Err(Error::protocol(format!(
                "unsupported SOCKS version: {}",
                head[0]
            )));
        }

        let mut methods = vec![0u8; head[1] as usize];
        reader.read_exact(&mut methods).await?;

        Ok(Greeting { methods })
    }

    pub fn supports(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

/// Write the method selection reply: VER METHOD
pub async fn write_method_selection<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: u8,
) -> Result<()> {
    writer.write_all(&[SOCKS5_VERSION, method]).await?;
    Ok(())
}

/// Fixed 4-byte request prefix: VER CMD RSV ATYP.
///
/// The address bytes are read separately so a listener can reply with the
/// right failure code before consuming them.
#[derive(Debug)]
pub struct RequestHead {
    pub command: u8,
    pub reserved: u8,
    pub atyp: u8,
}

impl RequestHead {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await?;

        if head[0] != SOCKS5_VERSION {
            return Err(Error::protocol(format!(
                "unsupported SOCKS version: {}",
                head[0]
            )));
        }

        Ok(RequestHead {
            command: head[1],
            reserved: head[2],
            atyp: head[3],
        })
    }
}

/// SOCKS5 reply: VER REP RSV ATYP BND.ADDR BND.PORT
pub struct Reply {
    pub code: u8,
    pub address: Address,
    pub port: u16,
}

impl Reply {
    pub fn success(address: Address, port: u16) -> Self {
        Reply {
            code: REP_SUCCEEDED,
            address,
            port,
        }
    }

    pub fn failure(code: u8) -> Self {
        Reply {
            code,
            address: Address::Ipv4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(3 + self.address.len());
        buf.extend_from_slice(&[SOCKS5_VERSION, self.code, 0x00]);
        buf.extend_from_slice(&self.address.to_bytes(self.port)?);
        writer.write_all(&buf).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_greeting_read() {
        let wire = [0x05u8, 0x02, 0x00, 0x02];
        let greeting = Greeting::read_from(&mut &wire[..]).await.unwrap();
        assert!(greeting.supports(AUTH_NO_AUTH));
        assert!(!greeting.supports(0x01));
    }

    #[tokio::test]
    async fn test_greeting_bad_version() {
        let wire = [0x04u8, 0x01, 0x00];
        assert!(Greeting::read_from(&mut &wire[..]).await.is_err());
    }

    #[tokio::test]
    async fn test_request_head() {
        let wire = [0x05u8, 0x01, 0x00, 0x03];
        let head = RequestHead::read_from(&mut &wire[..]).await.unwrap();
        assert_eq!(head.command, CMD_CONNECT);
        assert_eq!(head.atyp, 0x03);
    }

    #[tokio::test]
    async fn test_failure_reply_bytes() {
        let mut out = Vec::new();
        Reply::failure(REP_ADDRESS_TYPE_NOT_SUPPORTED)
            .write_to(&mut out)
            .await
            .unwrap();
        assert_eq!(out, [0x05, 0x08, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_success_reply_bytes() {
        let mut out = Vec::new();
        Reply::success(Address::Ipv4(std::net::Ipv4Addr::UNSPECIFIED), 0)
            .write_to(&mut out)
            .await
            .unwrap();
        assert_eq!(out, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }
}
