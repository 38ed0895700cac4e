//! Tunnel transports: raw TCP or a WebSocket byte-stream bridge

pub mod websocket;

use crate::common::net::configure_tcp_stream;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use rustls::pki_types::ServerName;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

static TLS_CLIENT_CONFIG: Lazy<Arc<rustls::ClientConfig>> = Lazy::new(|| {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
});

/// Anything the codec and relay treat as an ordered byte pipe.
pub trait ByteDuplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteDuplex for T {}

pub type BoxedDuplex = Box<dyn ByteDuplex>;

/// Tunnel transport flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Ws,
    Wss,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Ws => "ws",
            Transport::Wss => "wss",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Transport {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "ws" => Ok(Transport::Ws),
            "wss" => Ok(Transport::Wss),
            _ => Err(Error::config(format!("unsupported tunnel transport: {}", s))),
        }
    }
}

impl Transport {
    /// Dial the tunnel to a server (local peer). `ip` is the resolved
    /// address; `host` keeps the configured name for SNI and the WebSocket
    /// Host header.
    pub async fn dial(&self, ip: IpAddr, port: u16, host: &str) -> Result<BoxedDuplex> {
        let stream = TcpStream::connect((ip, port))
            .await
            .map_err(|e| Error::connection(format!("tunnel connect to {}:{}: {}", host, port, e)))?;
        configure_tcp_stream(&stream);

        match self {
            Transport::Tcp => Ok(Box::new(stream)),
            Transport::Ws => {
                let mut stream = stream;
                let ws_host = format!("{}:{}", host, port);
                websocket::client_handshake(&mut stream, &ws_host, "/").await?;
                Ok(Box::new(websocket::WsStream::new(stream, true)))
            }
            Transport::Wss => {
                let mut tls = tls_connect(stream, host).await?;
                let ws_host = format!("{}:{}", host, port);
                websocket::client_handshake(&mut tls, &ws_host, "/").await?;
                Ok(Box::new(websocket::WsStream::new(tls, true)))
            }
        }
    }

    /// Complete the transport on an accepted connection (server peer).
    pub async fn accept(
        &self,
        stream: TcpStream,
        tls: Option<&TlsAcceptor>,
    ) -> Result<BoxedDuplex> {
        configure_tcp_stream(&stream);

        match self {
            Transport::Tcp => Ok(Box::new(stream)),
            Transport::Ws => {
                let mut stream = stream;
                websocket::server_handshake(&mut stream).await?;
                Ok(Box::new(websocket::WsStream::new(stream, false)))
            }
            Transport::Wss => {
                let acceptor = tls
                    .ok_or_else(|| Error::config("wss listener requires tls_cert and tls_key"))?;
                let mut tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| Error::tls(e.to_string()))?;
                websocket::server_handshake(&mut tls_stream).await?;
                Ok(Box::new(websocket::WsStream::new(tls_stream, false)))
            }
        }
    }
}

async fn tls_connect(
    stream: TcpStream,
    host: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = TlsConnector::from(TLS_CLIENT_CONFIG.clone());

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::tls(format!("invalid TLS server name {}: {}", host, e)))?;

    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::tls(e.to_string()))?;
    Ok(tls)
}

/// Build a TLS acceptor from PEM cert/key files (server peer, wss).
pub fn tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::tls(format!("no certificates in {}", cert_path)));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| Error::tls(format!("no private key in {}", key_path)))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_parse() {
        assert_eq!(Transport::try_from("tcp").unwrap(), Transport::Tcp);
        assert_eq!(Transport::try_from("WS").unwrap(), Transport::Ws);
        assert_eq!(Transport::try_from("wss").unwrap(), Transport::Wss);
        assert!(Transport::try_from("quic").is_err());
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(Transport::Wss.to_string(), "wss");
    }
}
