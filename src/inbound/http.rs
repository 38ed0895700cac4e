//! HTTP CONNECT inbound (local peer)
//!
//! Convenience front-end: a CONNECT request is mapped onto the same tunnel
//! path as a SOCKS5 CONNECT. Plain HTTP methods are refused.

use super::InboundListener;
use crate::common::{Address, Error};
use crate::outbound::TunnelDialer;
use crate::relay;
use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// HTTP CONNECT listener
pub struct HttpListener {
    listen: String,
    dialer: Arc<TunnelDialer>,
    idle_timeout: Duration,
    running: AtomicBool,
    sessions: AtomicU64,
}

impl HttpListener {
    pub fn new(listen: String, dialer: Arc<TunnelDialer>, idle_timeout: Duration) -> Self {
        HttpListener {
            listen,
            dialer,
            idle_timeout,
            running: AtomicBool::new(false),
            sessions: AtomicU64::new(0),
        }
    }

    async fn handle_connection(
        dialer: Arc<TunnelDialer>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        idle_timeout: Duration,
        session: u64,
    ) {
        if let Err(e) =
            Self::process_connection(&dialer, &mut stream, peer_addr, idle_timeout, session).await
        {
            debug!("session {}: HTTP connection from {}: {}", session, peer_addr, e);
        }
    }

    async fn process_connection(
        dialer: &TunnelDialer,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
        idle_timeout: Duration,
        session: u64,
    ) -> Result<()> {
        let head = read_request_head(stream).await?;
        let first_line = head.lines().next().unwrap_or("");

        // Request line: METHOD URI HTTP/VERSION
        let parts: Vec<&str> = first_line.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::protocol("invalid HTTP request line"));
        }
        let (method, uri) = (parts[0], parts[1]);

        if method != "CONNECT" {
            stream
                .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n")
                .await?;
            return Err(Error::unsupported(format!("HTTP method {}", method)));
        }

        let (address, port) = parse_host_port(uri)?;
        debug!(
            "session {}: HTTP CONNECT {} -> {}",
            session,
            peer_addr,
            address.to_string_with_port(port)
        );

        let tunnel = match dialer.dial(&address, port).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                stream
                    .write_all(b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n")
                    .await?;
                return Err(e);
            }
        };
        stream
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await?;

        let (sent, received) = relay::pipe(stream, tunnel, idle_timeout).await?;
        debug!(
            "session {}: closed {} -> {} (sent: {}, received: {})",
            session,
            peer_addr,
            address.to_string_with_port(port),
            sent,
            received
        );
        Ok(())
    }
}

/// Read the request head up to the blank line, without over-reading.
async fn read_request_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = String::new();
    let mut buf = [0u8; 1];
    loop {
        stream.read_exact(&mut buf).await?;
        head.push(buf[0] as char);
        if head.ends_with("\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > 8192 {
            return Err(Error::protocol("HTTP request head too long"));
        }
    }
}

/// Parse a CONNECT authority: `host:port`, with `[v6]:port` for IPv6.
fn parse_host_port(uri: &str) -> Result<(Address, u16)> {
    let (host, port) = if let Some(stripped) = uri.strip_prefix('[') {
        let end = stripped
            .find(']')
            .ok_or_else(|| Error::address(format!("invalid CONNECT target: {}", uri)))?;
        let host = &stripped[..end];
        let port = stripped[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| Error::address(format!("missing port in CONNECT target: {}", uri)))?;
        (host, port)
    } else {
        uri.rsplit_once(':')
            .ok_or_else(|| Error::address(format!("missing port in CONNECT target: {}", uri)))?
    };

    let port: u16 = port
        .parse()
        .map_err(|_| Error::address(format!("invalid port in CONNECT target: {}", uri)))?;
    Ok((Address::from(host.to_string()), port))
}

#[async_trait]
impl InboundListener for HttpListener {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        info!("HTTP CONNECT listening on {}", addr);

        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    crate::common::net::configure_tcp_stream(&stream);
                    let dialer = self.dialer.clone();
                    let idle_timeout = self.idle_timeout;
                    let session = self.sessions.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        Self::handle_connection(dialer, stream, peer_addr, idle_timeout, session)
                            .await;
                    });
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("HTTP accept error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
