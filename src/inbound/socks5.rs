//! SOCKS5 inbound (local peer)

use super::InboundListener;
use crate::common::socks::{
    write_method_selection, Greeting, Reply, RequestHead, AUTH_NO_ACCEPTABLE, AUTH_NO_AUTH,
    CMD_CONNECT, REP_ADDRESS_TYPE_NOT_SUPPORTED, REP_COMMAND_NOT_SUPPORTED, REP_CONNECTION_REFUSED,
};
use crate::common::{Address, Error};
use crate::outbound::TunnelDialer;
use crate::relay;
use crate::Result;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// SOCKS5 listener
pub struct Socks5Listener {
    listen: String,
    dialer: Arc<TunnelDialer>,
    idle_timeout: Duration,
    running: AtomicBool,
    sessions: AtomicU64,
}

impl Socks5Listener {
    pub fn new(listen: String, dialer: Arc<TunnelDialer>, idle_timeout: Duration) -> Self {
        Socks5Listener {
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
            debug!("session {}: SOCKS5 connection from {}: {}", session, peer_addr, e);
        }
    }

    async fn process_connection(
        dialer: &TunnelDialer,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
        idle_timeout: Duration,
        session: u64,
    ) -> Result<()> {
        // Phase 1: greeting and method selection
        let greeting = Greeting::read_from(stream).await?;
        if !greeting.supports(AUTH_NO_AUTH) {
            write_method_selection(stream, AUTH_NO_ACCEPTABLE).await?;
            return Err(Error::protocol("no acceptable authentication method"));
        }
        write_method_selection(stream, AUTH_NO_AUTH).await?;

        // Phase 2: request
        let head = RequestHead::read_from(stream).await?;
        if head.command != CMD_CONNECT {
            Reply::failure(REP_COMMAND_NOT_SUPPORTED)
                .write_to(stream)
                .await?;
            return Err(Error::unsupported(format!(
                "SOCKS5 command {}",
                head.command
            )));
        }
        if head.reserved != 0 {
            warn!(
                "session {}: non-zero RSV byte {} in SOCKS5 request",
                session, head.reserved
            );
        }

        let (address, port) = match Address::read_tail(stream, head.atyp).await {
            Ok(parsed) => parsed,
            Err(e @ Error::Address(_)) => {
                Reply::failure(REP_ADDRESS_TYPE_NOT_SUPPORTED)
                    .write_to(stream)
                    .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!(
            "session {}: SOCKS5 CONNECT {} -> {}",
            session,
            peer_addr,
            address.to_string_with_port(port)
        );

        // The success reply is only written once the tunnel transport is
        // actually connected.
        let tunnel = match dialer.dial(&address, port).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                Reply::failure(REP_CONNECTION_REFUSED).write_to(stream).await?;
                return Err(e);
            }
        };
        Reply::success(Address::Ipv4(Ipv4Addr::UNSPECIFIED), 0)
            .write_to(stream)
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

#[async_trait]
impl InboundListener for Socks5Listener {
    fn name(&self) -> &str {
        "SOCKS5"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        info!("SOCKS5 listening on {}", addr);

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
                        error!("SOCKS5 accept error: {}", e);
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
