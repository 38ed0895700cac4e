//! Server peer: decrypts tunnel streams and relays plaintext upstream

use crate::codec::{CryptoStream, Decryptor, Encryptor};
use crate::common::net::configure_tcp_stream;
use crate::common::{Address, Error};
use crate::config::Config;
use crate::crypto::{CipherKind, KeyCache};
use crate::dns::Resolver;
use crate::inbound::InboundListener;
use crate::relay;
use crate::transport::{tls_acceptor, BoxedDuplex, Transport};
use crate::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Shadowsocks server listener
pub struct Server {
    listen: String,
    cipher: CipherKind,
    master_key: Bytes,
    transport: Transport,
    tls: Option<TlsAcceptor>,
    idle_timeout: Duration,
    resolver: Arc<Resolver>,
    running: AtomicBool,
    sessions: AtomicU64,
}

impl Server {
    pub fn new(config: &Config, keys: &KeyCache, resolver: Arc<Resolver>) -> Result<Self> {
        let cipher = config.cipher()?;
        let master_key = keys.master_key(&config.password, cipher.key_len());
        let transport = config.transport()?;

        let tls = if transport == Transport::Wss {
            let cert = config
                .tls_cert
                .as_deref()
                .ok_or_else(|| Error::config("wss tunnel requires tls_cert"))?;
            let key = config
                .tls_key
                .as_deref()
                .ok_or_else(|| Error::config("wss tunnel requires tls_key"))?;
            Some(tls_acceptor(cert, key)?)
        } else {
            None
        };

        Ok(Server {
            listen: format!("0.0.0.0:{}", config.server_port),
            cipher,
            master_key,
            transport,
            tls,
            idle_timeout: config.timeout_duration(),
            resolver,
            running: AtomicBool::new(false),
            sessions: AtomicU64::new(0),
        })
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr, session: u64) {
        if let Err(e) = self.process_connection(stream, peer_addr, session).await {
            // One teardown path regardless of cause: a tampered stream and a
            // reset look the same to the peer.
            debug!("session {}: tunnel from {}: {}", session, peer_addr, e);
        }
    }

    async fn process_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        session: u64,
    ) -> Result<()> {
        let mut duplex: BoxedDuplex = timeout(
            self.idle_timeout,
            self.transport.accept(stream, self.tls.as_ref()),
        )
        .await
        .map_err(|_| Error::timeout("transport handshake timed out"))??;

        // Decrypt in hold mode until the first frame yields the destination
        // header. Bytes decoded past that frame stay withheld, which is the
        // pre-connect buffer.
        let mut decryptor = Decryptor::new(self.cipher, self.master_key.clone()).with_hold();
        let mut buf = [0u8; 4096];
        let first_payload = loop {
            let n = timeout(self.idle_timeout, duplex.read(&mut buf))
                .await
                .map_err(|_| Error::timeout("idle before address header"))??;
            if n == 0 {
                return Err(Error::protocol("peer closed before address header"));
            }
            decryptor.push(&buf[..n])?;
            if let Some(payload) = decryptor.take_first_payload() {
                break payload;
            }
        };

        let (address, port, consumed) = Address::from_bytes(&first_payload)?;
        debug!(
            "session {}: {} requests {}",
            session,
            peer_addr,
            address.to_string_with_port(port)
        );

        let dest_ip = match &address {
            Address::Ipv4(ip) => IpAddr::V4(*ip),
            Address::Ipv6(ip) => IpAddr::V6(*ip),
            Address::Domain(domain) => IpAddr::V4(self.resolver.resolve4(domain).await?),
        };

        let mut upstream = timeout(self.idle_timeout, TcpStream::connect((dest_ip, port)))
            .await
            .map_err(|_| Error::timeout("upstream connect timed out"))?
            .map_err(|e| {
                Error::connection(format!(
                    "upstream {} failed: {}",
                    address.to_string_with_port(port),
                    e
                ))
            })?;
        configure_tcp_stream(&upstream);

        // Flush everything decoded before the upstream existed, in order.
        decryptor.resume();
        let mut early = BytesMut::from(&first_payload[consumed..]);
        let held = decryptor.pull(usize::MAX);
        early.extend_from_slice(&held);
        if !early.is_empty() {
            upstream.write_all(&early).await?;
        }

        let encryptor = Encryptor::new(self.cipher, &self.master_key)?;
        let crypto = CryptoStream::from_parts(duplex, encryptor, decryptor);

        let (received, sent) = relay::pipe(crypto, upstream, self.idle_timeout).await?;
        debug!(
            "session {}: closed {} -> {} (received: {}, sent: {})",
            session,
            peer_addr,
            address.to_string_with_port(port),
            received,
            sent
        );
        Ok(())
    }
}

#[async_trait]
impl InboundListener for Arc<Server> {
    fn name(&self) -> &str {
        "shadowsocks-server"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        info!(
            "server listening on {} ({} tunnel, {})",
            addr, self.transport, self.cipher
        );

        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    configure_tcp_stream(&stream);
                    let server = self.clone();
                    let session = self.sessions.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer_addr, session).await;
                    });
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("server accept error: {}", e);
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
