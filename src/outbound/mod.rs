//! Tunnel dialer for the local peer

use crate::codec::CryptoStream;
use crate::common::Address;
use crate::config::Config;
use crate::crypto::{CipherKind, KeyCache};
use crate::dns::Resolver;
use crate::transport::{BoxedDuplex, Transport};
use crate::Result;
use bytes::Bytes;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::debug;

/// Dials the remote peer and wires the AEAD codec over the transport.
///
/// `dial` returns a stream whose first encrypted frame already carries the
/// destination header, so the caller only relays from there on.
pub struct TunnelDialer {
    server: String,
    server_port: u16,
    cipher: CipherKind,
    master_key: Bytes,
    transport: Transport,
    connect_timeout: Duration,
    resolver: Arc<Resolver>,
}

impl TunnelDialer {
    pub fn new(config: &Config, keys: &KeyCache, resolver: Arc<Resolver>) -> Result<Self> {
        let cipher = config.cipher()?;
        let master_key = keys.master_key(&config.password, cipher.key_len());

        Ok(TunnelDialer {
            server: config.server.clone(),
            server_port: config.server_port,
            cipher,
            master_key,
            transport: config.transport()?,
            connect_timeout: config.timeout_duration(),
            resolver,
        })
    }

    /// Connect the tunnel and send `address:port` as the first payload.
    pub async fn dial(&self, address: &Address, port: u16) -> Result<CryptoStream<BoxedDuplex>> {
        let server_ip = self.resolver.resolve4(&self.server).await?;

        let duplex = timeout(
            self.connect_timeout,
            self.transport
                .dial(IpAddr::V4(server_ip), self.server_port, &self.server),
        )
        .await??;
        debug!(
            "tunnel {} connected to {}:{}",
            self.transport, self.server, self.server_port
        );

        let mut stream = CryptoStream::new(duplex, self.cipher, self.master_key.clone())?;
        let header = address.to_bytes(port)?;
        stream.write_all(&header).await?;
        stream.flush().await?;

        Ok(stream)
    }
}
