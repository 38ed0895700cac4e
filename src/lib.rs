//! ssgate - Shadowsocks-compatible AEAD tunnel
//!
//! Two peers share one wire format: the local peer accepts SOCKS5 (and
//! optionally HTTP CONNECT) traffic and forwards it through an
//! authenticated-encryption framing; the server peer decrypts, connects to
//! the requested destination and relays plaintext.
//!
//! # Architecture
//!
//! ```text
//!  client ----> inbound/ (SOCKS5, HTTP) ----> outbound/ (TunnelDialer)
//!                                                  |
//!                                     codec/ (CryptoStream = AEAD frames)
//!                                                  |
//!                                     transport/ (TCP | WebSocket | TLS)
//!                                                  |
//!                                   ~~~~~~~~~~ network ~~~~~~~~~~
//!                                                  |
//!  upstream <---- server/ <---- codec/ <---- transport/ (accept side)
//!                    |
//!                 dns/ (resolve4, LRU cache, single-flight)
//! ```
//!
//! The relay engine (`relay/`) sees only byte duplexes; crypto and
//! transport details stay behind `CryptoStream` and `ByteDuplex`.

pub mod codec;
pub mod common;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod inbound;
pub mod outbound;
pub mod relay;
pub mod server;
pub mod transport;

pub use common::error::{Error, Result};
pub use config::Config;

use std::sync::Arc;
use tracing::info;

pub const VERSION: &str = "0.9.2";

/// Local peer: front-end listeners wired to one tunnel dialer.
pub struct LocalGateway {
    inbounds: Vec<Arc<dyn inbound::InboundListener>>,
}

impl LocalGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let keys = crypto::KeyCache::new();
        let resolver = Arc::new(dns::Resolver::new(&config.nameserver)?);
        let dialer = Arc::new(outbound::TunnelDialer::new(config, &keys, resolver)?);

        info!(
            "tunnel target {} via {}",
            config.server_addr(),
            config.tunnel
        );

        let mut inbounds: Vec<Arc<dyn inbound::InboundListener>> = Vec::new();

        inbounds.push(Arc::new(inbound::Socks5Listener::new(
            config.local_addr(),
            dialer.clone(),
            config.timeout_duration(),
        )));
        info!("SOCKS5 front-end configured on {}", config.local_addr());

        if let Some(http_addr) = config.local_http_addr() {
            inbounds.push(Arc::new(inbound::HttpListener::new(
                http_addr.clone(),
                dialer,
                config.timeout_duration(),
            )));
            info!("HTTP CONNECT front-end configured on {}", http_addr);
        }

        Ok(LocalGateway { inbounds })
    }

    /// Run until a shutdown signal, or until a listener fails.
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Error>(1);

        for inbound in &self.inbounds {
            let inbound = inbound.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = inbound.start().await {
                    let _ = tx.send(e).await;
                }
            });
        }
        drop(tx);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                for inbound in &self.inbounds {
                    let _ = inbound.stop().await;
                }
                Ok(())
            }
            maybe_err = rx.recv() => match maybe_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}
