//! IPv4 resolver with caching and single-flight lookups

use super::DnsCache;
use crate::{Error, Result};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Hostname to IPv4 resolution for the server peer.
///
/// Literal IPs pass through unchanged. Results are cached (LRU, 60 s TTL)
/// and concurrent lookups for the same name share one upstream query.
pub struct Resolver {
    resolver: TokioAsyncResolver,
    cache: DnsCache,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Option<Ipv4Addr>>>>>,
}

impl Resolver {
    /// Create a resolver; an empty nameserver list means the system config.
    pub fn new(nameservers: &[String]) -> Result<Self> {
        let resolver = Self::build_resolver(nameservers)?;
        Ok(Resolver {
            resolver,
            cache: DnsCache::new(100),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    fn build_resolver(nameservers: &[String]) -> Result<TokioAsyncResolver> {
        if nameservers.is_empty() {
            return TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| Error::dns(format!("failed to create system resolver: {}", e)));
        }

        let mut config = ResolverConfig::new();
        for ns in nameservers {
            let addr: SocketAddr = if ns.contains(':') {
                ns.parse()
                    .map_err(|_| Error::config(format!("invalid nameserver: {}", ns)))?
            } else {
                format!("{}:53", ns)
                    .parse()
                    .map_err(|_| Error::config(format!("invalid nameserver: {}", ns)))?
            };
            config.add_name_server(NameServerConfig {
                socket_addr: addr,
                protocol: Protocol::Udp,
                tls_dns_name: None,
                trust_negative_responses: true,
                bind_addr: None,
            });
        }

        let mut opts = ResolverOpts::default();
        opts.cache_size = 0; // We use our own cache
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    /// Resolve a hostname to one IPv4 address.
    pub async fn resolve4(&self, host: &str) -> Result<Ipv4Addr> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ip);
        }

        if let Some(ip) = self.cache.get(host) {
            debug!("DNS {} -> {} (cache)", host, ip);
            return Ok(ip);
        }

        // Single-flight: concurrent callers for the same name await one cell.
        let cell = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = *cell
            .get_or_init(|| async { self.lookup(host).await.ok() })
            .await;
        self.inflight.lock().remove(host);

        match result {
            Some(ip) => {
                self.cache.put(host.to_string(), ip);
                debug!("DNS {} -> {}", host, ip);
                Ok(ip)
            }
            None => Err(Error::dns(format!("no IPv4 address for {}", host))),
        }
    }

    async fn lookup(&self, host: &str) -> Result<Ipv4Addr> {
        let response = self
            .resolver
            .ipv4_lookup(host)
            .await
            .map_err(|e| Error::dns(format!("lookup {} failed: {}", host, e)))?;
        response
            .iter()
            .next()
            .map(|a| a.0)
            .ok_or_else(|| Error::dns(format!("no IPv4 address for {}", host)))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
