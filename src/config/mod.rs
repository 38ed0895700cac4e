//! Configuration module

use crate::crypto::CipherKind;
use crate::transport::Transport;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shared configuration for both peers, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server host (IP or hostname)
    pub server: String,

    /// Server listen/connect port
    pub server_port: u16,

    /// Local SOCKS5 bind address
    pub local_address: String,

    /// Local SOCKS5 port
    pub local_port: u16,

    /// Local HTTP CONNECT port (disabled when absent)
    pub local_http_port: Option<u16>,

    /// Shared password
    pub password: String,

    /// AEAD cipher method
    pub method: String,

    /// Session inactivity timeout in seconds
    pub timeout: u64,

    /// Tunnel transport: tcp, ws or wss
    pub tunnel: String,

    /// Upstream nameservers for the server peer (system config when empty)
    pub nameserver: Vec<String>,

    /// PEM certificate chain for the server peer's wss listener
    pub tls_cert: Option<String>,

    /// PEM private key for the server peer's wss listener
    pub tls_key: Option<String>,

    /// Log level
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        use crate::Error;

        if self.password.is_empty() {
            return Err(Error::config("password must not be empty"));
        }
        if self.timeout == 0 {
            return Err(Error::config("timeout must be positive"));
        }
        self.cipher()?;
        self.transport()?;
        Ok(())
    }

    pub fn cipher(&self) -> Result<CipherKind> {
        CipherKind::try_from(self.method.as_str())
    }

    pub fn transport(&self) -> Result<Transport> {
        Transport::try_from(self.tunnel.as_str())
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn local_addr(&self) -> String {
        format!("{}:{}", self.local_address, self.local_port)
    }

    pub fn local_http_addr(&self) -> Option<String> {
        self.local_http_port
            .map(|port| format!("{}:{}", self.local_address, port))
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.server_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: "127.0.0.1".to_string(),
            server_port: 8388,
            local_address: "127.0.0.1".to_string(),
            local_port: 1080,
            local_http_port: None,
            password: String::new(),
            method: "aes-256-gcm".to_string(),
            timeout: 300,
            tunnel: "tcp".to_string(),
            nameserver: Vec::new(),
            tls_cert: None,
            tls_key: None,
            log_level: Some("info".to_string()),
        }
    }
}
