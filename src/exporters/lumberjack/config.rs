// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rustls_pki_types::ServerName;

use crate::exporters::lumberjack::errors::PublisherError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Collector addresses as `host:port`.
    pub servers: Vec<String>,
    /// Deadline for each connect, handshake and send-plus-ack attempt.
    pub timeout: Duration,
    pub reconnect_backoff: Duration,
    /// Reported in the `host` pair of every event.
    pub hostname: String,
}

impl PublisherConfig {
    pub fn new(servers: Vec<String>, hostname: impl Into<String>) -> Self {
        Self {
            servers,
            timeout: DEFAULT_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            hostname: hostname.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn server_addrs(&self) -> Result<Vec<ServerAddr>, PublisherError> {
        if self.servers.is_empty() {
            return Err(PublisherError::Config("no servers configured".to_string()));
        }
        self.servers.iter().map(|s| s.parse()).collect()
    }
}

/// A collector endpoint. `host` is used both for resolution and as the TLS
/// server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for ServerAddr {
    type Err = PublisherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| {
            PublisherError::Config(format!("invalid server address {:?}: {}", s, why))
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
        // [::1]:5043
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        // the host doubles as the TLS server name
        ServerName::try_from(host).map_err(|_| invalid("not a DNS name or IP address"))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(ServerAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_server_addrs() {
        let addr: ServerAddr = "logs.example.com:5043".parse().unwrap();
        assert_eq!("logs.example.com", addr.host);
        assert_eq!(5043, addr.port);

        let addr: ServerAddr = "[::1]:5043".parse().unwrap();
        assert_eq!("::1", addr.host);
        assert_eq!("[::1]:5043", addr.to_string());

        assert!("logs.example.com".parse::<ServerAddr>().is_err());
        assert!("logs.example.com:http".parse::<ServerAddr>().is_err());
        assert!(":5043".parse::<ServerAddr>().is_err());
        assert!("host:70000".parse::<ServerAddr>().is_err());
        assert!("bad host:5043".parse::<ServerAddr>().is_err());
        assert!("10.0.0.7:5043".parse::<ServerAddr>().is_ok());
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let config = PublisherConfig::new(vec![], "h");
        assert!(matches!(config.server_addrs(), Err(PublisherError::Config(_))));

        let config = PublisherConfig::new(vec!["a:1".into(), "b".into()], "h");
        assert!(config.server_addrs().is_err());
    }
}
