use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

fn default_listen_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_max_line_length() -> usize {
    8192
}

fn default_max_header_size() -> usize {
    8192
}

fn default_max_request_body_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_object_size() -> usize {
    102_400
}

fn default_cache_capacity() -> usize {
    1_049_000
}

fn default_relay_chunk_size() -> usize {
    8192
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Listen port; always taken from the command line.
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_listen_host")]
    pub listen_host: IpAddr,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
    #[serde(default = "default_max_object_size")]
    pub max_object_size: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_relay_chunk_size")]
    pub relay_chunk_size: usize,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CACHEPROXY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.port = cli.port;
        if let Some(log) = cli.log {
            settings.log = log;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Settings with every default applied, listening on `port`.
    pub fn with_defaults(port: u16) -> Self {
        Self {
            port,
            listen_host: default_listen_host(),
            log: default_log_format(),
            max_line_length: default_max_line_length(),
            max_header_size: default_max_header_size(),
            max_request_body_size: default_max_request_body_size(),
            max_object_size: default_max_object_size(),
            cache_capacity: default_cache_capacity(),
            relay_chunk_size: default_relay_chunk_size(),
            client_timeout: default_client_timeout(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_timeout: default_upstream_timeout(),
            max_connections: default_max_connections(),
            metrics_listen: None,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.port)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_line_length > 0,
            "max_line_length must be greater than 0 (got {})",
            self.max_line_length
        );
        ensure!(
            self.max_header_size >= self.max_line_length,
            "max_header_size ({}) must be at least max_line_length ({})",
            self.max_header_size,
            self.max_line_length
        );
        ensure!(
            self.max_object_size > 0,
            "max_object_size must be greater than 0 (got {})",
            self.max_object_size
        );
        ensure!(
            self.cache_capacity >= self.max_object_size,
            "cache_capacity ({}) must be at least max_object_size ({})",
            self.cache_capacity,
            self.max_object_size
        );
        ensure!(
            self.relay_chunk_size > 0,
            "relay_chunk_size must be greater than 0 (got {})",
            self.relay_chunk_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.max_connections > 0,
            "max_connections must be at least 1 (got {})",
            self.max_connections
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}
