//! rps/src/config.rs
//! JSON configuration loading and validation.

use crate::error::{Error, Result};
use crate::types::Proto;
use serde::Deserialize;
use std::path::Path;
use url::Url;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub servers: Vec<ServerConfig>,
    pub upstreams: UpstreamsConfig,
    pub api: ApiConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub proxy: Proto,
    pub listen: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Handshake/inactivity timeout in seconds for request contexts.
    #[serde(default = "default_server_timeout")]
    pub timeout: u64,
}

impl ServerConfig {
    /// Client authentication is enabled only when both credential fields
    /// are non-empty.
    pub fn auth_required(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamsConfig {
    #[serde(default)]
    pub hybrid: bool,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_maxreconn")]
    pub maxreconn: u32,
    #[serde(default = "default_maxretry")]
    pub maxretry: u32,
    pub pools: Vec<PoolConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub proto: Proto,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub url: String,
    /// Per-request timeout in seconds for pool refresh fetches.
    #[serde(default = "default_api_timeout")]
    pub timeout: u64,
    /// Refresh interval in seconds.
    #[serde(default = "default_api_interval")]
    pub interval: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_timeout() -> u64 {
    60
}

fn default_schedule() -> String {
    "rr".to_string()
}

fn default_maxreconn() -> u32 {
    2
}

fn default_maxretry() -> u32 {
    3
}

fn default_api_timeout() -> u64 {
    10
}

fn default_api_interval() -> u64 {
    60
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("read {}: {e}", path.as_ref().display()))
        })?;
        let config: Config =
            serde_json::from_str(&raw).map_err(|e| Error::Config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("no servers configured".into()));
        }
        for server in &self.servers {
            if server.proxy == Proto::HttpTunnel {
                return Err(Error::Config(
                    "server proxy must be one of socks4, socks5, http".into(),
                ));
            }
            if server.port == 0 {
                return Err(Error::Config(format!(
                    "invalid listen port for {} server",
                    server.proxy
                )));
            }
        }
        if self.upstreams.pools.is_empty() {
            return Err(Error::Config("no upstream pools configured".into()));
        }
        for pool in &self.upstreams.pools {
            if pool.proto == Proto::Socks4 {
                return Err(Error::Config(
                    "upstream pool proto must be one of socks5, http, http_tunnel".into(),
                ));
            }
        }
        Url::parse(&self.api.url)
            .map_err(|e| Error::Config(format!("invalid api url '{}': {e}", self.api.url)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> &'static str {
        r#"{
            "log": { "level": "debug" },
            "servers": [
                { "proxy": "http", "listen": "127.0.0.1", "port": 8080,
                  "username": "u", "password": "p" }
            ],
            "upstreams": {
                "hybrid": false,
                "schedule": "rr",
                "pools": [ { "proto": "socks5" }, { "proto": "http_tunnel" } ]
            },
            "api": { "url": "http://127.0.0.1:8000", "timeout": 5, "interval": 30 }
        }"#
    }

    #[test]
    fn parses_full_config() {
        let config: Config = serde_json::from_str(base_config()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.servers[0].proxy, Proto::Http);
        assert!(config.servers[0].auth_required());
        assert_eq!(config.servers[0].timeout, 60);
        assert_eq!(config.upstreams.maxretry, 3);
        assert_eq!(config.upstreams.pools.len(), 2);
        assert_eq!(config.api.interval, 30);
    }

    #[test]
    fn empty_credentials_disable_auth() {
        let mut config: Config = serde_json::from_str(base_config()).unwrap();
        config.servers[0].username.clear();
        assert!(!config.servers[0].auth_required());
    }

    #[test]
    fn rejects_socks4_pool() {
        let mut config: Config = serde_json::from_str(base_config()).unwrap();
        config.upstreams.pools.push(PoolConfig {
            proto: Proto::Socks4,
        });
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_api_url() {
        let mut config: Config = serde_json::from_str(base_config()).unwrap();
        config.api.url = "not a url".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unknown_proxy_tag() {
        let raw = base_config().replace("\"http\"", "\"ftp\"");
        assert!(serde_json::from_str::<Config>(&raw).is_err());
    }
}
