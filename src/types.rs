//! rps/src/types.rs
//! Core data structures, type aliases, and constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Proxy protocol tag, shared by server instances, upstream pools, and
/// upstream records fetched from the control API.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Proto {
    Socks4,
    Socks5,
    Http,
    HttpTunnel,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Socks4 => "socks4",
            Proto::Socks5 => "socks5",
            Proto::Http => "http",
            Proto::HttpTunnel => "http_tunnel",
        }
    }

    /// Whether an upstream of this protocol can carry an opaque CONNECT
    /// tunnel. Plain `http` upstreams can only forward rewritten requests.
    pub fn connect_capable(&self) -> bool {
        matches!(self, Proto::Socks5 | Proto::HttpTunnel)
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the session a context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Forward,
}

/// The tunnel destination requested by a client. Domains are passed to the
/// upstream unresolved; the upstream performs its own resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl RemoteAddr {
    pub fn port(&self) -> u16 {
        match self {
            RemoteAddr::Ip(addr) => addr.port(),
            RemoteAddr::Domain(_, port) => *port,
        }
    }

    /// Host part in the form CONNECT request lines use. IPv6 literals are
    /// bracketed so the `host:port` form stays unambiguous.
    pub fn host_str(&self) -> String {
        match self {
            RemoteAddr::Ip(addr) if addr.is_ipv6() => format!("[{}]", addr.ip()),
            RemoteAddr::Ip(addr) => addr.ip().to_string(),
            RemoteAddr::Domain(domain, _) => domain.clone(),
        }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAddr::Ip(addr) => write!(f, "{addr}"),
            RemoteAddr::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}
