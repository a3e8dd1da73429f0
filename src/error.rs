//! rps/src/error.rs
//! Error taxonomy shared by the whole crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes. Each maps to a fixed teardown action in the session
/// drivers; none of them crosses the session boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or disallowed wire input. The offending context is closed
    /// without a reply.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// Well-formed but disallowed input (non-CONNECT method, unsupported
    /// command). Replied per protocol, then closed.
    #[error("policy violation: {0}")]
    Policy(&'static str),

    /// Credentials absent or invalid. Replied per protocol (407 for HTTP,
    /// method/status rejection for SOCKS), then closed.
    #[error("authentication failed")]
    Auth,

    /// The inactivity timer fired.
    #[error("inactivity timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No viable upstream, or the upstream-side handshake failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Startup-only, fatal.
    #[error("config error: {0}")]
    Config(String),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
