//! rps/src/server.rs
//! Per-listener acceptor: bind, gate on upstream readiness, spawn sessions.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::session;
use crate::state::{ACTIVE_CONN, SESSION_COUNTER, SESSIONS, TOTAL_CONN};
use crate::upstream::Upstreams;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tracing::{debug, error, info};

const TCP_KEEPALIVE_DELAY: Duration = Duration::from_secs(60);

pub struct Server {
    cfg: Arc<ServerConfig>,
    upstreams: Arc<Upstreams>,
}

impl Server {
    pub fn new(cfg: ServerConfig, upstreams: Arc<Upstreams>) -> Server {
        Server {
            cfg: Arc::new(cfg),
            upstreams,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listen = (self.cfg.listen.as_str(), self.cfg.port);
        let addr = lookup_host(listen)
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                Error::Config(format!(
                    "resolve {}:{} failed",
                    self.cfg.listen, self.cfg.port
                ))
            })?;
        Ok(TcpListener::bind(addr).await?)
    }

    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept loop. Blocks until the upstream pools have loaded once, so no
    /// client is handshaken against an empty registry.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.upstreams.ready().await;
        info!(
            "{} proxy run on {}:{}",
            self.cfg.proxy, self.cfg.listen, self.cfg.port
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.spawn_session(stream, peer),
                Err(e) => error!("accept error: {e}"),
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE_DELAY);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            debug!("set tcp keepalive: {e}");
        }

        TOTAL_CONN.fetch_add(1, Ordering::SeqCst);
        ACTIVE_CONN.fetch_add(1, Ordering::SeqCst);
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        debug!("accept request from {peer}");

        let cfg = Arc::clone(&self.cfg);
        let upstreams = Arc::clone(&self.upstreams);
        let handle = tokio::spawn(async move {
            session::handle(cfg, upstreams, id, stream, peer).await;
            ACTIVE_CONN.fetch_sub(1, Ordering::SeqCst);
            SESSIONS.remove(&id);
        });
        SESSIONS.insert(id, handle);
    }
}
