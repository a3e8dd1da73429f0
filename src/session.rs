//! rps/src/session.rs
//! Session and context lifecycle, protocol handshake drivers, and the
//! bidirectional tunnel relay.
//!
//! Each accepted connection is one session holding two contexts: the
//! request context (client side) and the forward context (upstream side),
//! relayed back-to-back once both handshakes complete.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::socks4;
use crate::socks5;
use crate::state::{TOTAL_BYTES_RECV, TOTAL_BYTES_SENT};
use crate::types::{Proto, RemoteAddr, Role};
use crate::upstream::{Upstream, Upstreams};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, error, trace, warn};

/// Idle budget for established tunnels; handshake phases use the
/// per-server timeout instead.
pub const TUNNEL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const RELAY_BUF_SIZE: usize = 4096;
const HANDSHAKE_MAX_LENGTH: usize = 4096;
const AUTH_REALM: &str = "rps";

/// Context lifecycle. States only ever move forward; `Kill` is the error
/// funnel that leads into `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    Handshake,
    AuthResp,
    Exchange,
    ForwardConnect,
    ForwardHandshake,
    Tunnel,
    Kill,
    Closing,
    Closed,
}

/// Per-socket state for one end of a proxy flow.
pub struct Context {
    role: Role,
    state: State,
    stream: Option<TcpStream>,
    peer: String,
    timeout: Duration,
}

impl Context {
    fn new(role: Role, timeout: Duration) -> Context {
        Context {
            role,
            state: State::Init,
            stream: None,
            peer: String::new(),
            timeout,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// A context owns a live socket exactly while this is true.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn advance(&mut self, next: State) {
        assert!(
            next >= self.state,
            "context state may only move forward: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    pub fn attach(&mut self, stream: TcpStream, peer: String) {
        debug_assert!(self.stream.is_none(), "context already owns a socket");
        self.stream = Some(stream);
        self.peer = peer;
    }

    fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("context has no open socket")
    }

    /// Close an open context: graceful shutdown, then release the socket.
    pub async fn close(&mut self) {
        assert!(self.stream.is_some(), "close requires an open socket");
        self.advance(State::Closing);
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.advance(State::Closed);
        match self.role {
            Role::Request => debug!("request from {} closed", self.peer),
            Role::Forward => debug!("forward to {} closed", self.peer),
        }
    }

    pub async fn close_if_open(&mut self) {
        if self.stream.is_some() {
            self.close().await;
        }
    }
}

/// One end-to-end client flow: the request context paired with the
/// forward context.
pub struct Session {
    pub id: u64,
    pub request: Context,
    pub forward: Context,
}

impl Session {
    pub fn new(id: u64, timeout: Duration) -> Session {
        Session {
            id,
            request: Context::new(Role::Request, timeout),
            forward: Context::new(Role::Forward, timeout),
        }
    }

    /// Release the session. Both contexts must have given up their sockets.
    pub fn finish(&self) {
        assert!(
            !self.request.is_connected() && !self.forward.is_connected(),
            "session released with a connected context"
        );
        trace!(sess = self.id, "session released");
    }
}

/// Drive one accepted connection to completion and tear it down.
pub async fn handle(
    cfg: Arc<ServerConfig>,
    upstreams: Arc<Upstreams>,
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let mut sess = Session::new(id, Duration::from_secs(cfg.timeout));
    sess.request.attach(stream, peer.to_string());
    sess.request.advance(State::Handshake);

    match drive(&mut sess, &cfg, &upstreams).await {
        Ok((sent, received)) => {
            debug!(
                sess = id,
                "session finished, {} bytes out, {} bytes in", sent, received
            );
        }
        Err(e) => {
            match &e {
                Error::Auth | Error::Timeout | Error::Io(_) => {
                    debug!(sess = id, peer = %sess.request.peer, "{e}");
                }
                Error::Parse(_) | Error::Policy(_) => {
                    warn!(sess = id, peer = %sess.request.peer, "{e}");
                }
                _ => error!(sess = id, peer = %sess.request.peer, "{e}"),
            }
            if !matches!(e, Error::Auth) {
                if sess.request.state() < State::Kill {
                    sess.request.advance(State::Kill);
                }
                if sess.forward.state() < State::Kill {
                    sess.forward.advance(State::Kill);
                }
            }
        }
    }

    sess.request.close_if_open().await;
    sess.forward.close_if_open().await;
    sess.finish();
}

async fn drive(
    sess: &mut Session,
    cfg: &ServerConfig,
    upstreams: &Upstreams,
) -> Result<(u64, u64)> {
    let remote = match cfg.proxy {
        Proto::Http => http_handshake(sess, cfg).await?,
        Proto::Socks5 => socks5_handshake(sess, cfg).await?,
        Proto::Socks4 => socks4_handshake(sess, cfg).await?,
        Proto::HttpTunnel => {
            return Err(Error::Config("http_tunnel is not a server protocol".into()));
        }
    };
    sess.request.advance(State::Exchange);
    debug!(sess = sess.id, "tunnel request for {remote}");

    // CONNECT tunnels ride connect-capable pools; socks4 clients are
    // forwarded through the socks5 pool.
    let pool_proto = match cfg.proxy {
        Proto::Http => Proto::HttpTunnel,
        _ => Proto::Socks5,
    };

    let upstream = match connect_upstream(upstreams, pool_proto, &mut sess.forward).await {
        Ok(upstream) => upstream,
        Err(e) => {
            reply_unavailable(sess, cfg).await;
            return Err(e);
        }
    };

    let early = match forward_handshake(&mut sess.forward, &upstream, &remote).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if matches!(e, Error::Upstream(_)) {
                reply_unavailable(sess, cfg).await;
            }
            return Err(e);
        }
    };

    // the client hears success only once the upstream leg stands
    reply_established(sess, cfg).await?;

    relay(sess, early).await
}

/// Request-side HTTP CONNECT handshake: parse, check, authenticate.
async fn http_handshake(sess: &mut Session, cfg: &ServerConfig) -> Result<RemoteAddr> {
    let ctx = &mut sess.request;
    let dur = ctx.timeout;
    let mut buf = Vec::with_capacity(1024);
    read_http_head(ctx.stream_mut(), dur, &mut buf).await?;

    // the whole buffer goes to the parser so trailing junk is caught
    let req = http::Request::parse(&buf)?;
    req.dump();

    let remote = match req.host.parse::<IpAddr>() {
        Ok(ip) => RemoteAddr::Ip(SocketAddr::new(ip, req.port)),
        Err(_) => RemoteAddr::Domain(req.host.clone(), req.port),
    };

    if !cfg.auth_required() {
        return Ok(remote);
    }

    let Some(credentials) = req.header("proxy-authorization") else {
        auth_challenge(ctx).await?;
        return Err(Error::Auth);
    };
    let auth = http::parse_request_auth(credentials.as_bytes())?;
    if auth.schema != http::AuthSchema::Basic {
        warn!("only http basic authentication supported");
        auth_challenge(ctx).await?;
        return Err(Error::Auth);
    }
    if !http::basic_auth(&auth.param, &cfg.username, &cfg.password) {
        debug!("http client authentication failed");
        auth_challenge(ctx).await?;
        return Err(Error::Auth);
    }
    trace!("http client authentication success");
    Ok(remote)
}

/// 407 challenge; the caller closes the context afterwards.
async fn auth_challenge(ctx: &mut Context) -> Result<()> {
    ctx.advance(State::AuthResp);
    let mut resp = http::Response::new(407);
    resp.headers.insert(
        "Proxy-Authenticate".into(),
        format!("Basic realm=\"{AUTH_REALM}\""),
    );
    let bytes = resp.message();
    let dur = ctx.timeout;
    timeout(dur, ctx.stream_mut().write_all(&bytes)).await??;
    Ok(())
}

/// Request-side SOCKS5 handshake: method negotiation, optional RFC 1929
/// subnegotiation, connect request.
async fn socks5_handshake(sess: &mut Session, cfg: &ServerConfig) -> Result<RemoteAddr> {
    let ctx = &mut sess.request;
    let dur = ctx.timeout;

    let greeting = timeout(dur, socks5::Greeting::read(ctx.stream_mut())).await??;

    if cfg.auth_required() {
        if !greeting.offers(socks5::METHOD_USERPASS) {
            let select = socks5::method_select(socks5::METHOD_UNACCEPTABLE);
            timeout(dur, ctx.stream_mut().write_all(&select)).await??;
            return Err(Error::Auth);
        }
        ctx.advance(State::AuthResp);
        let select = socks5::method_select(socks5::METHOD_USERPASS);
        timeout(dur, ctx.stream_mut().write_all(&select)).await??;

        let userpass = timeout(dur, socks5::UserPass::read(ctx.stream_mut())).await??;
        let ok = userpass.username == cfg.username && userpass.password == cfg.password;
        timeout(dur, ctx.stream_mut().write_all(&socks5::auth_reply(ok))).await??;
        if !ok {
            debug!("socks5 client authentication failed");
            return Err(Error::Auth);
        }
        trace!("socks5 client authentication success");
    } else {
        if !greeting.offers(socks5::METHOD_NONE) {
            let select = socks5::method_select(socks5::METHOD_UNACCEPTABLE);
            timeout(dur, ctx.stream_mut().write_all(&select)).await??;
            return Err(Error::Auth);
        }
        let select = socks5::method_select(socks5::METHOD_NONE);
        timeout(dur, ctx.stream_mut().write_all(&select)).await??;
    }

    let request = match timeout(dur, socks5::Request::read(ctx.stream_mut())).await? {
        Ok(request) => request,
        Err(e) => {
            let failure = socks5::reply(socks5::REP_FAILURE);
            let _ = timeout(dur, ctx.stream_mut().write_all(&failure)).await;
            return Err(e);
        }
    };
    if request.cmd != socks5::CMD_CONNECT {
        let rejected = socks5::reply(socks5::REP_CMD_NOT_SUPPORTED);
        timeout(dur, ctx.stream_mut().write_all(&rejected)).await??;
        return Err(Error::Policy("only connect supported"));
    }
    Ok(request.addr)
}

/// Request-side SOCKS4 handshake. With credentials configured the ident
/// userid must match the username; SOCKS4 carries no password.
async fn socks4_handshake(sess: &mut Session, cfg: &ServerConfig) -> Result<RemoteAddr> {
    let ctx = &mut sess.request;
    let dur = ctx.timeout;

    let request = match timeout(dur, socks4::Request::read(ctx.stream_mut())).await? {
        Ok(request) => request,
        Err(e) => {
            let rejected = socks4::reply(socks4::REP_REJECTED);
            let _ = timeout(dur, ctx.stream_mut().write_all(&rejected)).await;
            return Err(e);
        }
    };
    if request.cmd != socks4::CMD_CONNECT {
        let rejected = socks4::reply(socks4::REP_REJECTED);
        timeout(dur, ctx.stream_mut().write_all(&rejected)).await??;
        return Err(Error::Policy("only connect supported"));
    }
    if cfg.auth_required() {
        ctx.advance(State::AuthResp);
        if request.userid != cfg.username {
            debug!("socks4 client ident mismatch");
            let rejected = socks4::reply(socks4::REP_IDENT_MISMATCH);
            timeout(dur, ctx.stream_mut().write_all(&rejected)).await??;
            return Err(Error::Auth);
        }
    }
    Ok(request.addr)
}

/// Pick an upstream and open the forward context, burning through the
/// retry budgets.
async fn connect_upstream(
    upstreams: &Upstreams,
    proto: Proto,
    forward: &mut Context,
) -> Result<Upstream> {
    forward.advance(State::ForwardConnect);
    let mut last: Option<Error> = None;

    for _ in 0..upstreams.maxretry.max(1) {
        let upstream = match upstreams.get(proto) {
            Ok(upstream) => upstream,
            Err(e) => {
                last = Some(e);
                continue;
            }
        };
        for _ in 0..upstreams.maxreconn.max(1) {
            match timeout(forward.timeout, TcpStream::connect(upstream.addr)).await {
                Ok(Ok(stream)) => {
                    forward.attach(stream, upstream.addr.to_string());
                    debug!("forward context connected to {}", forward.peer);
                    return Ok(upstream);
                }
                Ok(Err(e)) => {
                    warn!("connect upstream {} failed: {e}", upstream.addr);
                    last = Some(e.into());
                }
                Err(_) => {
                    warn!("connect upstream {} timed out", upstream.addr);
                    last = Some(Error::Timeout);
                }
            }
        }
    }

    Err(Error::Upstream(format!(
        "no viable upstream: {}",
        last.map(|e| e.to_string())
            .unwrap_or_else(|| "no pool".into())
    )))
}

/// Upstream-side handshake on the connected forward context. Returns any
/// tunnel bytes the upstream sent past its handshake reply.
async fn forward_handshake(
    forward: &mut Context,
    upstream: &Upstream,
    remote: &RemoteAddr,
) -> Result<Vec<u8>> {
    forward.advance(State::ForwardHandshake);
    match upstream.proto {
        Proto::Socks5 => {
            let stream = forward
                .stream
                .take()
                .expect("forward context has no open socket");
            match timeout(
                forward.timeout,
                socks5_upstream_handshake(stream, upstream, remote),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    forward.stream = Some(stream);
                    Ok(Vec::new())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::Timeout),
            }
        }
        Proto::Http | Proto::HttpTunnel => {
            http_upstream_handshake(forward, upstream, remote).await
        }
        Proto::Socks4 => Err(Error::Upstream("socks4 upstreams are not supported".into())),
    }
}

async fn socks5_upstream_handshake(
    stream: TcpStream,
    upstream: &Upstream,
    remote: &RemoteAddr,
) -> Result<TcpStream> {
    let username = upstream.username.as_deref().filter(|u| !u.is_empty());
    let password = upstream.password.as_deref().unwrap_or("");

    let s5 = match remote {
        RemoteAddr::Ip(addr) => match username {
            Some(user) => {
                Socks5Stream::connect_with_password_and_socket(stream, *addr, user, password).await
            }
            None => Socks5Stream::connect_with_socket(stream, *addr).await,
        },
        RemoteAddr::Domain(domain, port) => match username {
            Some(user) => {
                Socks5Stream::connect_with_password_and_socket(
                    stream,
                    (domain.as_str(), *port),
                    user,
                    password,
                )
                .await
            }
            None => Socks5Stream::connect_with_socket(stream, (domain.as_str(), *port)).await,
        },
    }
    .map_err(|e| Error::Upstream(format!("socks5 upstream handshake: {e}")))?;

    Ok(s5.into_inner())
}

async fn http_upstream_handshake(
    forward: &mut Context,
    upstream: &Upstream,
    remote: &RemoteAddr,
) -> Result<Vec<u8>> {
    let mut req = http::Request {
        method: http::Method::Connect,
        host: remote.host_str(),
        port: remote.port(),
        protocol: http::DEFAULT_PROTOCOL.into(),
        headers: HashMap::new(),
    };
    req.headers.insert(
        "host".into(),
        format!("{}:{}", remote.host_str(), remote.port()),
    );
    if let Some(user) = upstream.username.as_deref().filter(|u| !u.is_empty()) {
        let password = upstream.password.as_deref().unwrap_or("");
        req.headers.insert(
            "proxy-authorization".into(),
            format!("Basic {}", http::basic_auth_gen(user, password)),
        );
    }
    req.dump();

    let dur = forward.timeout;
    let stream = forward.stream_mut();
    timeout(dur, stream.write_all(&req.message())).await??;

    let mut buf = Vec::with_capacity(512);
    let head_end = read_http_head(stream, dur, &mut buf).await?;
    let resp = http::Response::parse(&buf[..head_end])?;
    resp.dump();
    if !(200..300).contains(&resp.code) {
        return Err(Error::Upstream(format!(
            "upstream connect rejected with {}",
            resp.code
        )));
    }

    // bytes past the reply head already belong to the tunnel
    Ok(buf.split_off(head_end))
}

/// Success reply toward the client, per server protocol.
async fn reply_established(sess: &mut Session, cfg: &ServerConfig) -> Result<()> {
    let ctx = &mut sess.request;
    let bytes: Vec<u8> = match cfg.proxy {
        Proto::Http => http::Response::new(200).message(),
        Proto::Socks5 => socks5::reply(socks5::REP_SUCCESS).to_vec(),
        Proto::Socks4 => socks4::reply(socks4::REP_GRANTED).to_vec(),
        Proto::HttpTunnel => Vec::new(),
    };
    let dur = ctx.timeout;
    timeout(dur, ctx.stream_mut().write_all(&bytes)).await??;
    Ok(())
}

/// Best-effort "no upstream" reply toward the client.
async fn reply_unavailable(sess: &mut Session, cfg: &ServerConfig) {
    let ctx = &mut sess.request;
    if !ctx.is_connected() {
        return;
    }
    let bytes: Vec<u8> = match cfg.proxy {
        Proto::Http => http::Response::new(502).message(),
        Proto::Socks5 => socks5::reply(socks5::REP_FAILURE).to_vec(),
        Proto::Socks4 => socks4::reply(socks4::REP_REJECTED).to_vec(),
        Proto::HttpTunnel => return,
    };
    let dur = ctx.timeout;
    let _ = timeout(dur, ctx.stream_mut().write_all(&bytes)).await;
}

/// Accumulate reads until the head terminator shows up; returns the offset
/// just past it. Bytes beyond the terminator stay in `buf`.
async fn read_http_head(
    stream: &mut TcpStream,
    dur: Duration,
    buf: &mut Vec<u8>,
) -> Result<usize> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_head_end(buf) {
            return Ok(end);
        }
        if buf.len() >= HANDSHAKE_MAX_LENGTH {
            return Err(Error::Parse("http head too large"));
        }
        let n = timeout(dur, stream.read(&mut chunk)).await??;
        if n == 0 {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Copy bytes both ways until either side closes or the idle timer fires.
/// EOF is an orderly half-close; the opposite side is shut down in turn.
async fn relay(sess: &mut Session, early: Vec<u8>) -> Result<(u64, u64)> {
    sess.request.advance(State::Tunnel);
    sess.forward.advance(State::Tunnel);

    let request = sess
        .request
        .stream
        .as_mut()
        .expect("tunnel requires a request socket");
    let forward = sess
        .forward
        .stream
        .as_mut()
        .expect("tunnel requires a forward socket");

    if !early.is_empty() {
        request.write_all(&early).await?;
    }

    let mut client_buf = [0u8; RELAY_BUF_SIZE];
    let mut upstream_buf = [0u8; RELAY_BUF_SIZE];
    let mut client_closed = false;
    let mut upstream_closed = false;
    let mut sent: u64 = 0;
    let mut received: u64 = 0;

    loop {
        tokio::select! {
            biased;

            result = timeout(TUNNEL_IDLE_TIMEOUT, request.read(&mut client_buf)), if !client_closed => {
                let n = result.map_err(|_| Error::Timeout)??;
                if n == 0 {
                    client_closed = true;
                    if !upstream_closed {
                        forward.shutdown().await?;
                    }
                } else {
                    forward.write_all(&client_buf[..n]).await?;
                    sent += n as u64;
                    TOTAL_BYTES_SENT.fetch_add(n as u64, Ordering::SeqCst);
                }
            },
            result = timeout(TUNNEL_IDLE_TIMEOUT, forward.read(&mut upstream_buf)), if !upstream_closed => {
                let n = result.map_err(|_| Error::Timeout)??;
                if n == 0 {
                    upstream_closed = true;
                    if !client_closed {
                        request.shutdown().await?;
                    }
                } else {
                    request.write_all(&upstream_buf[..n]).await?;
                    received += n as u64;
                    TOTAL_BYTES_RECV.fetch_add(n as u64, Ordering::SeqCst);
                }
            },
            else => break,
        }
    }

    Ok((sent, received))
}
