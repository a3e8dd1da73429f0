//! rps/src/socks5.rs
//! SOCKS5 wire frames, server side (RFC 1928 / RFC 1929).

use crate::error::{Error, Result};
use crate::types::RemoteAddr;
use std::net::{IpAddr, SocketAddr};
use tokio::io::AsyncReadExt;

pub const VERSION: u8 = 0x05;
pub const AUTH_VERSION: u8 = 0x01;

pub const METHOD_NONE: u8 = 0x00;
pub const METHOD_USERPASS: u8 = 0x02;
pub const METHOD_UNACCEPTABLE: u8 = 0xff;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_FAILURE: u8 = 0x01;
pub const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

const MAX_DOMAIN_LENGTH: usize = 255;

/// Client greeting: version, auth method list.
#[derive(Debug)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub async fn read<R>(stream: &mut R) -> Result<Greeting>
    where
        R: AsyncReadExt + Unpin,
    {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(Error::Parse("bad socks5 version"));
        }
        let nmethods = head[1] as usize;
        if nmethods == 0 {
            return Err(Error::Parse("no socks5 auth methods"));
        }
        let mut methods = vec![0u8; nmethods];
        stream.read_exact(&mut methods).await?;
        Ok(Greeting { methods })
    }

    pub fn offers(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

/// Method-selection reply to a greeting.
pub fn method_select(method: u8) -> [u8; 2] {
    [VERSION, method]
}

/// RFC 1929 username/password subnegotiation request.
#[derive(Debug)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl UserPass {
    pub async fn read<R>(stream: &mut R) -> Result<UserPass>
    where
        R: AsyncReadExt + Unpin,
    {
        let ver = stream.read_u8().await?;
        if ver != AUTH_VERSION {
            return Err(Error::Parse("bad auth subnegotiation version"));
        }
        let username = read_len_prefixed(stream).await?;
        let password = read_len_prefixed(stream).await?;
        Ok(UserPass { username, password })
    }
}

async fn read_len_prefixed<R>(stream: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let len = stream.read_u8().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| Error::Parse("credentials are not utf-8"))
}

/// Subnegotiation status reply.
pub fn auth_reply(ok: bool) -> [u8; 2] {
    [AUTH_VERSION, if ok { 0x00 } else { 0x01 }]
}

/// Connect request: version, command, target address.
#[derive(Debug)]
pub struct Request {
    pub cmd: u8,
    pub addr: RemoteAddr,
}

impl Request {
    pub async fn read<R>(stream: &mut R) -> Result<Request>
    where
        R: AsyncReadExt + Unpin,
    {
        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(Error::Parse("bad socks5 version"));
        }
        let cmd = head[1];
        let addr = match head[3] {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                RemoteAddr::Ip(SocketAddr::new(IpAddr::V4(octets.into()), port))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                RemoteAddr::Ip(SocketAddr::new(IpAddr::V6(octets.into()), port))
            }
            ATYP_DOMAIN => {
                let len = stream.read_u8().await? as usize;
                if len == 0 || len > MAX_DOMAIN_LENGTH {
                    return Err(Error::Parse("bad socks5 domain length"));
                }
                let mut domain = vec![0u8; len];
                stream.read_exact(&mut domain).await?;
                let domain = String::from_utf8(domain)
                    .map_err(|_| Error::Parse("socks5 domain is not utf-8"))?;
                let port = stream.read_u16().await?;
                RemoteAddr::Domain(domain, port)
            }
            _ => return Err(Error::Parse("bad socks5 address type")),
        };
        Ok(Request { cmd, addr })
    }
}

/// Connect reply with a zeroed bind address; clients ignore it for CONNECT.
pub fn reply(code: u8) -> [u8; 10] {
    [VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn greeting_parse() {
        let mut data: &[u8] = &[0x05, 0x02, 0x00, 0x02];
        let greeting = Greeting::read(&mut data).await.unwrap();
        assert!(greeting.offers(METHOD_NONE));
        assert!(greeting.offers(METHOD_USERPASS));
        assert!(!greeting.offers(0x01));
    }

    #[tokio::test]
    async fn greeting_rejects_bad_version_and_empty_methods() {
        let mut data: &[u8] = &[0x04, 0x01, 0x00];
        assert!(matches!(
            Greeting::read(&mut data).await,
            Err(Error::Parse(_))
        ));
        let mut data: &[u8] = &[0x05, 0x00];
        assert!(matches!(
            Greeting::read(&mut data).await,
            Err(Error::Parse(_))
        ));
    }

    #[tokio::test]
    async fn request_ipv4() {
        let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x01, 0xbb];
        let req = Request::read(&mut data).await.unwrap();
        assert_eq!(req.cmd, CMD_CONNECT);
        assert_eq!(
            req.addr,
            RemoteAddr::Ip("127.0.0.1:443".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn request_domain() {
        let mut data = vec![0x05, 0x01, 0x00, 0x03, 11];
        data.extend_from_slice(b"example.com");
        data.extend_from_slice(&443u16.to_be_bytes());
        let mut slice = data.as_slice();
        let req = Request::read(&mut slice).await.unwrap();
        assert_eq!(req.addr, RemoteAddr::Domain("example.com".into(), 443));
    }

    #[tokio::test]
    async fn request_rejects_unknown_atyp_and_empty_domain() {
        let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x02, 0, 0];
        assert!(matches!(
            Request::read(&mut data).await,
            Err(Error::Parse(_))
        ));
        let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x03, 0x00, 0, 80];
        assert!(matches!(
            Request::read(&mut data).await,
            Err(Error::Parse(_))
        ));
    }

    #[tokio::test]
    async fn userpass_parse() {
        let mut data = vec![0x01, 4];
        data.extend_from_slice(b"user");
        data.push(4);
        data.extend_from_slice(b"pass");
        let mut slice = data.as_slice();
        let up = UserPass::read(&mut slice).await.unwrap();
        assert_eq!(up.username, "user");
        assert_eq!(up.password, "pass");
    }

    #[test]
    fn reply_wire_shape() {
        assert_eq!(
            reply(REP_SUCCESS),
            [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(method_select(METHOD_NONE), [0x05, 0x00]);
        assert_eq!(auth_reply(false), [0x01, 0x01]);
    }
}
