//! rps/src/socks4.rs
//! SOCKS4/4a CONNECT requests, server side.

use crate::error::{Error, Result};
use crate::types::RemoteAddr;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::AsyncReadExt;

pub const VERSION: u8 = 0x04;
pub const CMD_CONNECT: u8 = 0x01;

pub const REP_GRANTED: u8 = 0x5a;
pub const REP_REJECTED: u8 = 0x5b;
pub const REP_IDENT_MISMATCH: u8 = 0x5d;

const MAX_FIELD_LENGTH: usize = 255;

#[derive(Debug)]
pub struct Request {
    pub cmd: u8,
    pub userid: String,
    pub addr: RemoteAddr,
}

impl Request {
    pub async fn read<R>(stream: &mut R) -> Result<Request>
    where
        R: AsyncReadExt + Unpin,
    {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(Error::Parse("bad socks4 version"));
        }
        let cmd = head[1];
        let port = stream.read_u16().await?;
        let mut octets = [0u8; 4];
        stream.read_exact(&mut octets).await?;
        let ip = Ipv4Addr::from(octets);
        let userid = read_nul_terminated(stream).await?;

        // 4a form: 0.0.0.x with x != 0 means a domain follows the userid
        let addr = if octets[0] == 0 && octets[1] == 0 && octets[2] == 0 && octets[3] != 0 {
            let domain = read_nul_terminated(stream).await?;
            if domain.is_empty() {
                return Err(Error::Parse("empty socks4a domain"));
            }
            RemoteAddr::Domain(domain, port)
        } else {
            RemoteAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
        };

        Ok(Request { cmd, userid, addr })
    }
}

async fn read_nul_terminated<R>(stream: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let b = stream.read_u8().await?;
        if b == 0 {
            break;
        }
        if buf.len() >= MAX_FIELD_LENGTH {
            return Err(Error::Parse("socks4 field too long"));
        }
        buf.push(b);
    }
    String::from_utf8(buf).map_err(|_| Error::Parse("socks4 field is not utf-8"))
}

/// Reply frame; the bind address is zeroed, clients ignore it for CONNECT.
pub fn reply(code: u8) -> [u8; 8] {
    [0x00, code, 0, 0, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_ipv4() {
        let mut data = vec![0x04, 0x01];
        data.extend_from_slice(&443u16.to_be_bytes());
        data.extend_from_slice(&[192, 0, 2, 1]);
        data.extend_from_slice(b"alice\0");
        let mut slice = data.as_slice();
        let req = Request::read(&mut slice).await.unwrap();
        assert_eq!(req.cmd, CMD_CONNECT);
        assert_eq!(req.userid, "alice");
        assert_eq!(req.addr, RemoteAddr::Ip("192.0.2.1:443".parse().unwrap()));
    }

    #[tokio::test]
    async fn request_socks4a_domain() {
        let mut data = vec![0x04, 0x01];
        data.extend_from_slice(&80u16.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(b"\0example.com\0");
        let mut slice = data.as_slice();
        let req = Request::read(&mut slice).await.unwrap();
        assert_eq!(req.addr, RemoteAddr::Domain("example.com".into(), 80));
    }

    #[tokio::test]
    async fn request_rejects_bad_version() {
        let mut data: &[u8] = &[0x05, 0x01, 0, 80, 1, 2, 3, 4, 0];
        assert!(matches!(
            Request::read(&mut data).await,
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn reply_wire_shape() {
        assert_eq!(reply(REP_GRANTED), [0x00, 0x5a, 0, 0, 0, 0, 0, 0]);
    }
}
