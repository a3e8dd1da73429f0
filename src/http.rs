//! rps/src/http.rs
//! HTTP CONNECT wire layer: request/response parsing and serialization,
//! Proxy-Authorization handling, Basic credentials.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashMap;
use tracing::trace;

pub const DEFAULT_PROTOCOL: &str = "HTTP/1.1";

/// Serialized message cap; longer output is truncated.
pub const MESSAGE_MAX_LENGTH: usize = 2048;

const HEADER_MAX_KEY_LENGTH: usize = 64;
const HEADER_MAX_VALUE_LENGTH: usize = 1024;
const CRLF: &[u8] = b"\r\n";

/// ASCII normalization for header keys: lowercases `A-Z`, passes `a-z`,
/// `0-9` and `-`, maps everything else to zero (rejected as junk).
static LOWCASE: [u8; 256] = build_lowcase();

const fn build_lowcase() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let c = i as u8;
        table[i] = match c {
            b'-' | b'0'..=b'9' | b'a'..=b'z' => c,
            b'A'..=b'Z' => c + 32,
            _ => 0,
        };
        i += 1;
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Unknown,
    Get,
    Post,
    Connect,
}

impl Method {
    fn from_token(token: &[u8]) -> Method {
        match token {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"CONNECT" => Method::Connect,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Unknown => "UNKNOWN",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Connect => "CONNECT",
        }
    }
}

#[derive(Debug, Default)]
pub struct Request {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Parse a full handshake buffer: request line, header lines, blank-line
    /// terminator. Anything past the terminator beyond two CRLFs of slack is
    /// rejected (request smuggling defense), and the request must pass
    /// [`Request::check`].
    pub fn parse(data: &[u8]) -> Result<Request> {
        let mut req = Request::default();
        let mut pos = 0;
        let mut lines = 0usize;

        loop {
            let Some((consumed, line)) = read_line(data, pos) else {
                return Err(Error::Parse("http request not terminated"));
            };
            pos += consumed;
            if line.is_empty() {
                break;
            }
            lines += 1;
            if lines == 1 {
                parse_request_line(line, &mut req)?;
            } else {
                parse_header_line(line, &mut req.headers)?;
            }
        }

        if lines == 0 {
            return Err(Error::Parse("empty http request"));
        }
        if data.len() - pos > 2 * CRLF.len() {
            return Err(Error::Parse("junk after http handshake"));
        }

        req.check()?;
        Ok(req)
    }

    /// Request validity: CONNECT only, sane port, optionally a host header.
    fn check(&self) -> Result<()> {
        if self.method != Method::Connect {
            return Err(Error::Policy("only connect supported"));
        }
        if self.port == 0 {
            return Err(Error::Policy("invalid port"));
        }
        #[cfg(feature = "strict-host-header")]
        if !self.headers.contains_key("host") {
            return Err(Error::Policy("missing host header"));
        }
        Ok(())
    }

    /// Case-insensitive header lookup; keys are stored lowercased.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn message(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(
            format!(
                "{} {}:{} {}\r\n",
                self.method.as_str(),
                self.host,
                self.port,
                self.protocol
            )
            .as_bytes(),
        );
        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(CRLF);
        out.truncate(MESSAGE_MAX_LENGTH);
        out
    }

    pub fn dump(&self) {
        trace!(
            "[http request] {} {}:{} {}",
            self.method.as_str(),
            self.host,
            self.port,
            self.protocol
        );
        for (key, value) in &self.headers {
            trace!("{}: {}", key, value);
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn new(code: u16) -> Response {
        Response {
            code,
            body: String::new(),
            headers: HashMap::new(),
        }
    }

    /// Parse an upstream reply head (status line + headers, terminator
    /// included in `data`). Bytes past the head are the caller's problem.
    pub fn parse(data: &[u8]) -> Result<Response> {
        let mut resp = Response::new(0);
        let mut pos = 0;
        let mut lines = 0usize;

        loop {
            let Some((consumed, line)) = read_line(data, pos) else {
                return Err(Error::Parse("http response not terminated"));
            };
            pos += consumed;
            if line.is_empty() {
                break;
            }
            lines += 1;
            if lines == 1 {
                resp.code = parse_status_line(line)?;
            } else {
                parse_header_line(line, &mut resp.headers)?;
            }
        }

        if lines == 0 {
            return Err(Error::Parse("empty http response"));
        }
        Ok(resp)
    }

    pub fn message(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(
            format!(
                "{} {} {}\r\n",
                DEFAULT_PROTOCOL,
                self.code,
                resp_code_str(self.code)
            )
            .as_bytes(),
        );
        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(self.body.as_bytes());
        out.truncate(MESSAGE_MAX_LENGTH);
        out
    }

    pub fn dump(&self) {
        trace!(
            "[http response] {} {} {}",
            DEFAULT_PROTOCOL,
            self.code,
            resp_code_str(self.code)
        );
        for (key, value) in &self.headers {
            trace!("{}: {}", key, value);
        }
    }
}

pub fn resp_code_str(code: u16) -> &'static str {
    match code {
        200 => "Connection established",
        400 => "Bad Request",
        403 => "Forbidden",
        407 => "Proxy Authentication Required",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSchema {
    Unknown,
    Basic,
    Digest,
}

#[derive(Debug)]
pub struct RequestAuth {
    pub schema: AuthSchema,
    pub param: String,
}

/// Next CRLF- (or LF-) terminated line starting at `start`. Returns the
/// bytes consumed and the line without its terminator, or `None` when no
/// full line remains.
fn read_line(data: &[u8], start: usize) -> Option<(usize, &[u8])> {
    let rest = data.get(start..)?;
    let lf = rest.iter().position(|&b| b == b'\n')?;
    let mut line = &rest[..lf];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    Some((lf + 1, line))
}

fn parse_request_line(line: &[u8], req: &mut Request) -> Result<()> {
    enum Sw {
        Start,
        Method,
        SpaceBeforeHost,
        Host,
        Port,
        SpaceBeforeProtocol,
        Protocol,
        End,
    }

    let mut state = Sw::Start;
    let mut start = 0usize;
    let mut end = 0usize;
    let mut port: u32 = 0;
    let mut i = 0usize;

    while i < line.len() {
        let ch = line[i];
        match state {
            Sw::Start => {
                if ch == b' ' {
                    i += 1;
                } else {
                    start = i;
                    state = Sw::Method;
                }
            }
            Sw::Method => {
                if ch == b' ' {
                    req.method = Method::from_token(&line[start..i]);
                    state = Sw::SpaceBeforeHost;
                    i += 1;
                } else if ch.is_ascii_uppercase() || ch == b'_' {
                    i += 1;
                } else {
                    return Err(Error::Parse("invalid method"));
                }
            }
            Sw::SpaceBeforeHost => {
                if ch == b' ' {
                    i += 1;
                } else {
                    start = i;
                    state = Sw::Host;
                }
            }
            Sw::Host => {
                if ch == b':' {
                    if i == start {
                        return Err(Error::Parse("invalid host"));
                    }
                    req.host = String::from_utf8_lossy(&line[start..i]).into_owned();
                    start = i + 1; // cross ':'
                    state = Sw::Port;
                    i += 1;
                } else if ch == b' ' {
                    return Err(Error::Parse("need port"));
                } else if (b'-'..=b'z').contains(&ch) {
                    // not too strict, admits punycode-encoded domains
                    i += 1;
                } else {
                    return Err(Error::Parse("invalid host"));
                }
            }
            Sw::Port => {
                if ch.is_ascii_digit() {
                    if i - start >= 5 {
                        return Err(Error::Parse("invalid port"));
                    }
                    port = port * 10 + u32::from(ch - b'0');
                    if port > u32::from(u16::MAX) {
                        return Err(Error::Parse("invalid port"));
                    }
                    i += 1;
                } else if ch == b' ' {
                    if i == start {
                        return Err(Error::Parse("invalid port"));
                    }
                    req.port = port as u16;
                    state = Sw::SpaceBeforeProtocol;
                    i += 1;
                } else {
                    return Err(Error::Parse("invalid port"));
                }
            }
            Sw::SpaceBeforeProtocol => {
                if ch == b' ' {
                    i += 1;
                } else {
                    start = i;
                    state = Sw::Protocol;
                }
            }
            Sw::Protocol => {
                if ch == b' ' {
                    end = i;
                    state = Sw::End;
                } else if ch < 0x20 {
                    return Err(Error::Parse("invalid protocol"));
                } else {
                    i += 1;
                }
            }
            Sw::End => {
                if ch != b' ' {
                    return Err(Error::Parse("junk in request line"));
                }
                i += 1;
            }
        }
    }

    let token = match state {
        Sw::Protocol => &line[start..],
        Sw::End => &line[start..end],
        _ => return Err(Error::Parse("request line truncated")),
    };
    if token.is_empty() {
        return Err(Error::Parse("invalid protocol"));
    }
    req.protocol = std::str::from_utf8(token)
        .map_err(|_| Error::Parse("invalid protocol"))?
        .to_string();

    Ok(())
}

fn parse_header_line(line: &[u8], headers: &mut HashMap<String, String>) -> Result<()> {
    enum Sw {
        Start,
        Key,
        SpaceBeforeValue,
        Value,
    }

    let mut state = Sw::Start;
    let mut key = Vec::with_capacity(16);
    let mut value: Vec<u8> = Vec::new();

    for &ch in line {
        match state {
            Sw::Start => {
                if ch == b' ' {
                    continue;
                }
                let c = LOWCASE[ch as usize];
                if c == 0 {
                    return Err(Error::Parse("invalid symbol in header key"));
                }
                key.push(c);
                state = Sw::Key;
            }
            Sw::Key => {
                if key.len() >= HEADER_MAX_KEY_LENGTH {
                    return Err(Error::Parse("header key too large"));
                }
                let c = LOWCASE[ch as usize];
                if c != 0 {
                    key.push(c);
                    continue;
                }
                if ch == b':' {
                    state = Sw::SpaceBeforeValue;
                    continue;
                }
                return Err(Error::Parse("junk in header key"));
            }
            Sw::SpaceBeforeValue => {
                if ch == b' ' {
                    continue;
                }
                if ch < 0x20 {
                    return Err(Error::Parse("junk in header value"));
                }
                value.push(ch);
                state = Sw::Value;
            }
            Sw::Value => {
                if value.len() >= HEADER_MAX_VALUE_LENGTH {
                    return Err(Error::Parse("header value too large"));
                }
                if ch < 0x20 && ch != b'\t' {
                    return Err(Error::Parse("junk in header value"));
                }
                value.push(ch);
            }
        }
    }

    // last write wins on duplicate keys
    headers.insert(
        String::from_utf8_lossy(&key).into_owned(),
        String::from_utf8_lossy(&value).into_owned(),
    );
    Ok(())
}

fn parse_status_line(line: &[u8]) -> Result<u16> {
    enum Sw {
        Start,
        Proto,
        SpaceBeforeCode,
        Code,
        Reason,
    }

    let mut state = Sw::Start;
    let mut code: u32 = 0;
    let mut digits = 0usize;
    let mut i = 0usize;

    while i < line.len() {
        let ch = line[i];
        match state {
            Sw::Start => {
                if ch == b' ' {
                    i += 1;
                } else {
                    state = Sw::Proto;
                }
            }
            Sw::Proto => {
                if ch == b' ' {
                    state = Sw::SpaceBeforeCode;
                }
                i += 1;
            }
            Sw::SpaceBeforeCode => {
                if ch == b' ' {
                    i += 1;
                } else {
                    state = Sw::Code;
                }
            }
            Sw::Code => {
                if ch.is_ascii_digit() {
                    if digits >= 3 {
                        return Err(Error::Parse("invalid status code"));
                    }
                    code = code * 10 + u32::from(ch - b'0');
                    digits += 1;
                    i += 1;
                } else if ch == b' ' {
                    state = Sw::Reason;
                    i += 1;
                } else {
                    return Err(Error::Parse("invalid status code"));
                }
            }
            // the reason phrase is free-form; skip it
            Sw::Reason => i += 1,
        }
    }

    if digits != 3 {
        return Err(Error::Parse("invalid status code"));
    }
    Ok(code as u16)
}

/// Parse a `Proxy-Authorization` header value into schema and parameter.
pub fn parse_request_auth(credentials: &[u8]) -> Result<RequestAuth> {
    enum Sw {
        Start,
        Schema,
        SpaceBeforeParam,
        Param,
        End,
    }

    let mut state = Sw::Start;
    let mut schema = AuthSchema::Unknown;
    let mut start = 0usize;
    let mut end = 0usize;
    let mut i = 0usize;

    while i < credentials.len() {
        let ch = credentials[i];
        match state {
            Sw::Start => {
                if ch == b' ' {
                    i += 1;
                } else {
                    start = i;
                    state = Sw::Schema;
                }
            }
            Sw::Schema => {
                if ch == b' ' {
                    schema = match &credentials[start..i] {
                        b"Basic" => AuthSchema::Basic,
                        b"Digest" => AuthSchema::Digest,
                        _ => AuthSchema::Unknown,
                    };
                    state = Sw::SpaceBeforeParam;
                }
                i += 1;
            }
            Sw::SpaceBeforeParam => {
                if ch == b' ' {
                    i += 1;
                } else {
                    start = i;
                    state = Sw::Param;
                }
            }
            Sw::Param => {
                if ch == b' ' {
                    end = i;
                    state = Sw::End;
                }
                i += 1;
            }
            Sw::End => {
                if ch != b' ' {
                    return Err(Error::Parse("junk in credentials"));
                }
                i += 1;
            }
        }
    }

    let param = match state {
        Sw::Param => &credentials[start..],
        Sw::End => &credentials[start..end],
        _ => return Err(Error::Parse("invalid credentials")),
    };
    if param.is_empty() {
        return Err(Error::Parse("invalid credentials"));
    }

    Ok(RequestAuth {
        schema,
        param: String::from_utf8_lossy(param).into_owned(),
    })
}

/// Verify a Basic parameter against configured credentials. The decoded
/// plaintext is split once on `:`.
pub fn basic_auth(param: &str, username: &str, password: &str) -> bool {
    let Ok(plain) = BASE64.decode(param.as_bytes()) else {
        return false;
    };
    let Ok(plain) = String::from_utf8(plain) else {
        return false;
    };
    let Some((uname, passwd)) = plain.split_once(':') else {
        return false;
    };
    uname == username && passwd == password
}

/// Build the Basic parameter for outgoing `Proxy-Authorization` headers.
pub fn basic_auth_gen(username: &str, password: &str) -> String {
    BASE64.encode(format!("{username}:{password}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(line: &str) -> Result<Request> {
        let mut req = Request::default();
        parse_request_line(line.as_bytes(), &mut req)?;
        Ok(req)
    }

    #[test]
    fn connect_request_line() {
        let req = parse_line("CONNECT example.com:443 HTTP/1.1").unwrap();
        assert_eq!(req.method, Method::Connect);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 443);
        assert_eq!(req.protocol, "HTTP/1.1");
    }

    #[test]
    fn request_line_tolerates_extra_spaces() {
        let req = parse_line("  CONNECT   example.com:80   HTTP/1.1  ").unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 80);
        assert_eq!(req.protocol, "HTTP/1.1");
    }

    #[test]
    fn unrecognized_method_parses_as_unknown() {
        let req = parse_line("PATCH example.com:443 HTTP/1.1").unwrap();
        assert_eq!(req.method, Method::Unknown);
    }

    #[test]
    fn request_line_errors() {
        assert!(parse_line("get example.com:443 HTTP/1.1").is_err());
        assert!(parse_line("CONNECT :443 HTTP/1.1").is_err());
        assert!(parse_line("CONNECT example.com HTTP/1.1").is_err());
        assert!(parse_line("CONNECT example.com: HTTP/1.1").is_err());
        assert!(parse_line("CONNECT example.com:100000 HTTP/1.1").is_err());
        assert!(parse_line("CONNECT example.com:99999 HTTP/1.1").is_err());
        assert!(parse_line("CONNECT example.com:443").is_err());
        assert!(parse_line("CONNECT example.com:443 HTTP/1.1 junk").is_err());
        assert!(parse_line("CONNECT exam\x00ple.com:443 HTTP/1.1").is_err());
    }

    #[test]
    fn punycode_host_accepted() {
        let req = parse_line("CONNECT xn--nxasmq6b.example:443 HTTP/1.1").unwrap();
        assert_eq!(req.host, "xn--nxasmq6b.example");
    }

    #[test]
    fn full_request_parse() {
        let data = b"CONNECT example.com:443 HTTP/1.1\r\n\
                     Host: example.com:443\r\n\
                     Proxy-Connection: keep-alive\r\n\r\n";
        let req = Request::parse(data).unwrap();
        assert_eq!(req.method, Method::Connect);
        assert_eq!(req.header("host"), Some("example.com:443"));
        assert_eq!(req.header("HOST"), Some("example.com:443"));
        assert_eq!(req.header("Proxy-Connection"), Some("keep-alive"));
    }

    #[test]
    fn non_connect_method_rejected() {
        let data = b"GET example.com:80 HTTP/1.1\r\n\r\n";
        assert!(matches!(Request::parse(data), Err(Error::Policy(_))));
    }

    #[test]
    fn trailing_junk_rejected() {
        let data = b"CONNECT example.com:443 HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        assert!(matches!(Request::parse(data), Err(Error::Parse(_))));
    }

    #[test]
    fn trailing_crlf_slack_allowed() {
        let data = b"CONNECT example.com:443 HTTP/1.1\r\n\r\n\r\n\r\n";
        assert!(Request::parse(data).is_ok());
    }

    #[test]
    fn unterminated_request_rejected() {
        let data = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com\r\n";
        assert!(matches!(Request::parse(data), Err(Error::Parse(_))));
    }

    #[test]
    fn duplicate_header_last_write_wins() {
        let data = b"CONNECT example.com:443 HTTP/1.1\r\n\
                     X-Trace: first\r\n\
                     X-Trace: second\r\n\r\n";
        let req = Request::parse(data).unwrap();
        assert_eq!(req.header("x-trace"), Some("second"));
    }

    #[test]
    fn header_key_case_permutations() {
        let mut headers = HashMap::new();
        for line in [
            "proxy-authorization: a".as_bytes(),
            b"PROXY-AUTHORIZATION: b",
            b"Proxy-Authorization: c",
            b"pRoXy-AuThOrIzAtIoN: d",
        ] {
            parse_header_line(line, &mut headers).unwrap();
        }
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["proxy-authorization"], "d");
    }

    #[test]
    fn header_junk_rejected() {
        let mut headers = HashMap::new();
        assert!(parse_header_line(b"bad\x00key: v", &mut headers).is_err());
        assert!(parse_header_line(b"key value", &mut headers).is_err());
        assert!(parse_header_line(b"key: val\x00ue", &mut headers).is_err());
        let long_key = vec![b'k'; HEADER_MAX_KEY_LENGTH + 1];
        let mut line = long_key.clone();
        line.extend_from_slice(b": v");
        assert!(parse_header_line(&line, &mut headers).is_err());
    }

    #[test]
    fn header_value_keeps_spaces_and_tabs() {
        let mut headers = HashMap::new();
        parse_header_line(b"user-agent:   curl/8.0 (x;\ty)", &mut headers).unwrap();
        assert_eq!(headers["user-agent"], "curl/8.0 (x;\ty)");
    }

    #[test]
    fn auth_schema_dispatch() {
        let auth = parse_request_auth(b"Basic dTpw").unwrap();
        assert_eq!(auth.schema, AuthSchema::Basic);
        assert_eq!(auth.param, "dTpw");

        let auth = parse_request_auth(b"Digest nonce=abc").unwrap();
        assert_eq!(auth.schema, AuthSchema::Digest);

        let auth = parse_request_auth(b"Bearer token").unwrap();
        assert_eq!(auth.schema, AuthSchema::Unknown);
    }

    #[test]
    fn auth_junk_rejected() {
        assert!(parse_request_auth(b"Basic dTpw junk").is_err());
        assert!(parse_request_auth(b"Basic ").is_err());
        assert!(parse_request_auth(b"").is_err());
        // trailing spaces are fine
        assert!(parse_request_auth(b"Basic dTpw   ").is_ok());
    }

    #[test]
    fn basic_auth_round_trip() {
        let param = basic_auth_gen("user", "pass");
        assert!(basic_auth(&param, "user", "pass"));
        assert!(!basic_auth(&param, "user", "wrong"));
        assert!(!basic_auth("!!notbase64!!", "user", "pass"));
        assert!(!basic_auth(&BASE64.encode("nocolon"), "user", "pass"));
    }

    #[test]
    fn response_message_wire_format() {
        let resp = Response::new(200);
        assert_eq!(
            resp.message(),
            b"HTTP/1.1 200 Connection established\r\n\r\n"
        );

        let mut resp = Response::new(407);
        resp.headers.insert(
            "Proxy-Authenticate".into(),
            "Basic realm=\"rps\"".into(),
        );
        let text = String::from_utf8(resp.message()).unwrap();
        assert!(text.starts_with("HTTP/1.1 407 Proxy Authentication Required\r\n"));
        assert!(text.contains("Proxy-Authenticate: Basic realm=\"rps\"\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn message_truncated_at_cap() {
        let mut resp = Response::new(200);
        resp.body = "x".repeat(MESSAGE_MAX_LENGTH * 2);
        assert_eq!(resp.message().len(), MESSAGE_MAX_LENGTH);
    }

    #[test]
    fn request_message_round_trips_through_parser() {
        let mut req = Request {
            method: Method::Connect,
            host: "example.com".into(),
            port: 443,
            protocol: DEFAULT_PROTOCOL.into(),
            headers: HashMap::new(),
        };
        req.headers.insert("host".into(), "example.com:443".into());
        let parsed = Request::parse(&req.message()).unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 443);
        assert_eq!(parsed.header("host"), Some("example.com:443"));
    }

    #[test]
    fn response_parse() {
        let resp =
            Response::parse(b"HTTP/1.1 200 Connection established\r\n\r\n").unwrap();
        assert_eq!(resp.code, 200);

        let resp = Response::parse(
            b"HTTP/1.0 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic\r\n\r\n",
        )
        .unwrap();
        assert_eq!(resp.code, 407);
        assert_eq!(resp.headers["proxy-authenticate"], "Basic");

        assert!(Response::parse(b"HTTP/1.1 20 OK\r\n\r\n").is_err());
        assert!(Response::parse(b"HTTP/1.1 2000 OK\r\n\r\n").is_err());
        assert!(Response::parse(b"garbage\r\n\r\n").is_err());
        assert!(Response::parse(b"HTTP/1.1 200 OK\r\n").is_err());
    }

    #[test]
    fn lowcase_table_shape() {
        assert_eq!(LOWCASE[b'A' as usize], b'a');
        assert_eq!(LOWCASE[b'z' as usize], b'z');
        assert_eq!(LOWCASE[b'-' as usize], b'-');
        assert_eq!(LOWCASE[b'7' as usize], b'7');
        assert_eq!(LOWCASE[b'_' as usize], 0);
        assert_eq!(LOWCASE[b' ' as usize], 0);
        assert_eq!(LOWCASE[0], 0);
    }
}
