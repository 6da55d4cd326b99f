//! Incremental request parsing
//!
//! A `Request` is fed whatever the socket hands us, in whatever pieces it
//! arrives, and moves forward through its phases until a whole request has
//! been seen:
//!
//! ```text
//! ReadingHeaders -> ReadingBody -> Complete
//! ```

use crate::codec::{self, Headers};
use crate::errors::{Error, Result};
use crate::filesystem::percent_decode;

use nom::bytes::complete::{tag, take_till1};
use nom::combinator::all_consuming;
use nom::sequence::tuple;
use nom::IResult;

use std::mem;
use std::net::SocketAddr;

/// Largest header section we buffer while waiting for the blank line
pub const MAX_HEAD_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadingHeaders,
    ReadingBody,
    Complete
}

/// An incoming request from the client
#[derive(Debug)]
pub struct Request {
    method: String,
    request_uri: String,
    path: String,
    query_string: String,
    version: String,
    request_line: String,
    headers: Headers,
    body: Vec<u8>,
    content_length: usize,
    remote_addr: SocketAddr,
    local_port: u16,

    phase: Phase,
    head_parsed: bool,
    head: Vec<u8>,
    surplus: Vec<u8>
}

impl Request {
    pub fn new(remote_addr: SocketAddr, local_port: u16) -> Request {
        Request {
            method: String::new(),
            request_uri: String::new(),
            path: String::new(),
            query_string: String::new(),
            version: String::new(),
            request_line: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            content_length: 0,
            remote_addr: remote_addr,
            local_port: local_port,

            phase: Phase::ReadingHeaders,
            head_parsed: false,
            head: Vec::new(),
            surplus: Vec::new()
        }
    }

    /// Consumes the next chunk of bytes from the client.
    ///
    /// Returns the phase reached afterwards. Staying in `ReadingHeaders` just
    /// means more data is needed. Any error is a protocol error; the request
    /// can't be answered.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Phase> {
        match self.phase {
            Phase::ReadingHeaders => {
                let scanned = self.head.len();
                self.head.extend_from_slice(chunk);

                // Stray line breaks between messages are not a request line
                let blank = self.head.iter()
                    .take_while(|&&b| b == b'\r' || b == b'\n')
                    .count();
                self.head.drain(.. blank);

                // Earlier chunks held no terminator, but one may straddle the
                // boundary by up to three bytes
                let resume = scanned.saturating_sub(blank).saturating_sub(3);

                if let Some((head_len, body_start)) = codec::find_head_end(&self.head[resume ..]) {
                    let head = mem::replace(&mut self.head, Vec::new());
                    self.parse_head(&head[.. resume + head_len])?;
                    self.accept_body(&head[resume + body_start ..]);
                }
                else if self.head.len() > MAX_HEAD_LEN {
                    return Err(Error::HeadTooLarge);
                }
            },
            Phase::ReadingBody => self.accept_body(chunk),
            Phase::Complete => self.surplus.extend_from_slice(chunk)
        }

        self.phase = if !self.head_parsed {
            Phase::ReadingHeaders
        }
        else if self.body.len() < self.content_length {
            Phase::ReadingBody
        }
        else {
            Phase::Complete
        };

        Ok(self.phase)
    }

    /// Appends body bytes, never past the declared length. Anything beyond
    /// belongs to whatever the client sends next.
    fn accept_body(&mut self, data: &[u8]) {
        let wanted = self.content_length - self.body.len();
        let taken = wanted.min(data.len());

        self.body.extend_from_slice(&data[.. taken]);
        self.surplus.extend_from_slice(&data[taken ..]);
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<()> {
        let (line, block) = match head.iter().position(|&b| b == b'\n') {
            Some(nl) => (&head[.. nl], &head[nl + 1 ..]),
            None => (head, &b""[..])
        };
        let line = match line.last() {
            Some(&b'\r') => &line[.. line.len() - 1],
            _ => line
        };

        let (method, target, version) = match request_line(line) {
            Ok((_, parts)) => parts,
            Err(_) => return Err(Error::MalformedRequestLine)
        };
        if !version.starts_with(b"HTTP/") {
            return Err(Error::MalformedRequestLine);
        }

        let target = match String::from_utf8(target.to_vec()) {
            Ok(t) => t,
            Err(_) => return Err(Error::InvalidUri)
        };
        let (raw_path, query) = split_target(&target)?;
        let path = match String::from_utf8(percent_decode(raw_path.as_bytes())?) {
            Ok(p) => p,
            Err(_) => return Err(Error::InvalidUri)
        };

        let headers = codec::parse_headers(block)?;
        let content_length = match headers.get("Content-Length") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) => n,
                Err(_) => return Err(Error::InvalidContentLength)
            },
            None => 0
        };

        // The token parsers only accept non-space bytes, but those may still
        // not be UTF-8
        self.method = String::from_utf8_lossy(method).into_owned();
        self.version = String::from_utf8_lossy(version).into_owned();
        self.request_line = String::from_utf8_lossy(line).into_owned();
        self.path = path;
        self.query_string = String::from(query.unwrap_or(""));
        self.request_uri = target;
        self.headers = headers;
        self.content_length = content_length;
        self.head_parsed = true;

        Ok(())
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The target exactly as the client sent it, query string included
    #[inline]
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    /// The percent-decoded path component of the target
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Everything after the first `?` in the target, or `""`
    #[inline]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The port the client connected to
    #[inline]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Whether the connection may carry another request after this one
    pub fn keep_alive(&self) -> bool {
        let close = self.get_header("Connection")
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("close"));

        self.version == "HTTP/1.1" && !close
    }

    /// Takes the bytes that arrived after this request ended
    pub fn take_surplus(&mut self) -> Vec<u8> {
        mem::replace(&mut self.surplus, Vec::new())
    }
}

fn token(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_till1(|b: u8| b == b' ' || b == b'\t')(input)
}

/// `METHOD SP TARGET SP VERSION`, nothing more, nothing less
fn request_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8], &[u8])> {
    let (rest, (method, _, target, _, version)) =
        all_consuming(tuple((token, tag(" "), token, tag(" "), token)))(input)?;

    Ok((rest, (method, target, version)))
}

/// Splits a request target into its raw path and optional query string.
///
/// Absolute-form targets (`http://host/path`) are reduced to their path, and
/// fragments are dropped.
fn split_target(target: &str) -> Result<(&str, Option<&str>)> {
    let target = match target.find('#') {
        Some(i) => &target[.. i],
        None => target
    };

    let target = match target.find("://") {
        Some(scheme_end) if !target.starts_with('/') => {
            let authority = &target[scheme_end + 3 ..];
            match authority.find(|c: char| c == '/' || c == '?') {
                Some(i) if authority[i ..].starts_with('/') => &authority[i ..],
                _ => return Err(Error::InvalidUri)
            }
        },
        _ => target
    };

    let (path, query) = match target.find('?') {
        Some(i) => (&target[.. i], Some(&target[i + 1 ..])),
        None => (target, None)
    };

    if path.is_empty() {
        return Err(Error::InvalidUri);
    }

    Ok((path, query))
}
