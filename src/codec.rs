//! HTTP message framing: header blocks in, wire bytes out
//!
//! Both directions are stateless. Parsing is shared between client requests
//! and CGI responses, which use the same `Name: Value` line format.

use crate::errors::{Error, Result};

use nom::bytes::complete::{tag, take_until};
use nom::IResult;

use std::collections::HashMap;
use std::io::Write;
use std::slice;

/// A map of HTTP headers
///
/// Names keep the spelling they arrived with, and iteration follows
/// insertion order. Lookups are case-insensitive through a lowercase index.
/// Inserting a name that's already present replaces the old value in place,
/// so the last occurrence of a duplicate wins.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    pub fn insert<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>
    {
        let name = name.into();
        let key = name.to_ascii_lowercase();

        match self.index.get(&key) {
            Some(&i) => self.entries[i] = (name, value.into()),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((name, value.into()));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index.get(&name.to_ascii_lowercase())
            .map(|&i| self.entries[i].1.as_str())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let i = match self.index.remove(&name.to_ascii_lowercase()) {
            Some(i) => i,
            None => return None
        };

        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }

        Some(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { inner: self.entries.iter() }
    }
}

/// Iterator over `(name, value)` pairs in insertion order
pub struct Iter<'a> {
    inner: slice::Iter<'a, (String, String)>
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|&(ref n, ref v)| (n.as_str(), v.as_str()))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn header_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (value, name) = take_until(": ")(input)?;
    let (value, _) = tag(": ")(value)?;

    Ok((&[][..], (name, value)))
}

/// Parses a raw header block (without the terminating blank line) into a
/// header mapping.
///
/// Lines may end in CRLF or a bare LF. Each line is split on its first
/// `": "`; a line without that separator fails the whole block.
pub fn parse_headers(raw: &[u8]) -> Result<Headers> {
    let mut headers = Headers::new();

    for line in lines(raw) {
        if line.is_empty() {
            continue;
        }

        let (name, value) = match header_line(line) {
            Ok((_, pair)) => pair,
            Err(_) => return Err(Error::MalformedHeader(
                String::from_utf8_lossy(line).into_owned()
            ))
        };

        let name = String::from_utf8(name.to_vec())?;
        let value = String::from_utf8(value.to_vec())?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Splits on LF, dropping a CR that precedes it
pub fn lines(raw: &[u8]) -> impl Iterator<Item = &[u8]> {
    raw.split(|&b| b == b'\n')
        .map(|line| match line.last() {
            Some(&b'\r') => &line[.. line.len() - 1],
            _ => line
        })
}

/// Finds the blank line ending a message head.
///
/// Returns the length of the head (up to, not including, the blank line) and
/// the offset where the body starts. Both `\r\n\r\n` and `\n\n` terminate a
/// head; whichever comes first wins.
pub fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(buf, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(buf, b"\n\n").map(|i| (i, i + 2));

    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// The reason phrase for a status code, if we know it
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    let phrase = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None
    };

    Some(phrase)
}

/// Serializes a complete response.
///
/// A `Content-Length` header is appended from the body's exact length unless
/// the caller already supplied one.
pub fn render(status: u16, headers: &Headers, body: &[u8]) -> Result<Vec<u8>> {
    let reason = match reason_phrase(status) {
        Some(r) => r,
        None => return Err(Error::UnknownStatus(status))
    };

    let mut out = Vec::with_capacity(64 * (headers.len() + 1) + body.len());
    write!(out, "HTTP/1.1 {} {}\r\n", status, reason)?;

    for (name, value) in headers {
        write!(out, "{}: {}\r\n", name, value)?;
    }

    if !headers.contains("Content-Length") {
        write!(out, "Content-Length: {}\r\n", body.len())?;
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn headers_lookup_ignores_case() {
        let headers = parse_headers(b"Content-Type: text/html\r\nX-Thing: 1").unwrap();

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("x-thing"), Some("1"));
    }

    #[test]
    fn headers_preserve_names_and_order() {
        let headers = parse_headers(b"B-Header: 2\r\na-header: 1\r\n").unwrap();
        let pairs: Vec<_> = headers.iter().collect();

        assert_eq!(pairs, vec![("B-Header", "2"), ("a-header", "1")]);
    }

    #[test]
    fn last_duplicate_wins() {
        let headers = parse_headers(b"Foo: one\r\nfoo: two").unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("FOO"), Some("two"));
    }

    #[test]
    fn value_splits_on_first_separator_only() {
        let headers = parse_headers(b"Date: Thu, 07 Apr 2016 20:42:43 GMT\r\nX: a: b").unwrap();

        assert_eq!(headers.get("date"), Some("Thu, 07 Apr 2016 20:42:43 GMT"));
        assert_eq!(headers.get("x"), Some("a: b"));
    }

    #[test]
    fn parse_accepts_bare_newlines() {
        let headers = parse_headers(b"Foo: bar\nBaz: buz\n").unwrap();

        assert_eq!(headers.get("foo"), Some("bar"));
        assert_eq!(headers.get("baz"), Some("buz"));
    }

    #[test]
    fn parse_empty_block() {
        assert_eq!(parse_headers(b"").unwrap().len(), 0);
    }

    #[test]
    fn parse_rejects_line_without_separator() {
        match parse_headers(b"Foo: bar\r\nnonsense\r\n") {
            Err(Error::MalformedHeader(line)) => assert_eq!(line, "nonsense"),
            other => panic!("{:?}", other)
        }

        assert!(parse_headers(b"Foo:bar").is_err());
    }

    #[test]
    fn parse_rejects_bad_bytes() {
        assert!(parse_headers(b"Foo: \xff\xfe").is_err());
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut headers = parse_headers(b"Status: 404\r\nX: 1\r\nY: 2").unwrap();

        assert_eq!(headers.remove("status"), Some(String::from("404")));
        assert_eq!(headers.remove("status"), None);
        assert_eq!(headers.get("x"), Some("1"));
        assert_eq!(headers.get("y"), Some("2"));

        headers.insert("x", "3");
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("x", "3"), ("Y", "2")]);
    }

    #[test]
    fn head_end_crlf() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some((14, 18)));
    }

    #[test]
    fn head_end_bare_newlines() {
        assert_eq!(find_head_end(b"X: 1\n\nbody"), Some((4, 6)));
    }

    #[test]
    fn head_end_first_terminator_wins() {
        assert_eq!(find_head_end(b"X: 1\n\nbody\r\n\r\n"), Some((4, 6)));
        assert_eq!(find_head_end(b"X: 1\r\n\r\nA\n\nB"), Some((4, 8)));
    }

    #[test]
    fn head_end_missing() {
        assert_eq!(find_head_end(b"X: 1\r\nY: 2\r\n"), None);
    }

    #[test]
    fn render_adds_content_length() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");

        let bytes = render(200, &headers, "héllo".as_bytes()).unwrap();

        assert_eq!(
            bytes,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 6\r\n\r\nhéllo".as_bytes()
        );
    }

    #[test]
    fn render_keeps_explicit_content_length() {
        let mut headers = Headers::new();
        headers.insert("content-length", "10");

        let bytes = render(404, &headers, b"short").unwrap();

        assert_eq!(&bytes[..], &b"HTTP/1.1 404 Not Found\r\ncontent-length: 10\r\n\r\nshort"[..]);
    }

    #[test]
    fn render_empty_body() {
        let bytes = render(204, &Headers::new(), b"").unwrap();

        assert_eq!(&bytes[..], &b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n"[..]);
    }

    #[test]
    fn render_rejects_unknown_status() {
        match render(299, &Headers::new(), b"") {
            Err(Error::UnknownStatus(299)) => (),
            other => panic!("{:?}", other)
        }
    }
}
