//! Responses on their way to the wire

use crate::codec::{self, Headers};
use crate::errors::Result;

/// A complete response: status, headers and the whole body
///
/// Whoever produces a `Response` owns it until the connection renders it;
/// after that only the rendered bytes remain.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: Vec<u8>) -> Response {
        Response {
            status: status,
            headers: headers,
            body: body
        }
    }

    /// A response with a body and a `Content-Type`
    pub fn with_body<B: Into<Vec<u8>>>(status: u16, content_type: &str, body: B)
                                       -> Response {
        let mut headers = Headers::new();
        headers.insert("Content-Type", content_type);

        Response::new(status, headers, body.into())
    }

    /// The length announced to the client: an explicit `Content-Length`
    /// header if the producer set one, else the body length
    pub fn content_length(&self) -> usize {
        self.headers.get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.body.len())
    }

    /// Serializes the response for the wire
    pub fn render(&self) -> Result<Vec<u8>> {
        codec::render(self.status, &self.headers, &self.body)
    }

    /// Serializes the response, substituting the canned page for `fallback`
    /// if this one can't be rendered (an unknown status code, say).
    ///
    /// The `Server` header survives the substitution.
    pub fn into_rendered(self, fallback: u16) -> Rendered {
        match self.render() {
            Ok(bytes) => Rendered {
                status: self.status,
                content_length: self.content_length(),
                bytes: bytes
            },
            Err(e) => {
                warn!("Can't render a {} response: {}", self.status, e);

                let mut substitute = error_messages::for_status(fallback);
                if let Some(server) = self.headers.get("Server") {
                    substitute.headers.insert("Server", server);
                }

                Rendered {
                    status: substitute.status,
                    content_length: substitute.content_length(),
                    bytes: substitute.render().unwrap_or_default()
                }
            }
        }
    }
}

/// A serialized response plus what the access log needs to know about it
#[derive(Debug)]
pub struct Rendered {
    pub status: u16,
    pub content_length: usize,
    pub bytes: Vec<u8>
}

pub mod error_messages {
    use super::Response;

    fn page(status: u16, body: &'static [u8]) -> Response {
        Response::with_body(status, mime::TEXT_HTML.as_ref(), body)
    }

    /// The canned page for a status, or a plain 500 for codes without one
    pub fn for_status(status: u16) -> Response {
        match status {
            400 => error_400(),
            403 => error_403(),
            404 => error_404(),
            405 => error_405(),
            502 => error_502(),
            _ => error_500()
        }
    }

    pub fn error_500() -> Response {
        page(500, ERROR_500)
    }

    const ERROR_500: &'static [u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Internal Error</h1><p>Something went wrong on my side.</p><p>There's nothing you can do; maybe come back later.</p></body></html>";

    pub fn error_502() -> Response {
        page(502, ERROR_502)
    }

    const ERROR_502: &'static [u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Gateway</h1><p>The script behind this page didn't produce a valid response.</p></body></html>";

    pub fn error_405() -> Response {
        page(405, ERROR_405)
    }

    const ERROR_405: &'static [u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Method Not Allowed</h1><p>This resource doesn't understand that method. Sorry about that.</p></body></html>";

    pub fn error_404() -> Response {
        page(404, ERROR_404)
    }

    const ERROR_404: &'static [u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Not Found</h1><p>I couldn't find that file. Sorry.</p></body></html>";

    pub fn error_403() -> Response {
        page(403, ERROR_403)
    }

    const ERROR_403: &'static [u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Forbidden</h1><p>You don't have permission to view that file. Sorry.</p></body></html>";

    pub fn error_400() -> Response {
        page(400, ERROR_400)
    }

    const ERROR_400: &'static [u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Request</h1><p>Your request had some kind of bad syntax. Are you using netcat?</p></body></html>";
}
