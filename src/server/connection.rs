//! Per-socket state for the reactor
//!
//! A connection cycles through three stages for every exchange:
//!
//! ```text
//! Reading --> Running (CGI only) --> Writing --> Reading (keep-alive)
//! ```
//!
//! Every socket or pipe operation here is non-blocking. Running out of data
//! (or buffer space) just means waiting for the next readiness event.

use super::request::{Phase, Request};
use super::response::{error_messages, Response};
use super::{Handler, Reply};
use crate::cgi::{CgiStream, Progress};
use crate::errors::{Error, Result};
use crate::filesystem::is_allowed_uri;
use crate::log_util::log_access;

use mio::event::Source;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;

/// Bytes moved per socket read, and per refill of the write buffer
const CHUNK: usize = 8192;

/// Token of the listening socket. Connection tokens start above it.
pub const LISTENER: Token = Token(0);

/// Which of a connection's event sources a token refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Socket,
    Pipe
}

pub fn socket_token(key: usize) -> Token {
    Token(2 * key + 1)
}

pub fn pipe_token(key: usize) -> Token {
    Token(2 * key + 2)
}

/// Maps a connection token back to its slab key
pub fn decode(token: Token) -> Option<(usize, Endpoint)> {
    match token.0 {
        0 => None,
        t if t % 2 == 1 => Some(((t - 1) / 2, Endpoint::Socket)),
        t => Some(((t - 2) / 2, Endpoint::Pipe))
    }
}

/// What the reactor should do with a connection after driving it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    Close
}

enum Stage {
    Reading,
    /// Waiting for a CGI script to finish its output
    Running(CgiStream),
    /// `pending[sent ..]` goes out first, then whatever `cgi` still holds
    Writing {
        pending: Vec<u8>,
        sent: usize,
        cgi: Option<CgiStream>
    }
}

/// What the access log needs once the response is out
struct Exchange {
    status: u16,
    content_length: usize
}

pub struct Connection {
    key: usize,
    socket: TcpStream,
    remote_addr: SocketAddr,
    local_port: u16,
    request: Request,
    stage: Stage,
    exchange: Option<Exchange>
}

impl Connection {
    pub fn new(key: usize, socket: TcpStream, remote_addr: SocketAddr,
               local_port: u16) -> Connection {
        Connection {
            key: key,
            socket: socket,
            remote_addr: remote_addr,
            local_port: local_port,
            request: Request::new(remote_addr, local_port),
            stage: Stage::Reading,
            exchange: None
        }
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.socket, socket_token(self.key),
                          Interest::READABLE | Interest::WRITABLE)
    }

    /// Stops polling everything this connection owns. Dropping the
    /// connection afterwards closes the socket and kills any script still
    /// running for it.
    pub fn deregister(&mut self, registry: &Registry) {
        if let Err(e) = self.socket.deregister(registry) {
            debug!("Couldn't deregister socket of {}: {}", self.remote_addr, e);
        }

        if let Stage::Running(ref mut stream) = self.stage {
            if let Err(e) = stream.deregister(registry) {
                debug!("Couldn't deregister CGI pipe of {}: {}", self.remote_addr, e);
            }
        }
    }

    /// Handles readiness on the client socket. `hung_up` is set when the
    /// event reports the peer closed its side.
    pub fn socket_ready(&mut self, registry: &Registry, handler: &dyn Handler,
                        software: &str, hung_up: bool) -> Next {
        // Nobody is left to read what the script produces
        if hung_up {
            if let Stage::Running(_) = self.stage {
                debug!("{} hung up while its script was running", self.remote_addr);
                return Next::Close;
            }
        }

        self.drive(registry, handler, software)
    }

    /// Handles readiness on the CGI output pipe
    pub fn pipe_ready(&mut self, registry: &Registry, handler: &dyn Handler,
                      software: &str) -> Next {
        match self.stage {
            Stage::Running(ref mut stream) => {
                if stream.pump() == Progress::Pending {
                    return Next::Continue;
                }
            },
            _ => return Next::Continue
        }

        let mut stream = match mem::replace(&mut self.stage, Stage::Reading) {
            Stage::Running(stream) => stream,
            _ => return Next::Continue
        };

        if let Err(e) = stream.deregister(registry) {
            debug!("Couldn't deregister CGI pipe of {}: {}", self.remote_addr, e);
        }

        self.exchange = Some(Exchange {
            status: stream.status().unwrap_or(502),
            content_length: stream.content_length().unwrap_or(0)
        });
        self.stage = Stage::Writing {
            pending: Vec::new(),
            sent: 0,
            cgi: Some(stream)
        };

        self.drive(registry, handler, software)
    }

    /// Moves the connection along as far as it can go without blocking
    fn drive(&mut self, registry: &Registry, handler: &dyn Handler,
             software: &str) -> Next {
        loop {
            match self.stage {
                Stage::Running(_) => return Next::Continue,
                Stage::Writing { .. } => {
                    match self.flush() {
                        Ok(true) => (),
                        Ok(false) => return Next::Continue,
                        Err(e) => {
                            debug!("Error writing to {}: {}", self.remote_addr, e);
                            return Next::Close;
                        }
                    }

                    self.log_exchange();

                    if !self.request.keep_alive() {
                        return Next::Close;
                    }
                    if let Err(e) = self.reset() {
                        info!("Bad request from {}: {}", self.remote_addr, e);
                        return Next::Close;
                    }
                },
                Stage::Reading => {
                    if !self.request.is_complete() {
                        match self.fill() {
                            Ok(Some(Phase::Complete)) => (),
                            Ok(Some(_)) => return Next::Continue,
                            Ok(None) => return Next::Close,
                            Err(e) => {
                                if e.is_protocol() {
                                    info!("Bad request from {}: {}", self.remote_addr, e);
                                }
                                else {
                                    debug!("Error reading from {}: {}", self.remote_addr, e);
                                }
                                return Next::Close;
                            }
                        }
                    }

                    self.dispatch(registry, handler, software);
                }
            }
        }
    }

    /// Reads until the request is complete or the socket runs dry. `None`
    /// means the peer hung up.
    fn fill(&mut self) -> Result<Option<Phase>> {
        let mut buf = [0u8; CHUNK];

        loop {
            match self.socket.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    trace!("Read {} bytes from {}", n, self.remote_addr);
                    if self.request.feed(&buf[.. n])? == Phase::Complete {
                        return Ok(Some(Phase::Complete));
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock =>
                    return Ok(Some(self.request.phase())),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset =>
                    return Ok(None),
                Err(e) => return Err(Error::from(e))
            }
        }
    }

    /// Resolves a response for the completed request
    fn dispatch(&mut self, registry: &Registry, handler: &dyn Handler,
                software: &str) {
        let reply = if is_allowed_uri(self.request.path()) {
            handler.serve(&self.request)
        }
        else {
            Err(Error::PermissionDenied)
        };

        match reply {
            Ok(Reply::Ready(response)) => self.respond(response, software),
            Ok(Reply::Cgi(mut stream)) => {
                match stream.register(registry, pipe_token(self.key), Interest::READABLE) {
                    Ok(()) => self.stage = Stage::Running(stream),
                    Err(e) => {
                        warn!("Couldn't poll CGI output: {}", e);
                        self.respond(error_messages::error_500(), software);
                    }
                }
            },
            Err(e) => {
                let status = e.status();
                if status >= 500 {
                    warn!("Error serving {:?}: {}", self.request.request_line(), e);
                }
                else {
                    debug!("Refusing {:?}: {}", self.request.request_line(), e);
                }

                self.respond(error_messages::for_status(status), software);
            }
        }
    }

    fn respond(&mut self, mut response: Response, software: &str) {
        response.headers.insert("Server", software);
        let rendered = response.into_rendered(500);

        self.exchange = Some(Exchange {
            status: rendered.status,
            content_length: rendered.content_length
        });
        self.stage = Stage::Writing {
            pending: rendered.bytes,
            sent: 0,
            cgi: None
        };
    }

    /// Writes as much of the response as the socket takes. `Ok(true)` once
    /// all of it is out.
    fn flush(&mut self) -> io::Result<bool> {
        let (pending, sent, cgi) = match self.stage {
            Stage::Writing { ref mut pending, ref mut sent, ref mut cgi } =>
                (pending, sent, cgi),
            _ => return Ok(true)
        };

        loop {
            if *sent == pending.len() {
                let refilled = match *cgi {
                    Some(ref mut stream) => {
                        pending.resize(CHUNK, 0);
                        let n = stream.read(pending)?;
                        pending.truncate(n);
                        n
                    },
                    None => 0
                };

                if refilled == 0 {
                    return Ok(true);
                }
                *sent = 0;
            }

            match self.socket.write(&pending[*sent ..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => *sent += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e)
            }
        }
    }

    fn log_exchange(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            log_access(&self.remote_addr, self.request.request_line(),
                       exchange.status, exchange.content_length);
        }
    }

    /// Starts over with a fresh request, handing it whatever the client
    /// already sent past the last one
    fn reset(&mut self) -> Result<()> {
        let surplus = self.request.take_surplus();

        self.request = Request::new(self.remote_addr, self.local_port);
        self.stage = Stage::Reading;

        if !surplus.is_empty() {
            self.request.feed(&surplus)?;
        }

        Ok(())
    }
}
