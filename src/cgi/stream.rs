//! Buffering a CGI process's output without blocking the event loop
//!
//! A `CgiStream` owns the subprocess and its stdout pipe. The reactor polls
//! it like any socket (it's a `mio` event source) and calls `pump` whenever
//! the pipe is readable. Output piles up until the script closes stdout; only
//! then can we find the end of its headers and compute a `Content-Length`.
//! At that point the whole document is translated into a rendered HTTP
//! response, which `Read` then hands out.
//!
//! ```text
//! Draining --(end of output)--> Framed --(all bytes read)--> Exhausted
//! ```

use super::parser::translate;
use crate::server::response::error_messages;

use mio::event::Source;
use mio::unix::pipe::Receiver;
use mio::{Interest, Registry, Token};

use std::io::{self, Cursor, Read};
use std::mem;
use std::process::{Child, ExitStatus};

/// Bytes taken from the pipe per read
const CHUNK: usize = 8192;

/// What a `pump` achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The script hasn't finished writing; wait for the next readiness event
    Pending,
    /// The response is ready to be read
    Framed
}

enum State {
    Draining(Vec<u8>),
    Framed(Cursor<Vec<u8>>),
    Exhausted
}

pub struct CgiStream {
    child: Child,
    pipe: Receiver,
    state: State,
    server_id: String,
    status: Option<u16>,
    content_length: Option<usize>,
    exit_reported: bool
}

impl CgiStream {
    /// Takes ownership of a freshly spawned process with a piped stdout.
    ///
    /// On failure the process is killed and reaped before returning.
    pub fn new(mut child: Child, server_id: String) -> io::Result<CgiStream> {
        let pipe = match child.stdout.take() {
            Some(stdout) => Receiver::from(stdout),
            None => {
                reap(&mut child);
                return Err(io::Error::new(io::ErrorKind::Other,
                                          "CGI process has no output pipe"));
            }
        };

        if let Err(e) = pipe.set_nonblocking(true) {
            reap(&mut child);
            return Err(e);
        }

        Ok(CgiStream {
            child: child,
            pipe: pipe,
            state: State::Draining(Vec::new()),
            server_id: server_id,
            status: None,
            content_length: None,
            exit_reported: false
        })
    }

    /// Reads whatever the pipe has without blocking.
    ///
    /// Reports `Framed` only once the script has closed its output, even if
    /// the end of its headers is already visible.
    pub fn pump(&mut self) -> Progress {
        let finished = match self.state {
            State::Draining(ref mut raw) => drain(&mut self.pipe, raw),
            _ => return Progress::Framed
        };

        if !finished {
            return Progress::Pending;
        }

        self.frame();
        Progress::Framed
    }

    fn frame(&mut self) {
        let raw = match mem::replace(&mut self.state, State::Exhausted) {
            State::Draining(raw) => raw,
            other => {
                self.state = other;
                return;
            }
        };

        match self.child.try_wait() {
            Ok(Some(status)) => {
                log_exit(self.child.id(), status);
                self.exit_reported = true;
            },
            Ok(None) => (),
            Err(e) => warn!("Couldn't check on CGI process {}: {}", self.child.id(), e)
        }

        let mut response = match translate(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!("CGI process {}: {}", self.child.id(), e);
                error_messages::error_502()
            }
        };
        response.headers.insert("Server", self.server_id.as_str());

        let rendered = response.into_rendered(502);
        debug!("CGI process {} framed a {} response of {} bytes",
               self.child.id(), rendered.status, rendered.content_length);

        self.status = Some(rendered.status);
        self.content_length = Some(rendered.content_length);
        self.state = State::Framed(Cursor::new(rendered.bytes));
    }

    /// Status of the framed response
    #[inline]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// `Content-Length` of the framed response
    #[inline]
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }
}

/// Reads until the pipe would block or runs dry. Returns whether the output
/// has ended.
fn drain(pipe: &mut Receiver, raw: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; CHUNK];

    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => return true,
            Ok(n) => raw.extend_from_slice(&chunk[.. n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => {
                warn!("Error reading CGI output: {}", e);
                return true;
            }
        }
    }
}

fn log_exit(pid: u32, status: ExitStatus) {
    if !status.success() {
        warn!("CGI process {} exited with {}", pid, status);
    }
}

/// Collects the process, killing it first if it's still running.
///
/// Returns the exit status only if the process ended on its own.
fn reap(child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => return Some(status),
        Ok(None) => {
            debug!("Killing CGI process {}", child.id());
            if let Err(e) = child.kill() {
                warn!("Couldn't kill CGI process {}: {}", child.id(), e);
            }
        },
        Err(e) => warn!("Couldn't check on CGI process {}: {}", child.id(), e)
    }

    if let Err(e) = child.wait() {
        warn!("Couldn't reap CGI process {}: {}", child.id(), e);
    }
    None
}

impl Read for CgiStream {
    /// Serves the rendered response. Until the script is done this fails with
    /// `WouldBlock`; afterwards it reads like a buffer and ends with `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Progress::Pending = self.pump() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let (read, done) = match self.state {
            State::Framed(ref mut rendered) => {
                let read = rendered.read(buf)?;
                (read, rendered.position() as usize >= rendered.get_ref().len())
            },
            _ => return Ok(0)
        };

        if done {
            self.state = State::Exhausted;
        }

        Ok(read)
    }
}

impl Source for CgiStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest)
                -> io::Result<()> {
        self.pipe.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest)
                  -> io::Result<()> {
        self.pipe.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.pipe.deregister(registry)
    }
}

impl Drop for CgiStream {
    fn drop(&mut self) {
        if let Some(status) = reap(&mut self.child) {
            if !self.exit_reported {
                log_exit(self.child.id(), status);
            }
        }
    }
}
