//! Error handling for the http server

use std::error;
use std::fmt;
use std::io;
use std::string::FromUtf8Error;

/// A Result for internal operations.
pub type Result<T> = ::std::result::Result<T, Error>;

/// All errors which might arise within the application
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// A header line without the `": "` separator, or with a non-UTF-8 value
    MalformedHeader(String),
    MalformedRequestLine,
    InvalidUri,
    InvalidContentLength,
    /// The client sent more header bytes than we're willing to buffer
    HeadTooLarge,
    UnknownStatus(u16),
    NotFound,
    PermissionDenied,
    MethodNotAllowed,
    /// The CGI subprocess could not be launched
    GatewayStart(io::Error),
    /// The CGI subprocess produced output we can't frame as a response
    BadGateway
}

impl Error {
    /// Protocol errors close the connection without a response; the client
    /// sent garbage and there's no reliable way to answer it.
    pub fn is_protocol(&self) -> bool {
        match *self {
            Error::MalformedHeader(_) |
            Error::MalformedRequestLine |
            Error::InvalidUri |
            Error::InvalidContentLength |
            Error::HeadTooLarge => true,
            _ => false
        }
    }

    /// The status code a client sees when a handler fails with this error
    pub fn status(&self) -> u16 {
        match *self {
            Error::NotFound => 404,
            Error::PermissionDenied => 403,
            Error::MethodNotAllowed => 405,
            Error::BadGateway => 502,
            _ => 500
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
            Error::MalformedHeader(ref line) =>
                write!(f, "malformed header line {:?}", line),
            Error::MalformedRequestLine => f.write_str("malformed request line"),
            Error::InvalidUri => f.write_str("request target is not a valid URI"),
            Error::InvalidContentLength => f.write_str("invalid Content-Length"),
            Error::HeadTooLarge => f.write_str("request head too large"),
            Error::UnknownStatus(code) => write!(f, "unknown status code {}", code),
            Error::NotFound => f.write_str("not found"),
            Error::PermissionDenied => f.write_str("permission denied"),
            Error::MethodNotAllowed => f.write_str("method not allowed"),
            Error::GatewayStart(ref e) =>
                write!(f, "could not start CGI process: {}", e),
            Error::BadGateway => f.write_str("invalid response from CGI process")
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref e) | Error::GatewayStart(ref e) => Some(e),
            _ => None
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<FromUtf8Error> for Error {
    fn from(e: FromUtf8Error) -> Error {
        Error::MalformedHeader(String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}
