//! Smol utilities for logging

use chrono::{DateTime, Local, TimeZone};

use std::ascii;
use std::fmt::Display;
use std::net::SocketAddr;

/// Make an Ascii-safe string
pub fn ascii_escape(s: &[u8]) -> String {
    s.iter().flat_map(|&b| ascii::escape_default(b)).map(char::from).collect()
}

/// One access-log entry, in the common logfile format
///
/// http://www.w3.org/Daemon/User/Config/Logging.html#common-logfile-format
pub fn common_log_line<Tz>(remote_addr: &SocketAddr,
                           time: &DateTime<Tz>,
                           request_line: &str,
                           status: u16,
                           content_length: usize) -> String
    where Tz: TimeZone, Tz::Offset: Display
{
    format!("{} - - [{}] \"{}\" {} {}",
            remote_addr.ip(),
            time.format("%d/%b/%Y:%H:%M:%S %z"),
            ascii_escape(request_line.as_bytes()),
            status,
            content_length)
}

/// Writes the access-log entry for a finished exchange
pub fn log_access(remote_addr: &SocketAddr, request_line: &str, status: u16,
                  content_length: usize) {
    info!(target: "access", "{}",
          common_log_line(remote_addr, &Local::now(), request_line, status,
                          content_length));
}
