//! Helpers for request paths and the filesystem they map onto

use crate::errors::{Error, Result};

use std::path::{Component, Path, PathBuf};

/// Decodes percent-encoded bytes in a request path.
///
/// Bogus percent-encoding, like `b"%bo"` or a trailing `b"%2"`, returns
/// `Err`. A `'+'` is left alone; it only means space in query strings.
pub fn percent_decode(path: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(path.len());

    let mut i = 0;
    while i < path.len() {
        match path[i] {
            b'%' => {
                if i + 2 >= path.len() {
                    return Err(Error::InvalidUri);
                }

                let high_nybble = path[i + 1];
                let low_nybble = path[i + 2];

                if !is_hexit(high_nybble) || !is_hexit(low_nybble) {
                    return Err(Error::InvalidUri);
                }

                buffer.push(from_hexit(high_nybble) << 4 |
                            from_hexit(low_nybble));

                i += 3;
            },
            b => {
                buffer.push(b);
                i += 1;
            }
        }
    }

    Ok(buffer)
}

/// Whether a decoded request path may be served at all.
///
/// Paths must be absolute, must not contain `..` anywhere, and must not
/// touch dotfiles (any segment starting with `.`).
pub fn is_allowed_uri(uri: &str) -> bool {
    uri.starts_with('/') &&
        !uri.contains("..") &&
        !uri.contains("/.")
}

/// Joins a request path (relative to some mount point) onto a directory.
///
/// Only normal components survive, so the result can't climb out of `root`
/// lexically; symlinks are the caller's problem.
pub fn join_relative<P: AsRef<Path>>(root: P, relative: &Path) -> PathBuf {
    let mut joined = root.as_ref().to_path_buf();

    for component in relative.components() {
        if let Component::Normal(part) = component {
            joined.push(part);
        }
    }

    joined
}

/// Returns `true` iff the byte is a hexadecimal digit according to ASCII
fn is_hexit(x: u8) -> bool {
    x.is_ascii_hexdigit()
}

/// Converts from a hexadecimal digit to its value
fn from_hexit(x: u8) -> u8 {
    match x {
        b'0' ..= b'9' => x - b'0',
        b'A' ..= b'F' => x - b'A' + 10,
        b'a' ..= b'f' => x - b'a' + 10,
        _ => 0
    }
}
