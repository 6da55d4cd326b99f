use super::*;
use toml::{Table, Value};

use std::fs::File;
use std::io::{self, Read};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub fn parse_file<P: AsRef<Path>>(conf: P)
                                  -> Result<Config, Error>
{
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    parse_str(&toml)
}

pub fn parse_str(toml: &str) -> Result<Config, Error> {
    match Table::from_str(toml) {
        Ok(table) => config_from_table(table),
        Err(e) => Err(Error::Parse(vec![message_from_error(toml, &e)]))
    }
}

/// Follows a dotted key like `"listen.port"` through nested tables
fn lookup<'a>(table: &'a Table, path: &str) -> Option<&'a Value> {
    let mut keys = path.split('.');
    let mut current = table.get(keys.next()?)?;

    for key in keys {
        current = current.as_table()?.get(key)?;
    }

    Some(current)
}

fn port_at(table: &Table, key: &str, what: &str) -> Result<Option<u16>, Error> {
    match lookup(table, key) {
        Some(&Value::Integer(p))
            if p <= u16::MAX as i64 &&
            p > 0 => Ok(Some(p as u16)),
        Some(&Value::Integer(p)) => Err(Error::Validation(
            format!("The given {} {} is out of range", what, p)
        )),
        Some(val) => Err(Error::Validation(
            format!("Expected the {} to be an integer, got a {}",
                    what, val.type_str())
        )),
        None => Ok(None)
    }
}

fn string_at<'a>(table: &'a Table, key: &str, what: &str)
                 -> Result<Option<&'a str>, Error>
{
    match lookup(table, key) {
        Some(&Value::String(ref s)) => Ok(Some(s)),
        Some(val) => Err(Error::Validation(
            format!("Expected the {} to be a string, got a {}",
                    what, val.type_str())
        )),
        None => Ok(None)
    }
}

fn strings_at(table: &Table, key: &str, what: &str)
              -> Result<Option<Vec<String>>, Error>
{
    let array = match lookup(table, key) {
        Some(&Value::Array(ref array)) => array,
        Some(val) => return Err(Error::Validation(
            format!("Expected the {} to be an array, got a {}",
                    what, val.type_str())
        )),
        None => return Ok(None)
    };

    let mut strings = Vec::with_capacity(array.len());
    for item in array {
        match *item {
            Value::String(ref s) => strings.push(s.clone()),
            ref val => return Err(Error::Validation(
                format!("Expected every entry of the {} to be a string, got a {}",
                        what, val.type_str())
            ))
        }
    }

    Ok(Some(strings))
}

fn config_from_table(table: Table) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    if let Some(port) = port_at(&table, "listen.port", "port")? {
        config.port = port;
    }

    if let Some(host) = string_at(&table, "listen.host", "listen host")? {
        if IpAddr::from_str(host).is_err() {
            return Err(Error::Validation(
                format!("The listen host {:?} is not an IP address", host)
            ));
        }
        config.host = String::from(host);
    }

    if let Some(software) = string_at(&table, "server.software", "server software")? {
        config.software = String::from(software);
    }

    if let Some(path) = string_at(&table, "static.webroot", "webroot")? {
        config.stat.webroot = PathBuf::from(path);
    }

    if let Some(path) = string_at(&table, "static.public_prefix", "static prefix")? {
        config.stat.public_prefix = absolute_prefix(path, "static prefix")?;
    }

    if let Some(index) = string_at(&table, "static.index", "index file")? {
        config.stat.index = String::from(index);
    }

    if let Some(path) = string_at(&table, "cgi.public_prefix", "CGI prefix")? {
        config.cgi.public_prefix = absolute_prefix(path, "CGI prefix")?;
    }

    if let Some(path) = string_at(&table, "cgi.root", "CGI root")? {
        config.cgi.root = PathBuf::from(path);
    }

    if let Some(extensions) = strings_at(&table, "cgi.extensions", "CGI extensions")? {
        config.cgi.extensions = extensions;
    }

    if let Some(interpreter) = string_at(&table, "cgi.interpreter", "CGI interpreter")? {
        config.cgi.interpreter = Some(PathBuf::from(interpreter));
    }

    if let Some(names) = strings_at(&table, "cgi.inherit_env", "inherited environment")? {
        config.cgi.inherit_env = names;
    }

    match lookup(&table, "cgi.env") {
        Some(&Value::Table(ref vars)) => {
            for (name, value) in vars {
                let value = match *value {
                    Value::String(ref s) => s.clone(),
                    Value::Integer(i) => i.to_string(),
                    Value::Boolean(b) => b.to_string(),
                    ref val => return Err(Error::Validation(
                        format!("Expected CGI variable {} to be a string, got a {}",
                                name, val.type_str())
                    ))
                };
                config.cgi.env.insert(name.clone(), value);
            }
        },
        Some(val) => return Err(Error::Validation(
            format!("Expected the CGI environment to be a table, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    Ok(config)
}

fn absolute_prefix(path: &str, what: &str) -> Result<PathBuf, Error> {
    if !path.starts_with('/') {
        return Err(Error::Validation(
            format!("The {} {:?} must start with '/'", what, path)
        ));
    }

    Ok(PathBuf::from(path))
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(Vec<ErrorMessage>),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

/// An owned, rendered version of a TOML parse error
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub desc: String,
    pub line: usize,
    pub column: usize
}

/// Convert a `toml::de::Error` into an `ErrorMessage`
fn message_from_error(source: &str, error: &toml::de::Error) -> ErrorMessage {
    let offset = error.span().map_or(0, |span| span.start);
    let (line, column) = to_linecol(source, offset);

    ErrorMessage {
        desc: String::from(error.message()),
        line: line,
        column: column
    }
}

/// Zero-based line and column of a byte offset
fn to_linecol(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[.. offset.min(source.len())];
    let line = before.matches('\n').count();
    let column = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1);

    (line, column)
}
