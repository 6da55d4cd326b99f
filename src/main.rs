//! A development Web server for static files and CGI scripts.
//!
//! Call it like this:
//!
//!     devserver -f config.toml
//!
//! The config file is in the [TOML format][toml] because it's commonly used in
//! the Rust ecosystem. Here is an example:
//!
//! ```toml
//! [listen]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [static]
//! webroot = "."
//! public_prefix = "/"
//! index = "index.html"
//!
//! [cgi]
//! public_prefix = "/cgi-bin"
//! root = "./cgi-bin"
//! extensions = ["cgi"]
//! ```
//!
//! This example also serves as the defaults if no config file is provided,
//! or any given key is not present. If a key is of the wrong type, the server
//! will bail, so don't do that.
//!
//! Everything runs on one thread. Scripts are separate processes whose output
//! is polled alongside the client sockets, so a slow script only holds up its
//! own client.
//!
//! [toml]: https://github.com/toml-lang/toml

#[macro_use] extern crate log;

mod cgi;
mod codec;
mod config;
mod errors;
mod filesystem;
mod log_util;
mod server;

use config::parser::{self, parse_file};
use config::Config;
use server::serve;

use clap::{crate_version, value_parser, Arg, Command};

use std::env;
use std::path::{Path, PathBuf};
use std::process::exit;

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(log::LevelFilter::Info);

    if let Ok(var) = env::var("SERVER_LOG") {
        log_builder.parse_filters(&var);
    }

    if let Err(e) = log_builder.try_init() {
        eprintln!("devserver: Error when initializing logging: {}", e);
        exit(1);
    }

    let matches = Command::new("devserver")
        .version(crate_version!())
        .author("Alex Hill <alexander.d.hill.89@gmail.com>")
        .about("Serves a directory and runs CGI scripts, for local development")
        .arg(Arg::new("config_file")
             .short('f')
             .long("config")
             .value_name("FILE")
             .help("The TOML file with server configuration")
             .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("port")
             .short('p')
             .long("port")
             .value_name("PORT")
             .help("Port to listen on, overriding the config file")
             .value_parser(value_parser!(u16)))
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config_file") {
        Some(config_file) => load_config(config_file),
        None => Config::default()
    };

    if let Some(&port) = matches.get_one::<u16>("port") {
        config.port = port;
    }

    info!("Starting server on {}:{}", config.host, config.port);
    if let Err(e) = serve(config) {
        error!("{}", e);
        exit(1);
    }
}

fn load_config(config_file: &Path) -> Config {
    match parse_file(config_file) {
        Ok(c) => c,
        Err(parser::Error::Io(e)) => {
            error!("Error opening config file {:?}: {}", config_file, e);
            exit(1);
        },
        Err(parser::Error::Parse(e)) => {
            error!("Errors parsing config file {:?}", config_file);
            for error in e {
                error!("Config file error at line {} column {}: {}",
                       error.line, error.column, error.desc);
            }
            exit(1);
        },
        Err(parser::Error::Validation(message)) => {
            error!("Error in config file: {}", message);
            exit(1);
        }
    }
}
