pub mod parser;

use std::collections::BTreeMap;
use std::path::PathBuf;

/// A holder for app configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind, as accepted by `IpAddr::from_str`
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Sent as the `Server` header and as `SERVER_SOFTWARE` to scripts
    pub software: String,
    pub stat: StaticFilesConfig,
    pub cgi: CgiConfig
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: String::from("0.0.0.0"),
            port: 8000,
            software: format!("devserver/{}", env!("CARGO_PKG_VERSION")),
            stat: Default::default(),
            cgi: Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticFilesConfig {
    /// Where the files are located on disk
    pub webroot: PathBuf,
    /// Public URI prefix that gets mapped onto `webroot`
    pub public_prefix: PathBuf,
    /// File served when a directory is requested
    pub index: String
}

impl Default for StaticFilesConfig {
    fn default() -> StaticFilesConfig {
        StaticFilesConfig {
            webroot: PathBuf::from("."),
            public_prefix: PathBuf::from("/"),
            index: String::from("index.html")
        }
    }
}

/// Settings for the CGI gateway
///
/// The environment a script sees is built from `inherit_env`, then `env`,
/// then the per-request variables, each layer overriding the last.
#[derive(Debug, Clone)]
pub struct CgiConfig {
    /// Public URI prefix that gets mapped onto `root`
    pub public_prefix: PathBuf,
    /// Directory holding scripts runnable through `public_prefix`
    pub root: PathBuf,
    /// Extensions of files under the webroot that run as scripts
    pub extensions: Vec<String>,
    /// Program that runs scripts, e.g. `php-cgi`; scripts run directly if
    /// unset
    pub interpreter: Option<PathBuf>,
    /// Names of server environment variables passed through to scripts
    pub inherit_env: Vec<String>,
    /// Extra variables for every script
    pub env: BTreeMap<String, String>
}

impl Default for CgiConfig {
    fn default() -> CgiConfig {
        CgiConfig {
            public_prefix: PathBuf::from("/cgi-bin"),
            root: PathBuf::from("./cgi-bin"),
            extensions: vec![String::from("cgi")],
            interpreter: None,
            inherit_env: ["PATH", "HOME", "LANG", "TMPDIR", "TEMP", "TMP"]
                .iter().map(|s| String::from(*s)).collect(),
            env: BTreeMap::new()
        }
    }
}
