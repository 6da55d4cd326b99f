//! Running scripts through CGI/1.1
//!
//! The gateway turns a finished request into a running subprocess; the
//! `CgiStream` it hands back carries that process through to a response.
//! See RFC 3875 for the environment a script expects.

pub mod parser;
pub mod stream;

pub use self::stream::{CgiStream, Progress};

use crate::config::{CgiConfig, Config};
use crate::errors::{Error, Result};
use crate::server::request::Request;
use crate::server::{Handler, Reply};

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;

/// Environment variables layered over the computed CGI environment
pub type EnvOverrides = BTreeMap<String, String>;

/// Launches CGI scripts
#[derive(Debug, Clone)]
pub struct Gateway {
    conf: CgiConfig,
    software: String
}

impl Gateway {
    pub fn new(conf: &Config) -> Gateway {
        Gateway {
            conf: conf.cgi.clone(),
            software: conf.software.clone()
        }
    }

    /// The file extensions that should run through this gateway
    #[inline]
    pub fn extensions(&self) -> &[String] {
        &self.conf.extensions
    }

    /// Builds the environment for running `script` on behalf of `req`.
    ///
    /// Later layers win: inherited server variables, configured variables,
    /// per-request variables, then `overrides`.
    pub fn environment(&self, req: &Request, script: &Path,
                       overrides: Option<&EnvOverrides>) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();

        for name in &self.conf.inherit_env {
            if let Some(value) = env::var_os(name) {
                vars.insert(name.clone(), value.to_string_lossy().into_owned());
            }
        }

        for (name, value) in &self.conf.env {
            vars.insert(name.clone(), value.clone());
        }

        let server_name = req.get_header("Host")
            .map(|host| match host.rfind(':') {
                Some(i) if !host.ends_with(']') => &host[.. i],
                _ => host
            })
            .unwrap_or("localhost");

        vars.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());
        vars.insert("REQUEST_METHOD".into(), req.method().into());
        vars.insert("REQUEST_URI".into(), req.request_uri().into());
        vars.insert("QUERY_STRING".into(), req.query_string().into());
        vars.insert("REDIRECT_STATUS".into(), "200".into());
        vars.insert("SCRIPT_FILENAME".into(), script.to_string_lossy().into_owned());
        vars.insert("SCRIPT_NAME".into(), req.path().into());
        vars.insert("SERVER_NAME".into(), server_name.into());
        vars.insert("SERVER_PORT".into(), req.local_port().to_string());
        vars.insert("SERVER_PROTOCOL".into(), req.version().into());
        vars.insert("SERVER_SOFTWARE".into(), self.software.clone());
        vars.insert("REMOTE_ADDR".into(), req.remote_addr().ip().to_string());

        if let Some(content_type) = req.get_header("Content-Type") {
            vars.insert("CONTENT_TYPE".into(), content_type.into());
        }
        if req.content_length() > 0 {
            vars.insert("CONTENT_LENGTH".into(), req.content_length().to_string());
        }

        for (name, value) in req.headers() {
            let name = format!("HTTP_{}", name.replace("-", "_").to_ascii_uppercase());
            vars.insert(name, value.into());
        }

        if let Some(overrides) = overrides {
            for (name, value) in overrides {
                vars.insert(name.clone(), value.clone());
            }
        }

        vars
    }

    /// Starts `script` for `req`.
    ///
    /// Fails with `NotFound` without spawning anything if `script` isn't a
    /// regular file, and with `GatewayStart` if the process can't be
    /// launched.
    pub fn execute(&self, req: &Request, script: &Path,
                   overrides: Option<&EnvOverrides>) -> Result<CgiStream> {
        match fs::metadata(script) {
            Ok(ref meta) if meta.is_file() => (),
            _ => return Err(Error::NotFound)
        }

        let vars = self.environment(req, script, overrides);

        // The body goes through an unlinked temporary file rather than a pipe,
        // so handing it over can never block
        let stdin = if req.body().is_empty() {
            Stdio::null()
        }
        else {
            let mut content = tempfile::tempfile()?;
            content.write_all(req.body())?;
            content.seek(SeekFrom::Start(0))?;
            Stdio::from(content)
        };

        let mut command = match self.conf.interpreter {
            Some(ref interpreter) => {
                let mut c = Command::new(interpreter);
                c.arg(script);
                c
            },
            None => Command::new(script)
        };

        if let Some(dir) = script.parent() {
            command.current_dir(dir);
        }

        command.env_clear()
            .envs(&vars)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                warn!("Couldn't start CGI process for {}: {}", script.display(), e);
                return Err(Error::GatewayStart(e));
            }
        };
        debug!("Started CGI process {} for {}", child.id(), script.display());

        CgiStream::new(child, self.software.clone()).map_err(Error::GatewayStart)
    }
}

/// A directory of scripts mounted under a URI prefix
///
/// `/cgi-bin/app/extra/bits` runs `<root>/app` with `PATH_INFO` set to
/// `/extra/bits`.
pub struct Scripts {
    gateway: Rc<Gateway>,
    prefix: PathBuf,
    root: PathBuf
}

impl Scripts {
    pub fn new(gateway: Rc<Gateway>, prefix: PathBuf, root: PathBuf) -> Scripts {
        Scripts {
            gateway: gateway,
            prefix: prefix,
            root: root
        }
    }

    /// Walks down from the root until a path segment names a file. Returns
    /// the script, its public name and the left-over path.
    fn locate(&self, request_path: &Path) -> Option<(PathBuf, String, String)> {
        let relative = request_path.strip_prefix(&self.prefix).ok()?;

        let mut script = self.root.clone();
        let mut script_name = self.prefix.to_string_lossy().trim_end_matches('/').to_owned();
        let mut segments = relative.components().filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None
        });

        while let Some(segment) = segments.next() {
            script.push(&segment);
            script_name.push('/');
            script_name.push_str(&segment);

            if script.is_file() {
                let path_info: String = segments.by_ref().map(|s| format!("/{}", s)).collect();
                return Some((script, script_name, path_info));
            }
            if !script.is_dir() {
                return None;
            }
        }

        None
    }
}

impl Handler for Scripts {
    fn serve(&self, req: &Request) -> Result<Reply> {
        let (script, script_name, path_info) = match self.locate(Path::new(req.path())) {
            Some(found) => found,
            None => return Err(Error::NotFound)
        };

        let mut overrides = EnvOverrides::new();
        overrides.insert(String::from("SCRIPT_NAME"), script_name);
        if !path_info.is_empty() {
            overrides.insert(String::from("PATH_INFO"), path_info);
        }

        Ok(Reply::Cgi(self.gateway.execute(req, &script, Some(&overrides))?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    fn gateway(interpreter: Option<&str>) -> Gateway {
        let mut conf = Config::default();
        conf.software = String::from("devserver/test");
        conf.cgi.interpreter = interpreter.map(PathBuf::from);
        conf.cgi.env.insert(String::from("APP_ENV"), String::from("test"));
        conf.cgi.env.insert(String::from("QUERY_STRING"), String::from("shadowed"));
        Gateway::new(&conf)
    }

    fn request(raw: &[u8]) -> Request {
        let mut req = Request::new("10.1.2.3:5555".parse().unwrap(), 8080);
        assert!(req.feed(raw).unwrap() == crate::server::request::Phase::Complete);
        req
    }

    fn run(gateway: &Gateway, req: &Request, script: &Path,
           overrides: Option<&EnvOverrides>) -> String {
        let mut stream = gateway.execute(req, script, overrides).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while stream.pump() == Progress::Pending {
            assert!(Instant::now() < deadline, "CGI output never ended");
            thread::sleep(Duration::from_millis(5));
        }

        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn environment_follows_rfc3875() {
        let req = request(b"POST /app/form.cgi?a=1 HTTP/1.1\r\nHost: example.test:8080\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nX-Custom-Thing: yes\r\n\r\nhi");
        let vars = gateway(None).environment(&req, Path::new("/srv/app/form.cgi"), None);

        assert_eq!(vars["REQUEST_METHOD"], "POST");
        assert_eq!(vars["REQUEST_URI"], "/app/form.cgi?a=1");
        assert_eq!(vars["QUERY_STRING"], "a=1");
        assert_eq!(vars["SCRIPT_FILENAME"], "/srv/app/form.cgi");
        assert_eq!(vars["SCRIPT_NAME"], "/app/form.cgi");
        assert_eq!(vars["SERVER_PROTOCOL"], "HTTP/1.1");
        assert_eq!(vars["SERVER_SOFTWARE"], "devserver/test");
        assert_eq!(vars["SERVER_NAME"], "example.test");
        assert_eq!(vars["SERVER_PORT"], "8080");
        assert_eq!(vars["REMOTE_ADDR"], "10.1.2.3");
        assert_eq!(vars["CONTENT_TYPE"], "text/plain");
        assert_eq!(vars["CONTENT_LENGTH"], "2");
        assert_eq!(vars["GATEWAY_INTERFACE"], "CGI/1.1");
        assert_eq!(vars["HTTP_X_CUSTOM_THING"], "yes");
        assert_eq!(vars["HTTP_HOST"], "example.test:8080");
        assert_eq!(vars["APP_ENV"], "test");
    }

    #[test]
    fn computed_variables_beat_configured_ones() {
        let req = request(b"GET /x?real HTTP/1.1\r\n\r\n");
        let vars = gateway(None).environment(&req, Path::new("/x"), None);

        assert_eq!(vars["QUERY_STRING"], "real");
        assert!(!vars.contains_key("CONTENT_LENGTH"));
        assert!(!vars.contains_key("CONTENT_TYPE"));
        assert_eq!(vars["SERVER_NAME"], "localhost");
    }

    #[test]
    fn overrides_win() {
        let req = request(b"GET /x HTTP/1.1\r\n\r\n");
        let mut overrides = EnvOverrides::new();
        overrides.insert(String::from("PATH_INFO"), String::from("/extra"));
        overrides.insert(String::from("SCRIPT_NAME"), String::from("/cgi-bin/x"));

        let vars = gateway(None).environment(&req, Path::new("/x"), Some(&overrides));

        assert_eq!(vars["PATH_INFO"], "/extra");
        assert_eq!(vars["SCRIPT_NAME"], "/cgi-bin/x");
    }

    #[test]
    fn missing_script_is_not_found() {
        let req = request(b"GET /nope.cgi HTTP/1.1\r\n\r\n");

        match gateway(Some("/bin/sh")).execute(&req, Path::new("/definitely/not/here.cgi"), None) {
            Err(Error::NotFound) => (),
            Err(e) => panic!("{:?}", e),
            Ok(_) => panic!("spawned a process for a missing script")
        }
    }

    #[test]
    fn directory_is_not_a_script() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(b"GET / HTTP/1.1\r\n\r\n");

        match gateway(Some("/bin/sh")).execute(&req, dir.path(), None) {
            Err(Error::NotFound) => (),
            Err(e) => panic!("{:?}", e),
            Ok(_) => panic!("ran a directory")
        }
    }

    #[test]
    fn missing_interpreter_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "a.cgi", "echo hi\n");
        let req = request(b"GET /a.cgi HTTP/1.1\r\n\r\n");

        match gateway(Some("/no/such/interpreter")).execute(&req, &path, None) {
            Err(Error::GatewayStart(_)) => (),
            Err(e) => panic!("{:?}", e),
            Ok(_) => panic!("started a missing interpreter")
        }
    }

    #[test]
    fn script_sees_its_environment_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "echo.cgi",
                          "printf 'Status: 201\\r\\nContent-Type: text/plain\\r\\n\\r\\n'\n\
                           printf '%s|%s|%s|' \"$REQUEST_METHOD\" \"$QUERY_STRING\" \"$HTTP_X_TOKEN\"\n\
                           cat\n");
        let req = request(b"POST /echo.cgi?q=1 HTTP/1.1\r\nX-Token: abc\r\nContent-Length: 9\r\n\r\nname=test");

        let out = run(&gateway(Some("/bin/sh")), &req, &path, None);

        assert!(out.starts_with("HTTP/1.1 201 Created\r\n"), "{}", out);
        assert!(out.contains("\r\nServer: devserver/test\r\n"));
        assert!(out.ends_with("\r\n\r\nPOST|q=1|abc|name=test"), "{}", out);
    }

    #[test]
    fn script_without_body_reads_empty_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "count.cgi",
                          "printf 'Content-Type: text/plain\\r\\n\\r\\n'\nwc -c | tr -d ' '\n");
        let req = request(b"GET /count.cgi HTTP/1.1\r\n\r\n");

        let out = run(&gateway(Some("/bin/sh")), &req, &path, None);

        assert!(out.ends_with("\r\n\r\n0\n"), "{}", out);
    }

    #[test]
    fn script_runs_in_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "pwd.cgi", "printf 'X: 1\\r\\n\\r\\n'\npwd -P\n");
        let req = request(b"GET /pwd.cgi HTTP/1.1\r\n\r\n");

        let out = run(&gateway(Some("/bin/sh")), &req, &path, None);
        let expected = fs::canonicalize(dir.path()).unwrap();

        assert!(out.ends_with(&format!("\r\n\r\n{}\n", expected.display())), "{}", out);
    }

    #[test]
    fn output_without_separator_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "broken.cgi", "echo 'oops, no headers'\n");
        let req = request(b"GET /broken.cgi HTTP/1.1\r\n\r\n");

        let out = run(&gateway(Some("/bin/sh")), &req, &path, None);

        assert!(out.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{}", out);
    }

    #[test]
    fn scripts_split_path_info() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tools")).unwrap();
        script(&dir.path().join("tools"), "info",
               "printf 'X: 1\\r\\n\\r\\n%s|%s' \"$SCRIPT_NAME\" \"$PATH_INFO\"\n");

        let scripts = Scripts::new(Rc::new(gateway(Some("/bin/sh"))), PathBuf::from("/cgi-bin"),
                                   dir.path().to_path_buf());
        let req = request(b"GET /cgi-bin/tools/info/a/b HTTP/1.1\r\n\r\n");

        let mut stream = match scripts.serve(&req) {
            Ok(Reply::Cgi(stream)) => stream,
            Ok(Reply::Ready(res)) => panic!("got a ready {} response", res.status),
            Err(e) => panic!("{}", e)
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while stream.pump() == Progress::Pending {
            assert!(Instant::now() < deadline, "CGI output never ended");
            thread::sleep(Duration::from_millis(5));
        }
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();

        assert!(out.ends_with("\r\n\r\n/cgi-bin/tools/info|/a/b"), "{}", out);
    }

    #[test]
    fn scripts_outside_the_root_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = Scripts::new(Rc::new(gateway(Some("/bin/sh"))), PathBuf::from("/cgi-bin"),
                                   dir.path().to_path_buf());

        for target in &["/cgi-bin/missing", "/cgi-bin", "/cgi-bin/"] {
            let req = request(format!("GET {} HTTP/1.1\r\n\r\n", target).as_bytes());
            match scripts.serve(&req) {
                Err(Error::NotFound) => (),
                Err(e) => panic!("{}: {}", target, e),
                Ok(_) => panic!("{} ran something", target)
            }
        }
    }
}
