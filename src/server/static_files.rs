//! Handlers for static file service

use crate::cgi::Gateway;
use crate::errors::*;
use crate::filesystem::join_relative;
use crate::server::{Handler, Reply};
use crate::server::request::Request;
use crate::server::response::Response;

use std::ffi::OsStr;
use std::fs::{self, canonicalize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A hundred days
const CACHE_CONTROL: &'static str = "max-age=8640000";

/// A handler for static files
///
/// Files with one of the gateway's extensions are run as scripts instead,
/// whatever the method. Plain files only answer `GET` and `HEAD`.
pub struct Statics {
    gateway: Rc<Gateway>,
    webroot: PathBuf,
    prefix: PathBuf,
    index: String
}

impl Statics {
    /// `webroot` must already be canonical
    pub fn new(gateway: Rc<Gateway>, webroot: PathBuf, prefix: PathBuf,
               index: String) -> Statics {
        Statics {
            gateway: gateway,
            webroot: webroot,
            prefix: prefix,
            index: index
        }
    }

    /// Finds the file on disk a request path refers to
    fn resolve(&self, request_path: &Path) -> Result<PathBuf> {
        let relative = request_path.strip_prefix(&self.prefix).unwrap_or(request_path);

        let requested_file = match canonicalize(join_relative(&self.webroot, relative)) {
            Ok(f) => f,
            Err(e) => return Err(match e.kind() {
                ErrorKind::NotFound => Error::NotFound,
                ErrorKind::PermissionDenied => Error::PermissionDenied,
                _ => Error::from(e)
            })
        };

        // A symlink pointing out of the webroot
        if !requested_file.starts_with(&self.webroot) {
            return Err(Error::PermissionDenied);
        }

        if !requested_file.is_dir() {
            return Ok(requested_file);
        }

        let index = requested_file.join(&self.index);
        if index.is_file() {
            Ok(index)
        }
        else {
            Err(Error::PermissionDenied)
        }
    }

    fn is_script(&self, file: &Path) -> bool {
        match file.extension().and_then(OsStr::to_str) {
            Some(ext) => self.gateway.extensions().iter().any(|e| e == ext),
            None => false
        }
    }

    fn serve_file(&self, req: &Request, file: &Path) -> Result<Response> {
        let content = match fs::read(file) {
            Ok(c) => c,
            Err(e) => return Err(match e.kind() {
                ErrorKind::NotFound => Error::NotFound,
                ErrorKind::PermissionDenied => Error::PermissionDenied,
                _ => Error::from(e)
            })
        };

        let mime = mime_guess::from_path(file).first_or_octet_stream();

        let mut res = Response::with_body(200, mime.as_ref(), Vec::new());
        res.headers.insert("Cache-Control", CACHE_CONTROL);

        if req.method() == "HEAD" {
            res.headers.insert("Content-Length", content.len().to_string());
        }
        else {
            res.body = content;
        }

        Ok(res)
    }
}

impl Handler for Statics {
    fn serve(&self, req: &Request) -> Result<Reply> {
        let file = self.resolve(Path::new(req.path()))?;

        if self.is_script(&file) {
            return Ok(Reply::Cgi(self.gateway.execute(req, &file, None)?));
        }

        match req.method() {
            "GET" | "HEAD" => Ok(Reply::Ready(self.serve_file(req, &file)?)),
            _ => Err(Error::MethodNotAllowed)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;

    struct Site {
        dir: tempfile::TempDir,
        statics: Statics
    }

    fn site(prefix: &str) -> Site {
        let dir = tempfile::tempdir().unwrap();
        let webroot = canonicalize(dir.path()).unwrap();

        fs::write(webroot.join("index.html"), "<p>home</p>").unwrap();
        fs::write(webroot.join("style.css"), "p {}").unwrap();
        fs::write(webroot.join("data.unknownext"), "??").unwrap();
        fs::create_dir(webroot.join("empty")).unwrap();
        fs::create_dir(webroot.join("docs")).unwrap();
        fs::write(webroot.join("docs").join("index.html"), "<p>docs</p>").unwrap();

        let mut config = Config::default();
        config.cgi.interpreter = Some(PathBuf::from("/bin/sh"));
        let statics = Statics::new(Rc::new(Gateway::new(&config)), webroot,
                                   PathBuf::from(prefix), String::from("index.html"));

        Site { dir: dir, statics: statics }
    }

    fn request(raw: &str) -> Request {
        let mut req = Request::new("127.0.0.1:40000".parse().unwrap(), 8000);
        req.feed(raw.as_bytes()).unwrap();
        req
    }

    fn get(statics: &Statics, raw: &str) -> Result<Response> {
        match statics.serve(&request(raw))? {
            Reply::Ready(res) => Ok(res),
            Reply::Cgi(_) => panic!("unexpected CGI reply")
        }
    }

    #[test]
    fn serves_a_file_with_its_type() {
        let site = site("/");
        let res = get(&site.statics, "GET /style.css HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(res.headers.get("Content-Type"), Some("text/css"));
        assert_eq!(res.headers.get("Cache-Control"), Some("max-age=8640000"));
        assert_eq!(res.body, b"p {}");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        let site = site("/");
        let res = get(&site.statics, "GET /data.unknownext HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(res.headers.get("Content-Type"), Some("application/octet-stream"));
    }

    #[test]
    fn directories_serve_their_index() {
        let site = site("/");

        assert_eq!(get(&site.statics, "GET / HTTP/1.1\r\n\r\n").unwrap().body, b"<p>home</p>");
        assert_eq!(get(&site.statics, "GET /docs/ HTTP/1.1\r\n\r\n").unwrap().body, b"<p>docs</p>");
    }

    #[test]
    fn directory_without_index_is_forbidden() {
        let site = site("/");

        match get(&site.statics, "GET /empty HTTP/1.1\r\n\r\n") {
            Err(Error::PermissionDenied) => (),
            other => panic!("{:?}", other.map(|r| r.status))
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let site = site("/");

        match get(&site.statics, "GET /nope.html HTTP/1.1\r\n\r\n") {
            Err(Error::NotFound) => (),
            other => panic!("{:?}", other.map(|r| r.status))
        }
    }

    #[test]
    fn symlink_out_of_webroot_is_forbidden() {
        let site = site("/");
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret"), "s3cr3t").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"),
                                   site.dir.path().join("leak")).unwrap();

        match get(&site.statics, "GET /leak HTTP/1.1\r\n\r\n") {
            Err(Error::PermissionDenied) => (),
            other => panic!("{:?}", other.map(|r| r.status))
        }
    }

    #[test]
    fn head_has_length_but_no_body() {
        let site = site("/");
        let res = get(&site.statics, "HEAD /index.html HTTP/1.1\r\n\r\n").unwrap();

        assert!(res.body.is_empty());
        assert_eq!(res.content_length(), 11);
        assert!(String::from_utf8(res.render().unwrap()).unwrap()
                .ends_with("Content-Length: 11\r\n\r\n"));
    }

    #[test]
    fn public_prefix_is_stripped() {
        let site = site("/static");
        let res = get(&site.statics, "GET /static/style.css HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(res.body, b"p {}");
    }

    #[test]
    fn script_extensions_go_to_the_gateway() {
        let site = site("/");
        fs::write(site.dir.path().join("run.cgi"), "printf 'X: 1\\n\\nran'\n").unwrap();

        match site.statics.serve(&request("GET /run.cgi HTTP/1.1\r\n\r\n")) {
            Ok(Reply::Cgi(_)) => (),
            Ok(Reply::Ready(res)) => panic!("served the script as a file: {}", res.status),
            Err(e) => panic!("{}", e)
        }
    }

    #[test]
    fn plain_files_only_answer_get_and_head() {
        let site = site("/");

        for method in &["POST", "PUT", "DELETE"] {
            match get(&site.statics, &format!("{} /style.css HTTP/1.1\r\n\r\n", method)) {
                Err(Error::MethodNotAllowed) => (),
                other => panic!("{}: {:?}", method, other.map(|r| r.status))
            }
        }
    }

    #[test]
    fn scripts_accept_any_method() {
        let site = site("/");
        fs::write(site.dir.path().join("form.cgi"), "printf 'X: 1\\n\\n'\ncat\n").unwrap();

        let req = request("POST /form.cgi HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata");
        match site.statics.serve(&req) {
            Ok(Reply::Cgi(_)) => (),
            Ok(Reply::Ready(res)) => panic!("served the script as a file: {}", res.status),
            Err(e) => panic!("{}", e)
        }
    }
}
