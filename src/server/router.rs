//! A dead-simple router implementation
//!
//! A `Router` simply matches a request path against installed routes, in the
//! order they have been added, dispatching to the first handler that matches.
//! Prefixes match whole path segments: `/cgi-bin` covers `/cgi-bin/x` but
//! not `/cgi-binary`.

use crate::errors::*;
use crate::server::{Handler, Reply};
use crate::server::request::Request;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub struct Router {
    routes: Vec<Route>
}

struct Route {
    path: PathBuf,
    handlers: MethodDispatch
}

enum MethodDispatch {
    Any(Box<dyn Handler>),
    Specific(HashMap<String, Rc<dyn Handler>>)
}

impl Router {
    /// Initialize a new, empty router
    pub fn new() -> Router {
        Router { routes: Vec::new() }
    }

    /// Create a route that will invoke the given `handler` for all methods
    pub fn route_any<H: Handler + 'static>(&mut self, path: PathBuf, handler: H) {
        self.routes.push(Route {
            path: path,
            handlers: MethodDispatch::Any(Box::new(handler))
        });
    }

    /// Create a route that will invoke the given `handler`, but only for the
    /// listed `methods`.
    ///
    /// Adding methods to a prefix that already has method-specific handlers
    /// extends that route; a prefix already routed for any method keeps its
    /// first route, since that one will always match first.
    pub fn route<H: Handler + 'static>(&mut self, path: PathBuf, methods: &[&str],
                                       handler: H) {
        let handler: Rc<dyn Handler> = Rc::new(handler);

        for route in self.routes.iter_mut() {
            if route.path == path {
                match route.handlers {
                    MethodDispatch::Specific(ref mut map) => {
                        for method in methods {
                            map.insert(String::from(*method), handler.clone());
                        }
                    },
                    MethodDispatch::Any(_) =>
                        warn!("{} is already routed for every method", path.display())
                }
                return;
            }
        }

        let handlers = methods.iter()
            .map(|method| (String::from(*method), handler.clone()))
            .collect();

        self.routes.push(Route {
            path: path,
            handlers: MethodDispatch::Specific(handlers)
        });
    }
}

impl Handler for Router {
    fn serve(&self, req: &Request) -> Result<Reply> {
        let request_path = Path::new(req.path());

        for route in &self.routes {
            if request_path.starts_with(&route.path) {
                return route.handlers.serve(req);
            }
        }

        Err(Error::NotFound)
    }
}

impl Handler for MethodDispatch {
    fn serve(&self, req: &Request) -> Result<Reply> {
        match *self {
            MethodDispatch::Any(ref handler) => handler.serve(req),
            MethodDispatch::Specific(ref map) => {
                match map.get(req.method()) {
                    Some(handler) => handler.serve(req),
                    None => Err(Error::MethodNotAllowed)
                }
            }
        }
    }
}
