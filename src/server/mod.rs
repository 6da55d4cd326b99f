//! Server functionality
//!
//! One thread, one `mio::Poll`. The listener, every client socket and every
//! running script's output pipe share the same readiness set, so a slow
//! client or a slow script never holds up anybody else.

pub mod connection;
pub mod request;
pub mod response;
pub mod router;
pub mod static_files;

use crate::cgi::{CgiStream, Gateway, Scripts};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::server::connection::{Connection, Endpoint, Next, LISTENER};
use crate::server::request::Request;
use crate::server::response::Response;
use crate::server::router::Router;
use crate::server::static_files::Statics;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll};
use slab::Slab;

use std::fs::canonicalize;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

/// How a handler answers a request
pub enum Reply {
    /// The whole response, ready to go
    Ready(Response),
    /// A script whose output will become the response
    Cgi(CgiStream)
}

/// Values which can handle requests
///
/// Errors are turned into the canned page for `Error::status()`.
pub trait Handler {
    fn serve(&self, req: &Request) -> Result<Reply>;
}

impl<F> Handler for F where F: Fn(&Request) -> Result<Reply> {
    fn serve(&self, req: &Request) -> Result<Reply> {
        self(req)
    }
}

/// The handler installed by `Server::bind`: scripts under
/// `cgi.public_prefix`, files under `static.public_prefix`.
pub fn default_router(config: &Config) -> Result<Router> {
    let webroot = match canonicalize(&config.stat.webroot) {
        Ok(w) => w,
        Err(e) => {
            error!("Can't open webroot {}: {}", config.stat.webroot.display(), e);
            return Err(Error::from(e));
        }
    };

    let script_root = canonicalize(&config.cgi.root)
        .unwrap_or_else(|_| config.cgi.root.clone());
    let gateway = Rc::new(Gateway::new(config));

    let mut router = Router::new();
    router.route_any(config.cgi.public_prefix.clone(),
                     Scripts::new(gateway.clone(), config.cgi.public_prefix.clone(),
                                  script_root));
    router.route_any(config.stat.public_prefix.clone(),
                     Statics::new(gateway, webroot, config.stat.public_prefix.clone(),
                                  config.stat.index.clone()));

    Ok(router)
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Slab<Connection>,
    handler: Box<dyn Handler>,
    software: String
}

impl Server {
    /// Binds the configured address and installs the default router
    pub fn bind(config: &Config) -> Result<Server> {
        let router = default_router(config)?;
        Server::with_handler(config, Box::new(router))
    }

    pub fn with_handler(config: &Config, handler: Box<dyn Handler>) -> Result<Server> {
        let host: IpAddr = match config.host.parse() {
            Ok(h) => h,
            Err(_) => return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is not an IP address", config.host))))
        };

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(SocketAddr::new(host, config.port))?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        Ok(Server {
            poll: poll,
            listener: listener,
            local_addr: local_addr,
            connections: Slab::with_capacity(1024),
            handler: handler,
            software: config.software.clone()
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until polling itself fails
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Polling failed: {}", e);
                return Err(Error::from(e));
            }

            // New connections first, so none of them misses this round
            if events.iter().any(|event| event.token() == LISTENER) {
                self.accept();
            }

            for event in events.iter() {
                if let Some((key, endpoint)) = connection::decode(event.token()) {
                    self.ready(key, endpoint, event.is_read_closed() || event.is_error());
                }
            }
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, remote_addr)) => {
                    let entry = self.connections.vacant_entry();
                    let mut conn = Connection::new(entry.key(), socket, remote_addr,
                                                   self.local_addr.port());

                    match conn.register(self.poll.registry()) {
                        Ok(()) => {
                            debug!("Accepted connection from {}", remote_addr);
                            entry.insert(conn);
                        },
                        Err(e) => warn!("Couldn't poll connection from {}: {}",
                                        remote_addr, e)
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => {
                    warn!("Failed connection: {}", e);
                    return;
                }
            }
        }
    }

    fn ready(&mut self, key: usize, endpoint: Endpoint, hung_up: bool) {
        let registry = self.poll.registry();

        // Closed earlier in this round
        let conn = match self.connections.get_mut(key) {
            Some(c) => c,
            None => return
        };

        let next = match endpoint {
            Endpoint::Socket =>
                conn.socket_ready(registry, &*self.handler, &self.software, hung_up),
            Endpoint::Pipe => conn.pipe_ready(registry, &*self.handler, &self.software)
        };

        if next == Next::Close {
            let mut conn = self.connections.remove(key);
            conn.deregister(registry);
            debug!("Closed connection {}", key);
        }
    }
}

/// Binds the configured address and serves forever.
///
/// This function has _no_ access control beyond refusing dotfiles and
/// `..`. It's meant for a developer's own machine.
pub fn serve(config: Config) -> Result<()> {
    let mut server = Server::bind(&config)?;
    info!("Listening on {}", server.local_addr());

    server.run()
}
