//! TCP listener that turns accepted sockets into [`Connection`]s.
//!
//! ```ignore
//! let mut registry = ProtocolRegistry::new();
//! registry.register_fn(1, |ctx| async move { ctx.respond(2, ctx.payload()).await })?;
//!
//! let mut server = Server::new(Opt::default(), registry);
//! server.middleware_mut().on_recover(|fault| eprintln!("{fault}"));
//! server.on_accept(|conn, middleware| {
//!     conn.attach(Arc::new(Session::new())).ok();
//!     middleware.on_closed(|| println!("bye"));
//! });
//! server.listen().await?;
//! ```

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Opt;
use crate::connection::Connection;
use crate::error::Result;
use crate::handler::ProtocolRegistry;
use crate::middleware::Middleware;

/// Callback run once per accepted connection, before its loops start.
pub type AcceptCallback = Arc<dyn Fn(&Connection, &mut Middleware) + Send + Sync>;

/// Server instance
pub struct Server {
    opt: Opt,
    registry: Arc<ProtocolRegistry>,
    middleware: Middleware,
    on_accept: Option<AcceptCallback>,
}

impl Server {
    /// Create a server with the given options and protocol table.
    pub fn new(opt: Opt, registry: ProtocolRegistry) -> Self {
        Server {
            opt,
            registry: Arc::new(registry),
            middleware: Middleware::new(),
            on_accept: None,
        }
    }

    /// Server options.
    pub fn opt(&self) -> &Opt {
        &self.opt
    }

    /// Server-wide hooks, copied into every connection's pipeline.
    pub fn middleware_mut(&mut self) -> &mut Middleware {
        &mut self.middleware
    }

    /// Set the accept callback, replacing any previous one.
    ///
    /// The callback may attach objects to the connection and append hooks to
    /// the connection's own copy of the pipeline.
    pub fn on_accept<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&Connection, &mut Middleware) + Send + Sync + 'static,
    {
        self.on_accept = Some(Arc::new(callback));
        self
    }

    /// Validate the options, bind `opt.addr` and serve until accept fails fatally.
    ///
    /// # Errors
    ///
    /// Returns the validation error for bad options, or the bind error.
    pub async fn listen(&self) -> Result<()> {
        self.opt.validate()?;
        let listener = TcpListener::bind(&self.opt.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.opt.validate()?;
        let address = listener.local_addr()?;
        info!(
            address = %address,
            header_length = self.opt.header_length,
            byte_order = ?self.opt.byte_order,
            max_packet_size = self.opt.max_packet_size,
            protocols = self.registry.len(),
            "Server listening"
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let on_accept = self.on_accept.clone();
                    let result = Connection::spawn(
                        stream,
                        peer,
                        &self.opt,
                        Arc::clone(&self.registry),
                        &self.middleware,
                        |conn, middleware| {
                            if let Some(callback) = on_accept {
                                callback(conn, middleware);
                            }
                        },
                    );
                    if let Err(e) = result {
                        debug!(peer = %peer, error = %e, "Connection rejected");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("opt", &self.opt)
            .field("registry", &self.registry)
            .field("middleware", &self.middleware)
            .field("on_accept", &self.on_accept.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramewireError;

    #[tokio::test]
    async fn test_listen_rejects_bad_header_length() {
        let opt = Opt {
            addr: "127.0.0.1:0".into(),
            header_length: 5,
            ..Opt::default()
        };
        let server = Server::new(opt, ProtocolRegistry::new());

        let err = server.listen().await.unwrap_err();
        assert!(matches!(err, FramewireError::InvalidHeaderLength(5)));
    }

    #[tokio::test]
    async fn test_listen_bind_error() {
        let opt = Opt {
            addr: "not an address".into(),
            ..Opt::default()
        };
        let server = Server::new(opt, ProtocolRegistry::new());

        assert!(matches!(server.listen().await, Err(FramewireError::Io(_))));
    }

    #[test]
    fn test_debug_shows_accept_callback() {
        let mut server = Server::new(Opt::default(), ProtocolRegistry::new());
        server.on_accept(|_, _| {});

        let text = format!("{:?}", server);
        assert!(text.contains("on_accept: true"));
    }
}
