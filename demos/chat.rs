//! chat: a small room server on top of framewire.
//!
//! Protocols (payloads are MsgPack):
//!
//! | id  | direction | payload            |
//! |-----|-----------|--------------------|
//! | 1   | c -> s    | `Join { name }`    |
//! | 2   | c -> s    | `Say { text }`     |
//! | 3   | c -> s    | raw bytes (ping)   |
//! | 101 | s -> c    | `Welcome { online }` |
//! | 102 | s -> c    | `Line { from, text }` |
//! | 103 | s -> c    | raw bytes (pong)   |
//!
//! Run with `cargo run --example chat -- --listen 127.0.0.1:9000`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use framewire::{
    BoxFuture, Connection, FramewireError, Handler, HandlerResult, Opt, ProtocolRegistry, Push,
    PushContext, RequestContext, Server,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const JOIN: u16 = 1;
const SAY: u16 = 2;
const PING: u16 = 3;
const WELCOME: u16 = 101;
const LINE: u16 = 102;
const PONG: u16 = 103;

#[derive(Parser, Debug)]
#[command(name = "chat")]
#[command(about = "Chat room server built on framewire", long_about = None)]
struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Connected sessions, keyed by peer address.
#[derive(Default)]
struct Room {
    members: RwLock<HashMap<SocketAddr, Connection>>,
}

impl Room {
    fn join(&self, conn: &Connection) {
        self.members.write().insert(conn.remote_addr(), conn.clone());
    }

    fn leave(&self, peer: &SocketAddr) {
        self.members.write().remove(peer);
    }

    fn online(&self) -> usize {
        self.members.read().len()
    }

    async fn broadcast(&self, line: &LinePush) {
        let members: Vec<Connection> = self.members.read().values().cloned().collect();
        for conn in members {
            if let Err(e) = conn.push(line).await {
                warn!(peer = %conn.remote_addr(), error = %e, "broadcast failed");
            }
        }
    }
}

/// Per-connection state.
struct Session {
    peer: SocketAddr,
    name: Mutex<Option<String>>,
    room: Arc<Room>,
}

impl Session {
    fn closed(&self) {
        self.room.leave(&self.peer);
        info!(peer = %self.peer, name = ?self.name.lock(), "left");
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Join {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Say {
    text: String,
}

#[derive(Debug, Serialize)]
struct Welcome {
    online: usize,
}

#[derive(Debug, Clone, Serialize)]
struct LinePush {
    from: String,
    text: String,
}

impl Push for LinePush {
    fn protocol_id(&self) -> u16 {
        LINE
    }

    fn encode(&self, ctx: &mut PushContext) {
        ctx.write_msgpack(self);
    }
}

struct JoinHandler {
    ctx: RequestContext,
    session: Option<Arc<Session>>,
}

impl Handler for JoinHandler {
    fn execute(self: Box<Self>) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            let session = self
                .session
                .ok_or_else(|| FramewireError::handler("session missing"))?;
            let join: Join = self.ctx.decode()?;
            info!(peer = %session.peer, name = %join.name, "joined");

            *session.name.lock() = Some(join.name.clone());
            session.room.join(self.ctx.connection());

            let welcome = Welcome {
                online: session.room.online(),
            };
            self.ctx.respond_msgpack(WELCOME, &welcome).await?;

            session
                .room
                .broadcast(&LinePush {
                    from: "server".into(),
                    text: format!("{} joined", join.name),
                })
                .await;
            Ok(())
        })
    }
}

struct SayHandler {
    ctx: RequestContext,
    session: Option<Arc<Session>>,
}

impl Handler for SayHandler {
    fn execute(self: Box<Self>) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            let session = self
                .session
                .ok_or_else(|| FramewireError::handler("session missing"))?;
            let from = session
                .name
                .lock()
                .clone()
                .ok_or_else(|| FramewireError::handler("say before join"))?;
            let say: Say = self.ctx.decode()?;

            session.room.broadcast(&LinePush { from, text: say.text }).await;
            Ok(())
        })
    }
}

fn registry() -> framewire::Result<ProtocolRegistry> {
    let mut registry = ProtocolRegistry::new();
    registry.register(JOIN, |ctx: RequestContext| JoinHandler {
        session: ctx.inject::<Session>(),
        ctx,
    })?;
    registry.register(SAY, |ctx: RequestContext| SayHandler {
        session: ctx.inject::<Session>(),
        ctx,
    })?;
    registry.register_fn(PING, |ctx: RequestContext| async move {
        ctx.respond(PONG, ctx.payload()).await
    })?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut opt = match &args.config {
        Some(path) => Opt::load(path)?,
        None => Opt::default(),
    };
    if let Some(listen) = args.listen {
        opt.addr = listen;
    }

    info!(
        addr = %opt.addr,
        header_length = opt.header_length,
        max_packet_size = opt.max_packet_size,
        "Starting chat server"
    );

    let room = Arc::new(Room::default());
    let mut server = Server::new(opt, registry()?);
    server.middleware_mut().on_recover(|fault| {
        warn!(protocol_id = ?fault.protocol_id, error = %fault.error, "recovered");
        if !fault.stack.is_empty() {
            tracing::debug!(stack = %fault.stack, "panic stack");
        }
    });
    server.on_accept(move |conn, middleware| {
        info!(peer = %conn.remote_addr(), "accepted");
        let session = Arc::new(Session {
            peer: conn.remote_addr(),
            name: Mutex::new(None),
            room: room.clone(),
        });
        if let Err(e) = conn.attach(session.clone()) {
            warn!(error = %e, "attach failed");
        }
        middleware.on_closed(move || session.closed());
    });

    server.listen().await?;
    Ok(())
}
