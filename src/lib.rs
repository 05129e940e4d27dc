//! # framewire
//!
//! Length-prefixed binary TCP framing with protocol-id dispatch.
//!
//! Every message on the wire is
//!
//! ```text
//! ┌──────────────────────┬───────────────┬─────────────────────┐
//! │ length (1/2/4/8 B)   │ protocol id   │ payload             │
//! │ = len(id + payload)  │ u16           │ opaque bytes        │
//! └──────────────────────┴───────────────┴─────────────────────┘
//! ```
//!
//! with the header width and byte order chosen per server. Inbound bodies are
//! routed by protocol id to a handler built fresh per message; handlers and
//! server pushes write back through a single ordered writer task.
//!
//! ## Architecture
//!
//! - **Registry**: protocol id to handler factory, shared read-only
//! - **Middleware**: six hook chains (closed, recover, reader, writer,
//!   request, push), server-wide plus per connection
//! - **Attachments**: per-connection objects resolved by type or by name
//! - **Connection**: reader loop, one dispatch task per message, writer task
//!
//! ## Example
//!
//! ```ignore
//! use framewire::{Opt, ProtocolRegistry, RequestContext, Server};
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let mut registry = ProtocolRegistry::new();
//!     registry.register_fn(1, |ctx: RequestContext| async move {
//!         ctx.respond(2, ctx.payload()).await
//!     })?;
//!
//!     Server::new(Opt::default(), registry).listen().await
//! }
//! ```

pub mod attach;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod writer;

mod panic_trace;

pub use attach::Attachments;
pub use codec::MsgPackCodec;
pub use config::Opt;
pub use connection::Connection;
pub use error::{FramewireError, Result};
pub use handler::{
    BoxFuture, Handler, HandlerFactory, HandlerResult, ProtocolRegistry, Push, PushContext,
    RequestContext,
};
pub use middleware::{Fault, Middleware};
pub use protocol::{ByteOrder, Frame, FrameBuffer, LengthCodec};
pub use server::Server;
