//! # ws-engine
//!
//! WebSocket protocol engine speaking three protocol variants on the same
//! port: the legacy draft (hixie-76), hybi-10 and RFC 6455.
//!
//! ## Features
//!
//! - Server engine with a handshake worker pool, dead-connection sweep and
//!   cooperative shutdown
//! - Client engine masking every outbound frame
//! - Incremental frame decoding tolerant of arbitrary read boundaries
//! - Subprotocol negotiation, origin and destination checks
//! - Message size limit enforced before payload is buffered
//!
//! ## Example
//!
//! ```ignore
//! use ws_engine::{async_trait, Callbacks, Message, Server, ServerConfig, UserContext};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Callbacks for Echo {
//!     async fn on_receive(&self, ctx: &UserContext, message: Message) -> anyhow::Result<()> {
//!         ctx.send(message).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new(ServerConfig::new("0.0.0.0:8181"), Echo);
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod events;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod types;

pub use async_trait::async_trait;
pub use client::{Client, ClientConfig};
pub use context::{Session, UserContext};
pub use error::{Error, Result};
pub use events::{Callbacks, NoCallbacks};
pub use frame::{DataFrame, FrameHeader, FrameState, Message, Opcode, Role};
pub use server::{Server, ServerConfig};
pub use shutdown::Shutdown;
pub use transport::{StreamTransport, Transport};
pub use types::{ConnectionId, Phase, Protocol};
