//! Client engine.

mod config;

pub use config::ClientConfig;

use crate::context::{Context, UserContext};
use crate::error::Error;
use crate::events::Callbacks;
use crate::frame::{Message, Role};
use crate::handshake::ClientHandshake;
use crate::shutdown::Shutdown;
use crate::transport::{StreamTransport, Transport};
use crate::Result;
use std::sync::{Arc, RwLock};
use tokio::net::TcpStream;

/// One outbound WebSocket connection.
pub struct Client {
    config: ClientConfig,
    callbacks: Arc<dyn Callbacks>,
    shutdown: Shutdown,
    context: RwLock<Option<Arc<Context>>>,
}

impl Client {
    pub fn new(config: ClientConfig, callbacks: impl Callbacks) -> Self {
        Self::with_callbacks(config, Arc::new(callbacks))
    }

    pub fn with_callbacks(config: ClientConfig, callbacks: Arc<dyn Callbacks>) -> Self {
        Self {
            config,
            callbacks,
            shutdown: Shutdown::new(),
            context: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a TCP connection to the configured URL and run the handshake.
    pub async fn connect(&self) -> Result<UserContext> {
        let target = self.config.target()?;
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        tracing::debug!(url = %self.config.url, ?peer, "connected");
        self.connect_with(Arc::new(StreamTransport::new(stream, peer)))
            .await
    }

    /// Run the handshake over an existing transport. Replaces any previous
    /// connection held by this client.
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<UserContext> {
        let target = self.config.target()?;
        self.disconnect().await;

        let ctx = Context::new(
            transport,
            Role::Client,
            self.config.settings(),
            Arc::clone(&self.callbacks),
            self.shutdown.child(),
        );
        ctx.connect_event().await;

        let mut handshake =
            ClientHandshake::new(self.config.protocol, target.path.clone(), target.host_field())
                .with_subprotocols(self.config.subprotocols.clone());
        if let Some(origin) = &self.config.origin {
            handshake = handshake.with_origin(origin.clone());
        }
        for (name, value) in &self.config.cookies {
            handshake = handshake.with_cookie(name.clone(), value.clone());
        }

        match ctx.open(handshake).await {
            Ok(leftover) => {
                tracing::debug!(id = %ctx.id(), protocol = %self.config.protocol, "handshake complete");
                if let Ok(mut slot) = self.context.write() {
                    *slot = Some(Arc::clone(&ctx));
                }
                tokio::spawn(Arc::clone(&ctx).run(leftover));
                Ok(ctx.user())
            }
            Err(e) => {
                tracing::warn!(url = %self.config.url, error = %e, "handshake failed");
                ctx.dispose().await;
                Err(e)
            }
        }
    }

    fn current(&self) -> Option<Arc<Context>> {
        self.context.read().ok().and_then(|c| c.clone())
    }

    /// Handle for the current connection.
    pub fn context(&self) -> Option<UserContext> {
        self.current().map(|ctx| ctx.user())
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|ctx| ctx.is_connected())
    }

    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let ctx = self.current().ok_or(Error::NotConnected)?;
        ctx.send(message.into()).await
    }

    /// Close the current connection, if any.
    pub async fn disconnect(&self) {
        let ctx = self.context.write().ok().and_then(|mut c| c.take());
        if let Some(ctx) = ctx {
            ctx.user().close().await;
            ctx.dispose().await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
