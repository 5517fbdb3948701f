//! Application callbacks invoked over a connection's lifetime.

use crate::context::UserContext;
use crate::frame::Message;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Lifecycle callbacks. Every method defaults to a no-op.
///
/// Errors and panics raised inside a callback are logged and swallowed: they
/// never stop the engine, and `on_disconnect` still fires for the connection.
#[async_trait]
pub trait Callbacks: Send + Sync + 'static {
    /// A transport was accepted or opened; the handshake has not run yet.
    async fn on_connect(&self, _ctx: &UserContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handshake finished; messages may now flow.
    async fn on_connected(&self, _ctx: &UserContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// A complete message arrived.
    async fn on_receive(&self, _ctx: &UserContext, _message: Message) -> anyhow::Result<()> {
        Ok(())
    }

    /// An outbound message was written to the transport.
    async fn on_send(&self, _ctx: &UserContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The connection is gone. Fires exactly once per connection.
    async fn on_disconnect(&self, _ctx: &UserContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Callbacks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

#[async_trait]
impl Callbacks for NoCallbacks {}

/// Run one callback, logging errors and panics instead of propagating them.
/// Returns whether the callback completed successfully.
pub(crate) async fn invoke<F>(name: &'static str, ctx: &UserContext, fut: F) -> bool
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(id = %ctx.id(), callback = name, error = %e, "callback failed");
            false
        }
        Err(_) => {
            tracing::error!(id = %ctx.id(), callback = name, "callback panicked");
            false
        }
    }
}
