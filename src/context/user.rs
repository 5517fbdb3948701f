use super::Context;
use crate::frame::Message;
use crate::handler::{close_code, Upgraded};
use crate::handshake::ClientHandshake;
use crate::http::Fields;
use crate::types::{ConnectionId, Phase, Protocol};
use crate::Result;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// What the handshake established about a connection.
#[derive(Clone, Debug)]
pub struct Session {
    pub protocol: Protocol,
    pub path: String,
    pub host: String,
    pub origin: Option<String>,
    pub subprotocol: Option<String>,
    pub cookies: Vec<(String, String)>,
    /// Request header fields (server side only).
    pub fields: Fields,
}

impl Session {
    pub(crate) fn from_upgrade(upgraded: &Upgraded) -> Self {
        let client = &upgraded.client;
        Self {
            protocol: client.protocol,
            path: client.path.clone(),
            host: client.host.clone(),
            origin: client.origin.clone(),
            subprotocol: upgraded.server.subprotocol.clone(),
            cookies: client.cookies.clone(),
            fields: upgraded.request.fields.clone(),
        }
    }

    pub(crate) fn from_client(handshake: &ClientHandshake, subprotocol: Option<String>) -> Self {
        Self {
            protocol: handshake.protocol,
            path: handshake.path.clone(),
            host: handshake.host.clone(),
            origin: handshake.origin.clone(),
            subprotocol,
            cookies: handshake.cookies.clone(),
            fields: Fields::default(),
        }
    }
}

/// The application's handle on a connection, passed to every callback.
/// Cheap to clone; clones refer to the same connection.
#[derive(Clone)]
pub struct UserContext {
    inner: Arc<Context>,
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UserContext").field(&self.inner).finish()
    }
}

impl UserContext {
    pub(crate) fn new(inner: Arc<Context>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    /// Negotiated protocol, once the handshake has completed.
    pub fn protocol(&self) -> Option<Protocol> {
        self.inner.protocol()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    pub fn session(&self) -> Option<&Session> {
        self.inner.session()
    }

    pub fn path(&self) -> Option<&str> {
        self.session().map(|s| s.path.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.session().and_then(|s| s.fields.get(name))
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.session()?
            .cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn cookies(&self) -> &[(String, String)] {
        self.session().map(|s| s.cookies.as_slice()).unwrap_or_default()
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.session().and_then(|s| s.subprotocol.as_deref())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Send a message. Before the handshake completes the message is queued.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.inner.send(message.into()).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.inner.send(Message::Binary(data.into())).await
    }

    /// Send a ping. A no-op on legacy connections.
    pub async fn ping(&self, payload: &[u8]) -> Result<()> {
        self.inner.ping(payload).await
    }

    /// Close with status 1000 and drop the connection.
    pub async fn close(&self) {
        self.inner.close(close_code::NORMAL).await
    }

    pub async fn close_with(&self, code: u16) {
        self.inner.close(code).await
    }

    /// Attach application state, replacing any previous value.
    pub fn set_data<T: Any + Send + Sync>(&self, value: T) {
        if let Ok(mut slot) = self.inner.data().lock() {
            *slot = Some(Box::new(value));
        }
    }

    /// Run `f` on the attached state if it is a `T`.
    pub fn with_data<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.inner.data().lock().ok()?;
        slot.as_deref_mut()?.downcast_mut::<T>().map(f)
    }

    pub fn take_data<T: Any + Send + Sync>(&self) -> Option<T> {
        let mut slot = self.inner.data().lock().ok()?;
        if !slot.as_deref()?.is::<T>() {
            return None;
        }
        slot.take()?.downcast::<T>().ok().map(|b| *b)
    }
}
