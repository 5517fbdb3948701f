//! Per-connection state and the receive/send machinery.
//!
//! A [`Context`] enforces at most one receive and one send in flight through
//! two guards of its own, so connections never contend with each other.

mod user;

pub use user::{Session, UserContext};

use crate::error::{ConnectionError, Error};
use crate::events::{self, Callbacks};
use crate::frame::{DataFrame, Message, Role, MAX_CONTROL_PAYLOAD};
use crate::handler::{self, ClientUpgrade, Handler, Inbound, ServerUpgrade, Upgraded};
use crate::handshake::{ClientHandshake, HandshakePolicy};
use crate::shutdown::Shutdown;
use crate::transport::Transport;
use crate::types::{ConnectionId, Phase, Protocol};
use crate::Result;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-connection limits, fixed when the connection is created.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub buffer_size: usize,
    pub max_frame_size: u64,
    pub handshake_timeout: Duration,
}

type DataSlot = std::sync::Mutex<Option<Box<dyn Any + Send + Sync>>>;

/// One transport connection, from accept/open to disposal.
pub struct Context {
    id: ConnectionId,
    role: Role,
    transport: Arc<dyn Transport>,
    settings: Settings,
    callbacks: Arc<dyn Callbacks>,
    shutdown: Shutdown,
    phase: AtomicU8,
    session: OnceLock<Session>,
    /// Receive guard; holds the fixed-size read buffer.
    receive: Mutex<Box<[u8]>>,
    frame: Mutex<Option<DataFrame>>,
    /// Send guard. FIFO, so concurrent sends queue in call order.
    send_guard: Mutex<()>,
    /// Messages sent before the handshake finished.
    pending: Mutex<Vec<Message>>,
    disposed: AtomicBool,
    data: DataSlot,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("phase", &self.phase())
            .field("protocol", &self.protocol())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        role: Role,
        settings: Settings,
        callbacks: Arc<dyn Callbacks>,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4(),
            role,
            transport,
            settings,
            callbacks,
            shutdown,
            phase: AtomicU8::new(Phase::Unestablished as u8),
            session: OnceLock::new(),
            receive: Mutex::new(vec![0u8; settings.buffer_size.max(1)].into_boxed_slice()),
            frame: Mutex::new(None),
            send_guard: Mutex::new(()),
            pending: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            data: std::sync::Mutex::new(None),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.session.get().map(|s| s.protocol)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.get()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    /// Whether the connection is live: not closed and the transport is up.
    pub fn is_connected(&self) -> bool {
        self.phase() != Phase::Closed && self.transport.is_connected()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn data(&self) -> &DataSlot {
        &self.data
    }

    pub(crate) fn user(self: &Arc<Self>) -> UserContext {
        UserContext::new(Arc::clone(self))
    }

    fn handler(&self) -> Result<&'static Handler> {
        self.protocol()
            .map(handler::for_protocol)
            .ok_or(Error::NotConnected)
    }

    /// Read once into the guarded buffer. `Ok(None)` means the peer closed.
    async fn receive(&self) -> Result<Option<Bytes>> {
        let mut buffer = tokio::select! {
            _ = self.shutdown.triggered() => return Err(ConnectionError::Cancelled.into()),
            guard = self.receive.lock() => guard,
        };
        let n = tokio::select! {
            _ = self.shutdown.triggered() => return Err(ConnectionError::Cancelled.into()),
            r = self.transport.recv(&mut buffer[..]) => r?,
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&buffer[..n])))
    }

    /// Write bytes under the send guard. The guard is released on every path.
    pub(crate) async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let _guard = tokio::select! {
            _ = self.shutdown.triggered() => return Err(ConnectionError::Cancelled.into()),
            guard = self.send_guard.lock() => guard,
        };
        tokio::select! {
            _ = self.shutdown.triggered() => Err(ConnectionError::Cancelled.into()),
            r = self.transport.send(bytes) => r,
        }
    }

    /// Send a message. Before the handshake completes the message is queued
    /// and delivered, in order, once the connection is established.
    pub(crate) async fn send(self: &Arc<Self>, message: Message) -> Result<()> {
        if self.phase().is_handshaking() {
            let mut pending = self.pending.lock().await;
            if self.phase().is_handshaking() {
                pending.push(message);
                return Ok(());
            }
        }
        if self.phase() != Phase::Established {
            return Err(Error::NotConnected);
        }
        let bytes = self.handler()?.wrap(self.role, &message)?;
        if let Err(e) = self.send_raw(&bytes).await {
            tracing::debug!(id = %self.id, error = %e, "send failed, disconnecting");
            self.disconnect().await;
            return Err(e);
        }
        let user = self.user();
        events::invoke("on_send", &user, self.callbacks.on_send(&user)).await;
        Ok(())
    }

    pub(crate) async fn ping(&self, payload: &[u8]) -> Result<()> {
        if self.phase() != Phase::Established {
            return Err(Error::NotConnected);
        }
        let payload = &payload[..payload.len().min(MAX_CONTROL_PAYLOAD as usize)];
        match self.handler()?.ping(self.role, payload) {
            Some(bytes) => self.send_raw(&bytes).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn connect_event(self: &Arc<Self>) {
        let user = self.user();
        events::invoke("on_connect", &user, self.callbacks.on_connect(&user)).await;
    }

    /// Server side: read and answer the client's handshake. Returns bytes
    /// that followed the request.
    pub(crate) async fn accept(self: &Arc<Self>, policy: &HandshakePolicy) -> Result<Bytes> {
        let upgraded = tokio::time::timeout(self.settings.handshake_timeout, self.read_request(policy))
            .await
            .unwrap_or_else(|_| Err(ConnectionError::Timeout.into()));
        let upgraded = match upgraded {
            Ok(u) => u,
            Err(e) => {
                self.disconnect().await;
                return Err(e);
            }
        };
        if let Err(e) = self.send_raw(&upgraded.server.to_response()).await {
            self.disconnect().await;
            return Err(e);
        }
        tracing::debug!(
            id = %self.id,
            protocol = %upgraded.client.protocol,
            path = %upgraded.request.path,
            "handshake accepted"
        );
        let session = Session::from_upgrade(&upgraded);
        self.establish(session).await?;
        Ok(upgraded.leftover)
    }

    async fn read_request(&self, policy: &HandshakePolicy) -> Result<Upgraded> {
        let mut upgrade = ServerUpgrade::new();
        loop {
            let data = self
                .receive()
                .await?
                .ok_or(ConnectionError::Disconnected)?;
            self.set_phase(Phase::Authenticating);
            if let Some(done) = upgrade.feed(&data, policy)? {
                return Ok(done);
            }
        }
    }

    /// Client side: send `handshake` and validate the answer. Returns bytes
    /// that followed the response.
    pub(crate) async fn open(self: &Arc<Self>, handshake: ClientHandshake) -> Result<Bytes> {
        let negotiated = tokio::time::timeout(self.settings.handshake_timeout, self.negotiate(handshake))
            .await
            .unwrap_or_else(|_| Err(ConnectionError::Timeout.into()));
        match negotiated {
            Ok((session, leftover)) => {
                self.establish(session).await?;
                Ok(leftover)
            }
            Err(e) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn negotiate(&self, handshake: ClientHandshake) -> Result<(Session, Bytes)> {
        self.send_raw(&handshake.to_request()).await?;
        self.set_phase(Phase::Authenticating);
        let mut upgrade = ClientUpgrade::new(handshake);
        loop {
            let data = self
                .receive()
                .await?
                .ok_or(ConnectionError::Disconnected)?;
            if let Some((subprotocol, leftover)) = upgrade.feed(&data)? {
                let session = Session::from_client(upgrade.handshake(), subprotocol);
                return Ok((session, leftover));
            }
        }
    }

    /// Bind the negotiated protocol, fire `on_connected`, then flush queued
    /// sends and go live.
    async fn establish(self: &Arc<Self>, session: Session) -> Result<()> {
        let handler = handler::for_protocol(session.protocol);
        *self.frame.lock().await = Some(handler.new_frame(self.role, self.settings.max_frame_size));
        let _ = self.session.set(session);

        let user = self.user();
        events::invoke("on_connected", &user, self.callbacks.on_connected(&user)).await;

        let flushed = {
            let mut pending = self.pending.lock().await;
            let mut flushed = 0;
            for message in pending.drain(..) {
                let bytes = match handler.wrap(self.role, &message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(id = %self.id, error = %e, "dropping queued message");
                        continue;
                    }
                };
                if let Err(e) = self.send_raw(&bytes).await {
                    self.disconnect().await;
                    return Err(e);
                }
                flushed += 1;
            }
            if !self.phase().is_handshaking() {
                return Err(ConnectionError::Cancelled.into());
            }
            // Set under the lock so no send can overtake the queued ones.
            self.set_phase(Phase::Established);
            flushed
        };
        for _ in 0..flushed {
            events::invoke("on_send", &user, self.callbacks.on_send(&user)).await;
        }
        Ok(())
    }

    /// Steady-state receive loop. Runs until the peer closes, a protocol or
    /// transport error occurs, or the connection is cancelled, then disposes.
    pub(crate) async fn run(self: Arc<Self>, leftover: Bytes) {
        let mut next = Some(leftover).filter(|b| !b.is_empty());
        loop {
            let data = match next.take() {
                Some(data) => data,
                None => match self.receive().await {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::debug!(id = %self.id, "peer closed transport");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(id = %self.id, error = %e, "receive ended");
                        break;
                    }
                },
            };
            if !self.process(&data).await {
                break;
            }
        }
        self.dispose().await;
    }

    /// Decode and dispatch one received chunk. Returns whether to continue.
    async fn process(self: &Arc<Self>, data: &[u8]) -> bool {
        let Ok(handler) = self.handler() else {
            return false;
        };
        let mut inbound = Vec::new();
        let result = {
            let mut frame = self.frame.lock().await;
            match frame.as_mut() {
                Some(frame) => handler.process(frame, data, &mut inbound),
                None => return false,
            }
        };

        let user = self.user();
        for event in inbound {
            match event {
                Inbound::Message(message) => {
                    events::invoke("on_receive", &user, self.callbacks.on_receive(&user, message))
                        .await;
                }
                Inbound::Ping(payload) => {
                    if let Some(pong) = handler.pong(self.role, &payload) {
                        if self.send_raw(&pong).await.is_err() {
                            self.disconnect().await;
                            return false;
                        }
                    }
                }
                Inbound::Pong(payload) => {
                    tracing::trace!(id = %self.id, len = payload.len(), "pong");
                }
                Inbound::Close(payload) => {
                    if self.phase() == Phase::Established {
                        self.set_phase(Phase::Closing);
                        let _ = self.send_raw(&handler.close_echo(self.role, &payload)).await;
                    }
                    tracing::debug!(id = %self.id, "close frame received");
                    self.disconnect().await;
                    return false;
                }
            }
        }

        if let Err(e) = result {
            tracing::warn!(
                id = %self.id,
                protocol = %handler.protocol(),
                error = %e,
                "protocol error, dropping connection"
            );
            let code = handler::close_code_for(&e);
            let _ = self.send_raw(&handler.close(self.role, code)).await;
            self.disconnect().await;
            return false;
        }
        !matches!(self.phase(), Phase::Closing | Phase::Closed)
    }

    /// Application-initiated close.
    pub(crate) async fn close(&self, code: u16) {
        if self.phase() == Phase::Established {
            self.set_phase(Phase::Closing);
            if let Ok(handler) = self.handler() {
                let _ = self.send_raw(&handler.close(self.role, code)).await;
            }
        }
        self.disconnect().await;
    }

    /// Stop the connection: closes the transport and wakes every wait on
    /// this connection's guards. Idempotent.
    pub(crate) async fn disconnect(&self) {
        self.set_phase(Phase::Closed);
        self.shutdown.trigger();
        if let Err(e) = self.transport.close().await {
            tracing::debug!(id = %self.id, error = %e, "transport close failed");
        }
    }

    /// Disconnect and fire `on_disconnect`. Only the first call does anything.
    pub(crate) async fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect().await;
        let user = self.user();
        events::invoke("on_disconnect", &user, self.callbacks.on_disconnect(&user)).await;
        tracing::debug!(id = %self.id, "connection disposed");
    }
}
