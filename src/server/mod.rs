//! Server engine: accept loop, handshake worker pool and sweep.
//!
//! Accepted transports go onto a work queue. A fixed pool of workers drains
//! it and spawns one task per connection, which runs `on_connect`, the
//! handshake and then the receive loop. A sweep task periodically disposes
//! connections whose transport has gone away.

mod config;

pub use config::ServerConfig;

use crate::context::{Context, UserContext};
use crate::error::Error;
use crate::events::Callbacks;
use crate::frame::{Message, Role};
use crate::handshake::HandshakePolicy;
use crate::shutdown::Shutdown;
use crate::transport::{StreamTransport, Transport};
use crate::types::ConnectionId;
use crate::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A WebSocket server speaking all three protocol variants.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    policy: HandshakePolicy,
    callbacks: Arc<dyn Callbacks>,
    shutdown: Shutdown,
    connections: RwLock<HashMap<ConnectionId, Arc<Context>>>,
    queue_tx: async_channel::Sender<Arc<Context>>,
    queue_rx: async_channel::Receiver<Arc<Context>>,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig, callbacks: impl Callbacks) -> Self {
        Self::with_callbacks(config, Arc::new(callbacks))
    }

    pub fn with_callbacks(config: ServerConfig, callbacks: Arc<dyn Callbacks>) -> Self {
        let (queue_tx, queue_rx) = async_channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                policy: config.policy(),
                config,
                callbacks,
                shutdown: Shutdown::new(),
                connections: RwLock::new(HashMap::new()),
                queue_tx,
                queue_rx,
                local_addr: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Bind the listen address and start accepting. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.inner.config.listen).await?;
        let addr = listener.local_addr()?;
        if let Ok(mut slot) = self.inner.local_addr.lock() {
            *slot = Some(addr);
        }
        self.spawn_loops();
        let accept = tokio::spawn(accept_loop(Arc::clone(&self.inner), listener));
        self.inner.track(accept);
        tracing::info!(%addr, "server listening");
        Ok(addr)
    }

    /// Address bound by [`Server::start`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.lock().ok().and_then(|a| *a)
    }

    /// Hand the engine an already-established transport. The connection is
    /// queued for the handshake like an accepted socket.
    pub async fn attach(&self, transport: Arc<dyn Transport>) -> Result<ConnectionId> {
        if self.inner.shutdown.is_triggered() {
            return Err(Error::NotConnected);
        }
        self.spawn_loops();
        self.inner.enqueue(transport).await
    }

    /// Handles for every registered connection.
    pub fn connections(&self) -> Vec<UserContext> {
        self.inner
            .connections
            .read()
            .map(|map| map.values().map(Context::user).collect())
            .unwrap_or_default()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<UserContext> {
        self.inner
            .connections
            .read()
            .ok()?
            .get(&id)
            .map(Context::user)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Send `message` to every established connection. Returns how many
    /// sends succeeded.
    pub async fn broadcast(&self, message: impl Into<Message>) -> usize {
        let message = message.into();
        let mut sent = 0;
        for ctx in self.connections() {
            if ctx.protocol().is_some() && ctx.send(message.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) && !self.inner.shutdown.is_triggered()
    }

    /// Stop accepting, cancel every connection and wait for the engine's
    /// own tasks to finish.
    pub async fn stop(&self) {
        tracing::info!("server stopping");
        self.inner.shutdown.trigger();
        self.inner.queue_tx.close();

        let contexts: Vec<_> = self
            .inner
            .connections
            .write()
            .map(|mut map| map.drain().map(|(_, ctx)| ctx).collect())
            .unwrap_or_default();
        for ctx in contexts {
            ctx.dispose().await;
        }

        let tasks = self
            .inner
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn spawn_loops(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = self.inner.config.worker_count();
        for n in 0..workers {
            let task = tokio::spawn(worker(Arc::clone(&self.inner), n));
            self.inner.track(task);
        }
        let sweep = tokio::spawn(sweep_loop(Arc::clone(&self.inner)));
        self.inner.track(sweep);
        tracing::debug!(workers, "engine loops started");
    }
}

impl Inner {
    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    async fn enqueue(&self, transport: Arc<dyn Transport>) -> Result<ConnectionId> {
        let ctx = Context::new(
            transport,
            Role::Server,
            self.config.settings(),
            Arc::clone(&self.callbacks),
            self.shutdown.child(),
        );
        let id = ctx.id();
        if let Ok(mut map) = self.connections.write() {
            map.insert(id, Arc::clone(&ctx));
        }
        if self.queue_tx.send(Arc::clone(&ctx)).await.is_err() {
            self.unregister(id);
            ctx.dispose().await;
            return Err(Error::NotConnected);
        }
        Ok(id)
    }

    fn unregister(&self, id: ConnectionId) {
        if let Ok(mut map) = self.connections.write() {
            map.remove(&id);
        }
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.shutdown.triggered() => break,
            r = listener.accept() => r,
        };
        let (stream, peer) = match accepted {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(%peer, "accepted");
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(stream, Some(peer)));
        if inner.enqueue(transport).await.is_err() {
            break;
        }
    }
}

async fn worker(inner: Arc<Inner>, n: usize) {
    loop {
        let ctx = tokio::select! {
            _ = inner.shutdown.triggered() => break,
            r = inner.queue_rx.recv() => match r {
                Ok(ctx) => ctx,
                Err(_) => break,
            },
        };
        tracing::trace!(id = %ctx.id(), worker = n, "dispatching connection");
        tokio::spawn(serve(Arc::clone(&inner), ctx));
    }
    tracing::trace!(worker = n, "worker stopped");
}

/// One connection's whole life: `on_connect`, handshake, receive loop.
/// Runs in its own task so a slow handshake never holds up the queue.
async fn serve(inner: Arc<Inner>, ctx: Arc<Context>) {
    let id = ctx.id();
    ctx.connect_event().await;
    match ctx.accept(&inner.policy).await {
        Ok(leftover) => Arc::clone(&ctx).run(leftover).await,
        Err(e) => {
            tracing::warn!(
                id = %id,
                peer = ?ctx.peer_addr(),
                error = %e,
                "handshake failed"
            );
            ctx.dispose().await;
        }
    }
    inner.unregister(id);
}

/// Dispose connections whose transport dropped without the receive loop
/// noticing, e.g. while still queued for a handshake.
async fn sweep_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.shutdown.triggered() => break,
            _ = interval.tick() => {}
        }
        let dead: Vec<_> = match inner.connections.write() {
            Ok(mut map) => {
                let ids: Vec<_> = map
                    .iter()
                    .filter(|(_, ctx)| !ctx.is_connected() || ctx.is_disposed())
                    .map(|(id, _)| *id)
                    .collect();
                ids.into_iter().filter_map(|id| map.remove(&id)).collect()
            }
            Err(_) => Vec::new(),
        };
        if !dead.is_empty() {
            tracing::debug!(count = dead.len(), "sweeping dead connections");
        }
        for ctx in dead {
            ctx.dispose().await;
        }
    }
}
