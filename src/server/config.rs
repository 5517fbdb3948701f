use crate::context::Settings;
use crate::handshake::HandshakePolicy;
use serde::Deserialize;
use std::time::Duration;

/// Server engine settings. Every field has a default, so partial documents
/// deserialize cleanly.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8181`.
    pub listen: String,
    /// Size of each connection's receive buffer.
    pub buffer_size: usize,
    /// Largest message accepted before the connection is dropped.
    pub max_frame_size: u64,
    pub handshake_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// Handshake workers; `0` means one per available core.
    pub workers: usize,
    /// Allowed `Origin` values (scheme-qualified). Empty allows any.
    pub origins: Vec<String>,
    /// Required `Host` value, if any.
    pub destination: Option<String>,
    /// Supported subprotocols, in preference order.
    pub subprotocols: Vec<String>,
    /// Advertise `wss://` locations in legacy responses.
    pub secure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8181".to_string(),
            buffer_size: 8 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            handshake_timeout_ms: 10_000,
            sweep_interval_ms: 5_000,
            workers: 0,
            origins: Vec::new(),
            destination: None,
            subprotocols: Vec::new(),
            secure: false,
        }
    }
}

impl ServerConfig {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: u64) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    pub fn with_destination(mut self, host: impl Into<String>) -> Self {
        self.destination = Some(host.into());
        self
    }

    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Resolved worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            buffer_size: self.buffer_size,
            max_frame_size: self.max_frame_size,
            handshake_timeout: self.handshake_timeout(),
        }
    }

    pub(crate) fn policy(&self) -> HandshakePolicy {
        HandshakePolicy {
            origins: self.origins.clone(),
            destination: self.destination.clone(),
            subprotocols: self.subprotocols.clone(),
            secure: self.secure,
        }
    }
}
