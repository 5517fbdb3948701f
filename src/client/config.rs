use crate::context::Settings;
use crate::error::ConnectionError;
use crate::types::Protocol;
use serde::Deserialize;
use std::time::Duration;

/// Client engine settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server URL, `ws://host[:port][/path]`.
    pub url: String,
    pub origin: Option<String>,
    /// Protocol variant to speak.
    pub protocol: Protocol,
    /// Requested subprotocols, in preference order.
    pub subprotocols: Vec<String>,
    pub cookies: Vec<(String, String)>,
    pub buffer_size: usize,
    pub max_frame_size: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8181/".to_string(),
            origin: None,
            protocol: Protocol::Rfc6455,
            subprotocols: Vec::new(),
            cookies: Vec::new(),
            buffer_size: 8 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
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

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            buffer_size: self.buffer_size,
            max_frame_size: self.max_frame_size,
            handshake_timeout: self.handshake_timeout(),
        }
    }

    pub(crate) fn target(&self) -> Result<Target, ConnectionError> {
        Target::parse(&self.url)
    }
}

/// Where a `ws://` URL points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Target {
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let invalid = || ConnectionError::InvalidUrl(url.to_string());
        let rest = match url.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("ws") => rest,
            _ => return Err(invalid()),
        };
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
                match rest.strip_prefix(':') {
                    Some(port) => (host, port.parse().map_err(|_| invalid())?),
                    None if rest.is_empty() => (host, 80),
                    None => return Err(invalid()),
                }
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
                None => (authority, 80),
            },
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Value for the `Host` field; the port is omitted when it is 80.
    pub fn host_field(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}
