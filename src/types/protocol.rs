use crate::frame::Framing;
use std::fmt;

/// Handshake/framing variant spoken by a peer, fixed for the lifetime of a
/// connection once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// hixie-76 / hybi-00: `Sec-WebSocket-Key1` + `Key2` and an 8-byte challenge.
    Legacy,
    /// hybi-08 through hybi-12 (`Sec-WebSocket-Version` 8..=12).
    Hybi10,
    /// RFC 6455 (`Sec-WebSocket-Version: 13`).
    Rfc6455,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Legacy, Protocol::Hybi10, Protocol::Rfc6455];

    /// Classify from `Sec-WebSocket-Version`. Versions 1..=7 were never
    /// deployed widely and are not spoken.
    pub fn from_version(version: u32) -> Option<Self> {
        match version {
            8..=12 => Some(Self::Hybi10),
            13..=u32::MAX => Some(Self::Rfc6455),
            _ => None,
        }
    }

    /// Version sent by a client speaking this protocol.
    pub fn version(self) -> Option<u32> {
        match self {
            Self::Legacy => None,
            Self::Hybi10 => Some(8),
            Self::Rfc6455 => Some(13),
        }
    }

    pub fn framing(self) -> Framing {
        match self {
            Self::Legacy => Framing::Legacy,
            Self::Hybi10 | Self::Rfc6455 => Framing::Hybi,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Legacy => "legacy",
            Self::Hybi10 => "hybi10",
            Self::Rfc6455 => "rfc6455",
        };
        f.write_str(name)
    }
}

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Unestablished = 0,
    Authenticating = 1,
    Established = 2,
    Closing = 3,
    Closed = 4,
}

impl Phase {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unestablished,
            1 => Self::Authenticating,
            2 => Self::Established,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::Unestablished | Self::Authenticating)
    }
}
