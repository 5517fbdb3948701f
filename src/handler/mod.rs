//! Per-protocol handlers.
//!
//! A [`Handler`] holds no per-connection state: one instance per protocol
//! variant lives in a static table shared by every connection.

mod upgrade;

pub use upgrade::{ClientUpgrade, ServerUpgrade, Upgraded, MAX_HANDSHAKE_SIZE};

use crate::error::ProtocolError;
use crate::frame::{DataFrame, FrameState, Framing, Message, Opcode, Role, LEGACY_END, LEGACY_START};
use crate::types::Protocol;
use bytes::Bytes;

/// Close status codes (RFC 6455 §7.4.1).
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const TOO_BIG: u16 = 1009;
}

/// Something the steady-state decoder produced for the connection to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    /// Close frame payload (status code and reason, possibly empty).
    Close(Bytes),
}

/// Stateless framing logic for one protocol variant.
#[derive(Debug)]
pub struct Handler {
    protocol: Protocol,
}

static HANDLERS: [Handler; 3] = [
    Handler {
        protocol: Protocol::Legacy,
    },
    Handler {
        protocol: Protocol::Hybi10,
    },
    Handler {
        protocol: Protocol::Rfc6455,
    },
];

/// The shared handler for `protocol`.
pub fn for_protocol(protocol: Protocol) -> &'static Handler {
    &HANDLERS[protocol.index()]
}

impl Handler {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn framing(&self) -> Framing {
        self.protocol.framing()
    }

    /// Fresh assembly frame for a connection of this protocol.
    pub fn new_frame(&self, role: Role, max_size: u64) -> DataFrame {
        DataFrame::new(self.framing(), role, max_size)
    }

    /// Feed received bytes through `frame`, pushing every completed message
    /// and control frame onto `out`. Stops after a close frame. On error,
    /// `out` still holds what completed before the violation.
    pub fn process(
        &self,
        frame: &mut DataFrame,
        mut data: &[u8],
        out: &mut Vec<Inbound>,
    ) -> Result<(), ProtocolError> {
        while !data.is_empty() {
            let used = frame.append(data, true)?;
            data = &data[used..];
            match frame.state() {
                FrameState::Complete => {
                    let message = frame.to_message()?;
                    frame.reset();
                    out.push(Inbound::Message(message));
                }
                FrameState::Ping => {
                    out.push(Inbound::Ping(Bytes::copy_from_slice(frame.control_payload())));
                    frame.finish_control();
                }
                FrameState::Pong => {
                    out.push(Inbound::Pong(Bytes::copy_from_slice(frame.control_payload())));
                    frame.finish_control();
                }
                FrameState::Closed => {
                    out.push(Inbound::Close(Bytes::copy_from_slice(frame.control_payload())));
                    frame.reset();
                    break;
                }
                FrameState::Empty | FrameState::Receiving => {
                    if used == 0 {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Wire bytes for an outbound message. Legacy framing cannot carry
    /// binary payloads: a `0xFF` byte would end the frame early.
    pub fn wrap(&self, role: Role, message: &Message) -> Result<Bytes, ProtocolError> {
        if self.framing() == Framing::Legacy && matches!(message, Message::Binary(_)) {
            return Err(ProtocolError::LegacyBinary);
        }
        let mut frame = DataFrame::outbound(self.framing(), role, message);
        frame.as_frame();
        Ok(frame.payload())
    }

    /// Pong answering a ping. Legacy framing has no pings.
    pub fn pong(&self, role: Role, payload: &[u8]) -> Option<Bytes> {
        match self.framing() {
            Framing::Legacy => None,
            Framing::Hybi => Some(control_frame(role, Opcode::Pong, payload)),
        }
    }

    /// Ping carrying `payload` (at most 125 bytes).
    pub fn ping(&self, role: Role, payload: &[u8]) -> Option<Bytes> {
        match self.framing() {
            Framing::Legacy => None,
            Framing::Hybi => Some(control_frame(role, Opcode::Ping, payload)),
        }
    }

    /// Close frame with a status code.
    pub fn close(&self, role: Role, code: u16) -> Bytes {
        self.close_echo(role, &code.to_be_bytes())
    }

    /// Close frame echoing a received close payload.
    pub fn close_echo(&self, role: Role, payload: &[u8]) -> Bytes {
        match self.framing() {
            Framing::Legacy => Bytes::from_static(&[LEGACY_END, LEGACY_START]),
            Framing::Hybi => {
                // Only the status code is echoed.
                let echoed = payload.get(..2).unwrap_or_default();
                control_frame(role, Opcode::Close, echoed)
            }
        }
    }
}

fn control_frame(role: Role, opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut frame = DataFrame::control(role, opcode, payload);
    frame.as_frame();
    frame.payload()
}

/// Close code to report for a framing violation.
pub fn close_code_for(err: &ProtocolError) -> u16 {
    match err {
        ProtocolError::FrameTooLarge { .. } => close_code::TOO_BIG,
        ProtocolError::InvalidUtf8 => close_code::INVALID_PAYLOAD,
        _ => close_code::PROTOCOL_ERROR,
    }
}
