use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Framing violations. Always fatal for the connection, never for the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown opcode 0x{0:X}")]
    UnknownOpcode(u8),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("most significant bit of 64-bit length must be 0")]
    LengthOverflow,

    #[error("control frame too long or fragmented")]
    InvalidControlFrame,

    #[error("frame masking does not match sender role (masked: {masked})")]
    MaskMismatch { masked: bool },

    #[error("legacy framing carries text only")]
    LegacyBinary,

    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    MessageInterleaved,

    #[error("legacy frame must start with 0x00")]
    LegacyFrameStart,

    #[error("frame truncated")]
    Truncated,

    #[error("frame is already wrapped")]
    AlreadyFramed,

    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("handshake exceeds {0} bytes")]
    HandshakeTooLarge(usize),
}

/// Reasons a handshake is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("malformed key field {0}")]
    InvalidKey(&'static str),

    #[error("missing or short challenge")]
    MissingChallenge,

    #[error("unsupported protocol version")]
    UnsupportedVersion,

    #[error("origin {0:?} not allowed")]
    OriginRejected(String),

    #[error("destination {0:?} not allowed")]
    DestinationRejected(String),

    #[error("no common subprotocol")]
    NoSubprotocol,

    #[error("unexpected status {0}")]
    BadStatus(u16),

    #[error("acceptance token mismatch")]
    AcceptMismatch,

    #[error("malformed request or response head")]
    Malformed,
}

/// Transport-level and lifecycle errors.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("disconnected")]
    Disconnected,

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid url {0:?}")]
    InvalidUrl(String),
}
