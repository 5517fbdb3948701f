//! Handshake-phase byte accumulation. Bytes arrive in arbitrary chunks; the
//! head (plus the legacy challenge or answer) is gathered before anything is
//! validated, and whatever follows it is handed back as framed data.

use crate::error::{Error, HandshakeError, ProtocolError};
use crate::handshake::{ClientHandshake, HandshakePolicy, ServerHandshake, CHALLENGE_LEN};
use crate::http::{find_head_end, RequestHeader, ResponseHeader};
use crate::types::Protocol;
use crate::Result;
use bytes::{Bytes, BytesMut};

/// Largest handshake accepted before the connection is dropped.
pub const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

fn check_size(len: usize) -> Result<()> {
    if len > MAX_HANDSHAKE_SIZE {
        return Err(ProtocolError::HandshakeTooLarge(MAX_HANDSHAKE_SIZE).into());
    }
    Ok(())
}

/// Outcome of a completed server-side handshake.
#[derive(Debug)]
pub struct Upgraded {
    pub request: RequestHeader,
    pub client: ClientHandshake,
    pub server: ServerHandshake,
    /// Bytes received after the handshake; the start of the first frame.
    pub leftover: Bytes,
}

/// Server side: gathers the client's request.
#[derive(Debug, Default)]
pub struct ServerUpgrade {
    buf: BytesMut,
}

impl ServerUpgrade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly received bytes. `Ok(None)` means more are needed.
    pub fn feed(&mut self, data: &[u8], policy: &HandshakePolicy) -> Result<Option<Upgraded>> {
        self.buf.extend_from_slice(data);
        let Some(head_end) = find_head_end(&self.buf) else {
            check_size(self.buf.len())?;
            return Ok(None);
        };
        check_size(head_end)?;
        let request = RequestHeader::parse(&self.buf[..head_end]);
        let body_len = match request.protocol {
            Some(Protocol::Legacy) => CHALLENGE_LEN,
            Some(_) => 0,
            None => return Err(HandshakeError::UnsupportedVersion.into()),
        };
        if self.buf.len() < head_end + body_len {
            return Ok(None);
        }

        let (client, server) = policy.accept(&request, &self.buf[head_end..])?;
        let leftover = self.buf.split_off(head_end + body_len).freeze();
        self.buf.clear();
        Ok(Some(Upgraded {
            request,
            client,
            server,
            leftover,
        }))
    }
}

/// Client side: gathers the server's response to `handshake`.
#[derive(Debug)]
pub struct ClientUpgrade {
    handshake: ClientHandshake,
    buf: BytesMut,
}

impl ClientUpgrade {
    pub fn new(handshake: ClientHandshake) -> Self {
        Self {
            handshake,
            buf: BytesMut::new(),
        }
    }

    pub fn handshake(&self) -> &ClientHandshake {
        &self.handshake
    }

    /// Feed newly received bytes. On success yields the negotiated
    /// subprotocol and any bytes following the response.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<(Option<String>, Bytes)>> {
        self.buf.extend_from_slice(data);
        let Some(head_end) = find_head_end(&self.buf) else {
            check_size(self.buf.len())?;
            return Ok(None);
        };
        check_size(head_end)?;
        let head = ResponseHeader::parse(&self.buf[..head_end])
            .ok_or(Error::Handshake(HandshakeError::Malformed))?;
        let body_len = self.handshake.response_body_len();
        if head.status == 101 && self.buf.len() < head_end + body_len {
            return Ok(None);
        }
        let subprotocol = self
            .handshake
            .validate_response(&head, &self.buf[head_end..])?;
        let leftover = self.buf.split_off(head_end + body_len).freeze();
        self.buf.clear();
        Ok(Some((subprotocol, leftover)))
    }
}
