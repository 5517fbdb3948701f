//! Hybi-10 and RFC 6455 handshakes (`Sec-WebSocket-Key` / `-Accept`).

use super::{ClientHandshake, HandshakeKey, ServerHandshake};
use crate::types::Protocol;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(sha1(key ++ GUID))`.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh client nonce: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    BASE64.encode(rand::random::<[u8; 16]>())
}

/// Whether a client key decodes to the 16-byte nonce RFC 6455 requires.
pub fn is_valid_key(key: &str) -> bool {
    BASE64
        .decode(key.trim())
        .map(|nonce| nonce.len() == 16)
        .unwrap_or(false)
}

fn origin_field(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Hybi10 => "Sec-WebSocket-Origin",
        _ => "Origin",
    }
}

pub(super) fn build_request(hs: &ClientHandshake) -> Bytes {
    let HandshakeKey::Hybi { key } = &hs.key else {
        return Bytes::new();
    };
    let mut head = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\n",
        hs.path, hs.host, key
    );
    if let Some(origin) = &hs.origin {
        head.push_str(&format!("{}: {}\r\n", origin_field(hs.protocol), origin));
    }
    if let Some(version) = hs.protocol.version() {
        head.push_str(&format!("Sec-WebSocket-Version: {}\r\n", version));
    }
    super::push_common_request_fields(&mut head, hs);
    head.push_str("\r\n");
    Bytes::from(head)
}

pub(super) fn build_response(hs: &ServerHandshake, accept: &str) -> Bytes {
    let mut head = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        accept
    );
    if hs.protocol == Protocol::Hybi10 {
        if let Some(origin) = &hs.origin {
            head.push_str(&format!("Sec-WebSocket-Origin: {}\r\n", origin));
        }
    }
    if let Some(sub) = &hs.subprotocol {
        head.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", sub));
    }
    head.push_str("\r\n");
    Bytes::from(head)
}

/// Origin as sent by a client of `protocol`. Hybi-10 clients may use either
/// field name.
pub(super) fn request_origin(protocol: Protocol, fields: &crate::http::Fields) -> Option<String> {
    fields
        .get(origin_field(protocol))
        .or_else(|| fields.get("Origin"))
        .map(str::to_string)
}
