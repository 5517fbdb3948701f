//! Legacy (hixie-76 / hybi-00) handshake: two space-scaled numeric keys and
//! an 8-byte challenge answered with an MD5 digest.

use super::{ClientHandshake, HandshakeKey, ServerHandshake};
use crate::error::HandshakeError;
use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::Rng;

/// Length of the challenge following the request head.
pub const CHALLENGE_LEN: usize = 8;

/// Length of the MD5 answer following the response head.
pub const RESPONSE_LEN: usize = 16;

/// Digits embedded in `key` divided by the number of spaces in it.
pub fn key_number(key: &str, field: &'static str) -> Result<u32, HandshakeError> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
    if spaces == 0 || digits.is_empty() {
        return Err(HandshakeError::InvalidKey(field));
    }
    let number: u64 = digits
        .parse()
        .map_err(|_| HandshakeError::InvalidKey(field))?;
    if number % spaces != 0 {
        return Err(HandshakeError::InvalidKey(field));
    }
    u32::try_from(number / spaces).map_err(|_| HandshakeError::InvalidKey(field))
}

/// `md5(be32(key1) ++ be32(key2) ++ challenge)`.
pub fn challenge_response(
    key1: &str,
    key2: &str,
    challenge: &[u8; CHALLENGE_LEN],
) -> Result<[u8; RESPONSE_LEN], HandshakeError> {
    let n1 = key_number(key1, "Sec-WebSocket-Key1")?;
    let n2 = key_number(key2, "Sec-WebSocket-Key2")?;
    let mut hasher = Md5::new();
    hasher.update(n1.to_be_bytes());
    hasher.update(n2.to_be_bytes());
    hasher.update(challenge);
    let digest = hasher.finalize();
    let mut out = [0u8; RESPONSE_LEN];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Random key in the hixie-76 client format: a multiple of the space count
/// with noise characters and spaces mixed in.
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    let spaces: u32 = rng.gen_range(1..=12);
    let number = rng.gen_range(0..=u32::MAX / spaces);
    let mut key: Vec<char> = (number as u64 * spaces as u64).to_string().chars().collect();

    for _ in 0..rng.gen_range(1..=12) {
        let noise = match rng.gen_range(0..2) {
            0 => rng.gen_range(0x21u8..=0x2F) as char,
            _ => rng.gen_range(0x3Au8..=0x7E) as char,
        };
        let at = rng.gen_range(0..=key.len());
        key.insert(at, noise);
    }
    for _ in 0..spaces {
        let at = rng.gen_range(1..key.len());
        key.insert(at, ' ');
    }
    key.into_iter().collect()
}

pub(super) fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    rand::random()
}

pub(super) fn build_request(hs: &ClientHandshake) -> Bytes {
    let HandshakeKey::Legacy {
        key1,
        key2,
        challenge,
    } = &hs.key
    else {
        return Bytes::new();
    };
    let mut head = format!(
        "GET {} HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\nHost: {}\r\n",
        hs.path, hs.host
    );
    if let Some(origin) = &hs.origin {
        head.push_str(&format!("Origin: {}\r\n", origin));
    }
    head.push_str(&format!(
        "Sec-WebSocket-Key1: {}\r\nSec-WebSocket-Key2: {}\r\n",
        key1, key2
    ));
    super::push_common_request_fields(&mut head, hs);
    head.push_str("\r\n");

    let mut out = BytesMut::with_capacity(head.len() + CHALLENGE_LEN);
    out.put_slice(head.as_bytes());
    out.put_slice(challenge);
    out.freeze()
}

pub(super) fn build_response(hs: &ServerHandshake, answer: &[u8; RESPONSE_LEN]) -> Bytes {
    let mut head = String::from(
        "HTTP/1.1 101 WebSocket Protocol Handshake\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n",
    );
    if let Some(origin) = &hs.origin {
        head.push_str(&format!("Sec-WebSocket-Origin: {}\r\n", origin));
    }
    head.push_str(&format!("Sec-WebSocket-Location: {}\r\n", hs.location));
    if let Some(sub) = &hs.subprotocol {
        head.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", sub));
    }
    head.push_str("\r\n");

    let mut out = BytesMut::with_capacity(head.len() + RESPONSE_LEN);
    out.put_slice(head.as_bytes());
    out.put_slice(answer);
    out.freeze()
}
