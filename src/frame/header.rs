//! Frame header codec (RFC 6455 §5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! ```

use super::{Opcode, Role, MAX_CONTROL_PAYLOAD};
use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// 2-byte base + 8-byte extended length + 4-byte mask key.
pub const MAX_HEADER_SIZE: usize = 14;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const MASK_BIT: u8 = 0x80;

/// One decoded (or to-be-encoded) frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub fin: bool,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn new(opcode: Opcode, fin: bool, payload_len: u64) -> Self {
        Self {
            opcode,
            fin,
            mask: None,
            payload_len,
        }
    }

    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Header for an outbound frame. Client frames get a fresh random key.
    pub fn for_payload(opcode: Opcode, fin: bool, payload_len: u64, role: Role) -> Self {
        let header = Self::new(opcode, fin, payload_len);
        match role {
            Role::Server => header,
            Role::Client => header.with_mask(rand::random()),
        }
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let ext = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + ext + if self.is_masked() { 4 } else { 0 }
    }

    /// Render the header bytes, always using the smallest length form.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= FIN_BIT;
        }
        let mask_bit = if self.is_masked() { MASK_BIT } else { 0 };
        buf.put_u8(b0);
        match self.payload_len {
            len @ 0..=125 => buf.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len);
            }
        }
        if let Some(key) = self.mask {
            buf.put_slice(&key);
        }
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the whole header; never
    /// reads past `buf.len()`.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let (b0, b1) = (buf[0], buf[1]);
        if b0 & RSV_BITS != 0 {
            return Err(ProtocolError::ReservedBits);
        }
        let opcode = Opcode::from_u8(b0 & 0x0F).ok_or(ProtocolError::UnknownOpcode(b0 & 0x0F))?;
        let fin = b0 & FIN_BIT != 0;
        let masked = b1 & MASK_BIT != 0;

        let needed = required_len(b1);
        if buf.len() < needed {
            return Ok(None);
        }

        let (payload_len, mut pos) = match b1 & 0x7F {
            len @ 0..=125 => (len as u64, 2),
            126 => (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4),
            _ => {
                let mut be = [0u8; 8];
                be.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(be);
                if len >> 63 != 0 {
                    return Err(ProtocolError::LengthOverflow);
                }
                (len, 10)
            }
        };

        if opcode.is_control() && (payload_len > MAX_CONTROL_PAYLOAD || !fin) {
            return Err(ProtocolError::InvalidControlFrame);
        }

        let mask = if masked {
            let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
            pos += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            Self {
                opcode,
                fin,
                mask,
                payload_len,
            },
            pos,
        )))
    }
}

/// Total header length implied by the second header byte.
fn required_len(b1: u8) -> usize {
    let ext = match b1 & 0x7F {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    2 + ext + if b1 & MASK_BIT != 0 { 4 } else { 0 }
}

/// Result of feeding bytes to a [`HeaderDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// All input was absorbed; the header is still incomplete.
    NeedMoreData,
    /// Header complete. `consumed` counts bytes of the latest input only.
    Header { header: FrameHeader, consumed: usize },
}

/// Streaming header decoder that keeps a partially received header between
/// calls, so callers only ever pass newly arrived bytes.
#[derive(Debug, Default)]
pub struct HeaderDecoder {
    partial: BytesMut,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            partial: BytesMut::with_capacity(MAX_HEADER_SIZE),
        }
    }

    /// Bytes of an incomplete header held from earlier calls.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }

    pub fn decode(&mut self, input: &[u8]) -> Result<Decoded, ProtocolError> {
        let held = self.partial.len();
        let mut window = [0u8; MAX_HEADER_SIZE];
        window[..held].copy_from_slice(&self.partial);
        let take = input.len().min(MAX_HEADER_SIZE - held);
        window[held..held + take].copy_from_slice(&input[..take]);

        match FrameHeader::parse(&window[..held + take])? {
            Some((header, len)) => {
                self.partial.clear();
                Ok(Decoded::Header {
                    header,
                    consumed: len - held,
                })
            }
            None => {
                // Header is at most 14 bytes, so `take` covers all of `input` here.
                self.partial.extend_from_slice(&input[..take]);
                Ok(Decoded::NeedMoreData)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_forms() {
        for (len, size) in [
            (0u64, 2usize),
            (125, 2),
            (126, 4),
            (65535, 4),
            (65536, 10),
            (u32::MAX as u64 + 1, 10),
        ] {
            let header = FrameHeader::new(Opcode::Binary, true, len);
            let bytes = header.encode();
            assert_eq!(bytes.len(), size, "len {len}");
            let (parsed, used) = FrameHeader::parse(&bytes).unwrap().unwrap();
            assert_eq!(parsed, header);
            assert_eq!(used, size);
        }
    }

    #[test]
    fn extended_length_is_big_endian() {
        let bytes = FrameHeader::new(Opcode::Text, true, 0x0102).encode();
        assert_eq!(&bytes[..], &[0x81, 126, 0x01, 0x02]);
        let bytes = FrameHeader::new(Opcode::Text, false, 0x0102_0304_0506).encode();
        assert_eq!(
            &bytes[..],
            &[0x01, 127, 0, 0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );
    }

    #[test]
    fn mask_key_follows_length() {
        let header = FrameHeader::new(Opcode::Text, true, 300).with_mask([9, 8, 7, 6]);
        let bytes = header.encode();
        assert_eq!(&bytes[..], &[0x81, 0x80 | 126, 0x01, 0x2C, 9, 8, 7, 6]);
        assert_eq!(FrameHeader::parse(&bytes).unwrap().unwrap().0, header);
    }

    #[test]
    fn client_role_picks_mask() {
        let header = FrameHeader::for_payload(Opcode::Binary, true, 10, Role::Client);
        assert!(header.is_masked());
        let header = FrameHeader::for_payload(Opcode::Binary, true, 10, Role::Server);
        assert!(!header.is_masked());
    }

    #[test]
    fn parse_never_reads_past_input() {
        let bytes = FrameHeader::new(Opcode::Binary, true, 70_000)
            .with_mask([1, 2, 3, 4])
            .encode();
        for end in 0..bytes.len() {
            assert_eq!(FrameHeader::parse(&bytes[..end]).unwrap(), None);
        }
    }

    #[test]
    fn rejects_protocol_violations() {
        assert_eq!(
            FrameHeader::parse(&[0xC1, 0x00]),
            Err(ProtocolError::ReservedBits)
        );
        assert_eq!(
            FrameHeader::parse(&[0x83, 0x00]),
            Err(ProtocolError::UnknownOpcode(3))
        );
        assert_eq!(
            FrameHeader::parse(&[0x89, 126, 0x00, 0x80]),
            Err(ProtocolError::InvalidControlFrame)
        );
        assert_eq!(
            FrameHeader::parse(&[0x09, 0x00]),
            Err(ProtocolError::InvalidControlFrame)
        );
        let mut huge = vec![0x82, 127];
        huge.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(FrameHeader::parse(&huge), Err(ProtocolError::LengthOverflow));
    }

    #[test]
    fn decoder_retains_split_header() {
        let header = FrameHeader::new(Opcode::Binary, true, 1 << 20).with_mask([5, 6, 7, 8]);
        let mut wire = header.encode().to_vec();
        wire.extend_from_slice(b"payload");

        for split in 1..header.encoded_len() {
            let mut decoder = HeaderDecoder::new();
            assert_eq!(
                decoder.decode(&wire[..split]).unwrap(),
                Decoded::NeedMoreData
            );
            assert_eq!(decoder.pending(), split);
            match decoder.decode(&wire[split..]).unwrap() {
                Decoded::Header {
                    header: parsed,
                    consumed,
                } => {
                    assert_eq!(parsed, header);
                    assert_eq!(consumed, header.encoded_len() - split);
                }
                Decoded::NeedMoreData => panic!("header should be complete"),
            }
            assert_eq!(decoder.pending(), 0);
        }
    }

    #[test]
    fn decoder_byte_at_a_time() {
        let header = FrameHeader::new(Opcode::Text, true, 65536).with_mask([1, 1, 1, 1]);
        let wire = header.encode();
        let mut decoder = HeaderDecoder::new();
        let mut result = None;
        for byte in wire.iter() {
            if let Decoded::Header { header, consumed } = decoder.decode(&[*byte]).unwrap() {
                assert_eq!(consumed, 1);
                result = Some(header);
            }
        }
        assert_eq!(result, Some(header));
    }
}
