//! Message assembly and outbound wrapping.

use super::{
    Decoded, Framing, FrameHeader, HeaderDecoder, Masker, Message, Opcode, Role, LEGACY_END,
    LEGACY_START,
};
use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};

/// Representation currently held in a [`DataFrame`]'s segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Raw,
    Framed,
}

/// Assembly state of a [`DataFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Empty,
    Receiving,
    Complete,
    Closed,
    Ping,
    Pong,
}

impl FrameState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Closed | Self::Ping | Self::Pong)
    }
}

/// Wire frame currently being read.
#[derive(Debug)]
struct Current {
    header: FrameHeader,
    consumed: u64,
    masker: Option<Masker>,
}

/// One logical message: ordered payload segments plus the state needed to
/// assemble it from wire bytes or wrap it for sending.
#[derive(Debug)]
pub struct DataFrame {
    framing: Framing,
    role: Role,
    opcode: Opcode,
    segments: Vec<Bytes>,
    len: u64,
    format: Format,
    state: FrameState,
    max_size: u64,
    decoder: HeaderDecoder,
    current: Option<Current>,
    control: BytesMut,
    fragmented: bool,
    legacy_open: bool,
}

impl DataFrame {
    /// A frame that builds frames as `role` would and accepts payloads up to
    /// `max_size` bytes.
    pub fn new(framing: Framing, role: Role, max_size: u64) -> Self {
        Self {
            framing,
            role,
            opcode: Opcode::Text,
            segments: Vec::new(),
            len: 0,
            format: Format::Raw,
            state: FrameState::Empty,
            max_size,
            decoder: HeaderDecoder::new(),
            current: None,
            control: BytesMut::new(),
            fragmented: false,
            legacy_open: false,
        }
    }

    /// Outbound frame holding `message`, not yet wrapped.
    pub fn outbound(framing: Framing, role: Role, message: &Message) -> Self {
        let mut frame = Self::new(framing, role, u64::MAX);
        frame.opcode = message.opcode();
        frame.push_segment(Bytes::copy_from_slice(message.as_bytes()));
        frame
    }

    /// Outbound control frame (close, ping, pong) for hybi framing.
    pub fn control(role: Role, opcode: Opcode, payload: &[u8]) -> Self {
        let mut frame = Self::new(Framing::Hybi, role, u64::MAX);
        frame.opcode = opcode;
        frame.push_segment(Bytes::copy_from_slice(payload));
        frame
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.opcode = opcode;
    }

    /// Payload bytes accumulated so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Payload of the control frame that put the frame in a control state.
    pub fn control_payload(&self) -> &[u8] {
        &self.control
    }

    /// Feed bytes. Raw bytes (`as_wire == false`) are appended whole as
    /// payload; wire bytes are decoded and at most one message is consumed.
    /// Returns how many bytes of `data` were consumed. Bytes left over
    /// belong to the next message and must be appended after `reset`.
    pub fn append(&mut self, data: &[u8], as_wire: bool) -> Result<usize, ProtocolError> {
        if self.format == Format::Framed {
            return Err(ProtocolError::AlreadyFramed);
        }
        if !as_wire {
            self.check_size(data.len() as u64)?;
            self.push_segment(Bytes::copy_from_slice(data));
            if self.state == FrameState::Empty {
                self.state = FrameState::Receiving;
            }
            return Ok(data.len());
        }
        if self.state.is_terminal() {
            return Ok(0);
        }
        match self.framing {
            Framing::Hybi => self.append_hybi(data),
            Framing::Legacy => self.append_legacy(data),
        }
    }

    fn append_hybi(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        let mut pos = 0;
        loop {
            if self.current.is_none() {
                if pos == data.len() {
                    break;
                }
                match self.decoder.decode(&data[pos..])? {
                    Decoded::NeedMoreData => {
                        pos = data.len();
                        if self.state == FrameState::Empty {
                            self.state = FrameState::Receiving;
                        }
                        break;
                    }
                    Decoded::Header { header, consumed } => {
                        pos += consumed;
                        self.begin(header)?;
                    }
                }
            }

            let Some(current) = self.current.as_mut() else {
                break;
            };
            let remaining = current.header.payload_len - current.consumed;
            let take = remaining.min((data.len() - pos) as u64) as usize;
            let mut chunk = BytesMut::from(&data[pos..pos + take]);
            pos += take;
            current.consumed += take as u64;
            if let Some(masker) = current.masker.as_mut() {
                masker.apply(&mut chunk);
            }
            let done = current.consumed == current.header.payload_len;
            let header = current.header;

            if header.opcode.is_control() {
                self.control.extend_from_slice(&chunk);
            } else if !chunk.is_empty() {
                self.push_segment(chunk.freeze());
            }

            if !done {
                break;
            }
            self.current = None;
            self.finish(header);
            if self.state.is_terminal() {
                break;
            }
        }
        Ok(pos)
    }

    fn begin(&mut self, header: FrameHeader) -> Result<(), ProtocolError> {
        // Frames from a client are masked, frames from a server never are.
        let expect_mask = self.role == Role::Server;
        if header.is_masked() != expect_mask {
            return Err(ProtocolError::MaskMismatch {
                masked: header.is_masked(),
            });
        }
        match header.opcode {
            Opcode::Continuation if !self.fragmented => {
                return Err(ProtocolError::UnexpectedContinuation)
            }
            Opcode::Text | Opcode::Binary if self.fragmented => {
                return Err(ProtocolError::MessageInterleaved)
            }
            Opcode::Text | Opcode::Binary => self.opcode = header.opcode,
            _ => {}
        }
        if !header.opcode.is_control() {
            self.check_size(header.payload_len)?;
        }
        self.state = FrameState::Receiving;
        self.current = Some(Current {
            header,
            consumed: 0,
            masker: header.mask.map(Masker::new),
        });
        Ok(())
    }

    fn finish(&mut self, header: FrameHeader) {
        self.state = match header.opcode {
            Opcode::Close => FrameState::Closed,
            Opcode::Ping => FrameState::Ping,
            Opcode::Pong => FrameState::Pong,
            _ if header.fin => {
                self.fragmented = false;
                FrameState::Complete
            }
            _ => {
                self.fragmented = true;
                FrameState::Receiving
            }
        };
    }

    fn append_legacy(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        let mut pos = 0;
        if !self.legacy_open {
            match data.first() {
                None => return Ok(0),
                Some(&LEGACY_START) => {
                    self.legacy_open = true;
                    self.state = FrameState::Receiving;
                    pos = 1;
                }
                Some(&LEGACY_END) => {
                    // Closing handshake is 0xFF 0x00.
                    pos = if data.get(1) == Some(&LEGACY_START) { 2 } else { 1 };
                    self.state = FrameState::Closed;
                    return Ok(pos);
                }
                Some(_) => return Err(ProtocolError::LegacyFrameStart),
            }
        }

        let rest = &data[pos..];
        let (body, end) = match rest.iter().position(|b| *b == LEGACY_END) {
            Some(i) => (&rest[..i], Some(i)),
            None => (rest, None),
        };
        self.check_size(body.len() as u64)?;
        if !body.is_empty() {
            self.push_segment(Bytes::copy_from_slice(body));
        }
        pos += body.len();
        if end.is_some() {
            pos += 1;
            self.legacy_open = false;
            self.state = FrameState::Complete;
        }
        Ok(pos)
    }

    fn check_size(&self, incoming: u64) -> Result<(), ProtocolError> {
        let size = self.len.saturating_add(incoming);
        if size > self.max_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }

    fn push_segment(&mut self, segment: Bytes) {
        self.len += segment.len() as u64;
        self.segments.push(segment);
    }

    fn replace_segments(&mut self, segment: Bytes) {
        self.segments.clear();
        self.len = 0;
        self.push_segment(segment);
    }

    /// Drop the payload of a handled control frame. A fragmented message
    /// in progress is kept.
    pub fn finish_control(&mut self) {
        self.control.clear();
        if matches!(
            self.state,
            FrameState::Ping | FrameState::Pong | FrameState::Closed
        ) {
            self.state = if self.fragmented || self.len > 0 {
                FrameState::Receiving
            } else {
                FrameState::Empty
            };
        }
    }

    /// Wrap the raw payload for the wire. No-op when already framed.
    pub fn as_frame(&mut self) {
        if self.format == Format::Framed {
            return;
        }
        let payload = self.payload();
        let framed = match self.framing {
            Framing::Legacy => {
                let mut out = BytesMut::with_capacity(payload.len() + 2);
                out.extend_from_slice(&[LEGACY_START]);
                out.extend_from_slice(&payload);
                out.extend_from_slice(&[LEGACY_END]);
                out.freeze()
            }
            Framing::Hybi => {
                let header =
                    FrameHeader::for_payload(self.opcode, true, payload.len() as u64, self.role);
                let mut out = BytesMut::with_capacity(header.encoded_len() + payload.len());
                header.encode_into(&mut out);
                let start = out.len();
                out.extend_from_slice(&payload);
                if let Some(key) = header.mask {
                    Masker::new(key).apply(&mut out[start..]);
                }
                out.freeze()
            }
        };
        self.replace_segments(framed);
        self.format = Format::Framed;
    }

    /// Unwrap framed bytes back to the raw payload. No-op when already raw.
    pub fn as_raw(&mut self) -> Result<(), ProtocolError> {
        if self.format == Format::Raw {
            return Ok(());
        }
        let wire = self.payload();
        let raw = match self.framing {
            Framing::Legacy => {
                let inner = wire
                    .strip_prefix(&[LEGACY_START])
                    .and_then(|w| w.strip_suffix(&[LEGACY_END]))
                    .ok_or(ProtocolError::Truncated)?;
                Bytes::copy_from_slice(inner)
            }
            Framing::Hybi => {
                let (header, start) =
                    FrameHeader::parse(&wire)?.ok_or(ProtocolError::Truncated)?;
                self.opcode = header.opcode;
                let mut out = BytesMut::from(&wire[start..]);
                if let Some(key) = header.mask {
                    Masker::new(key).apply(&mut out);
                }
                out.freeze()
            }
        };
        self.replace_segments(raw);
        self.format = Format::Raw;
        Ok(())
    }

    /// Concatenated segments.
    pub fn payload(&self) -> Bytes {
        match self.segments.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            many => {
                let mut out = BytesMut::with_capacity(self.len as usize);
                for segment in many {
                    out.extend_from_slice(segment);
                }
                out.freeze()
            }
        }
    }

    /// Message built from the raw payload, text validated as UTF-8.
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let payload = self.payload();
        match (self.framing, self.opcode) {
            (Framing::Hybi, Opcode::Binary) => Ok(Message::Binary(payload)),
            _ => String::from_utf8(payload.to_vec())
                .map(Message::Text)
                .map_err(|_| ProtocolError::InvalidUtf8),
        }
    }

    /// Clear payload and return to `Empty`, ready for the next message.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.len = 0;
        self.format = Format::Raw;
        self.state = FrameState::Empty;
        self.opcode = Opcode::Text;
        self.decoder.clear();
        self.current = None;
        self.control.clear();
        self.fragmented = false;
        self.legacy_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 16 * 1024 * 1024;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn wire(opcode: Opcode, fin: bool, data: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut header = FrameHeader::new(opcode, fin, data.len() as u64);
        let mut body = data.to_vec();
        if let Some(key) = mask {
            header = header.with_mask(key);
            Masker::new(key).apply(&mut body);
        }
        let mut out = header.encode().to_vec();
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn roundtrip_all_framings_and_lengths() {
        for framing in [Framing::Hybi, Framing::Legacy] {
            for role in [Role::Server, Role::Client] {
                for len in [0usize, 1, 125, 126, 65535, 65536, 3 * 1024 * 1024] {
                    let data = if framing == Framing::Legacy {
                        vec![b'x'; len]
                    } else {
                        payload(len)
                    };
                    let mut frame = DataFrame::new(framing, role, u64::MAX);
                    frame.set_opcode(Opcode::Binary);
                    frame.append(&data, false).unwrap();
                    frame.as_frame();
                    assert_eq!(frame.format(), Format::Framed);
                    frame.as_raw().unwrap();
                    assert_eq!(frame.format(), Format::Raw);
                    assert_eq!(&frame.payload()[..], &data[..], "{framing:?} {len}");
                }
            }
        }
    }

    #[test]
    fn as_frame_and_as_raw_are_idempotent() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        frame.append(b"hello", false).unwrap();
        frame.as_frame();
        let once = frame.payload();
        frame.as_frame();
        assert_eq!(frame.payload(), once);

        frame.as_raw().unwrap();
        let raw = frame.payload();
        frame.as_raw().unwrap();
        assert_eq!(frame.payload(), raw);
        assert_eq!(&raw[..], b"hello");
    }

    #[test]
    fn framed_frame_rejects_raw_append() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Server, MAX);
        frame.append(b"a", false).unwrap();
        frame.as_frame();
        assert_eq!(frame.append(b"b", false), Err(ProtocolError::AlreadyFramed));
    }

    #[test]
    fn server_frames_are_unmasked_client_frames_masked() {
        let message = Message::Text("Hello".into());
        let mut server = DataFrame::outbound(Framing::Hybi, Role::Server, &message);
        server.as_frame();
        assert_eq!(&server.payload()[..], b"\x81\x05Hello");

        let mut client = DataFrame::outbound(Framing::Hybi, Role::Client, &message);
        client.as_frame();
        let bytes = client.payload();
        assert_eq!(bytes[1], 0x80 | 5);
        assert_eq!(bytes.len(), 2 + 4 + 5);
    }

    #[test]
    fn masked_frame_unmasks_payload() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let bytes = wire(Opcode::Text, true, b"Hello", Some(key));
        assert_eq!(&bytes[..], &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);
        let mut frame = DataFrame::new(Framing::Hybi, Role::Server, MAX);
        assert_eq!(frame.append(&bytes, true).unwrap(), bytes.len());
        assert_eq!(frame.state(), FrameState::Complete);
        assert_eq!(frame.to_message().unwrap(), Message::Text("Hello".into()));
    }

    #[test]
    fn fragmentation_tolerance_every_split() {
        let data = payload(300);
        let bytes = wire(Opcode::Binary, true, &data, Some([1, 2, 3, 4]));

        let mut whole = DataFrame::new(Framing::Hybi, Role::Server, MAX);
        whole.append(&bytes, true).unwrap();
        assert_eq!(whole.state(), FrameState::Complete);

        for chunk in 1..=bytes.len() {
            let mut frame = DataFrame::new(Framing::Hybi, Role::Server, MAX);
            for piece in bytes.chunks(chunk) {
                assert_eq!(frame.append(piece, true).unwrap(), piece.len());
            }
            assert_eq!(frame.state(), whole.state(), "chunk {chunk}");
            assert_eq!(frame.payload(), whole.payload(), "chunk {chunk}");
        }

        for split in 0..=bytes.len() {
            let mut frame = DataFrame::new(Framing::Hybi, Role::Server, MAX);
            frame.append(&bytes[..split], true).unwrap();
            frame.append(&bytes[split..], true).unwrap();
            assert_eq!(frame.state(), FrameState::Complete, "split {split}");
            assert_eq!(&frame.payload()[..], &data[..]);
        }
    }

    #[test]
    fn legacy_fragmentation_tolerance() {
        let mut bytes = vec![LEGACY_START];
        bytes.extend_from_slice("héllo wörld".as_bytes());
        bytes.push(LEGACY_END);

        for split in 0..=bytes.len() {
            let mut frame = DataFrame::new(Framing::Legacy, Role::Server, MAX);
            frame.append(&bytes[..split], true).unwrap();
            if split < bytes.len() {
                assert_ne!(frame.state(), FrameState::Complete);
            }
            frame.append(&bytes[split..], true).unwrap();
            assert_eq!(frame.state(), FrameState::Complete, "split {split}");
            assert_eq!(
                frame.to_message().unwrap(),
                Message::Text("héllo wörld".into())
            );
        }
    }

    #[test]
    fn leftover_bytes_belong_to_next_message() {
        let mut bytes = wire(Opcode::Text, true, b"one", None);
        let first_len = bytes.len();
        bytes.extend(wire(Opcode::Text, true, b"two", None));

        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        let used = frame.append(&bytes, true).unwrap();
        assert_eq!(used, first_len);
        assert_eq!(frame.to_message().unwrap(), Message::Text("one".into()));
        assert_eq!(frame.append(&bytes[used..], true).unwrap(), 0);

        frame.reset();
        assert_eq!(frame.state(), FrameState::Empty);
        frame.append(&bytes[used..], true).unwrap();
        assert_eq!(frame.to_message().unwrap(), Message::Text("two".into()));
    }

    #[test]
    fn continuation_frames_assemble_one_message() {
        let mut bytes = wire(Opcode::Text, false, b"Hel", Some([1, 2, 3, 4]));
        bytes.extend(wire(Opcode::Continuation, false, b"lo ", Some([5, 6, 7, 8])));
        bytes.extend(wire(Opcode::Continuation, true, b"there", Some([9, 9, 9, 9])));

        let mut frame = DataFrame::new(Framing::Hybi, Role::Server, MAX);
        assert_eq!(frame.append(&bytes, true).unwrap(), bytes.len());
        assert_eq!(frame.state(), FrameState::Complete);
        assert_eq!(frame.segments().len(), 3);
        assert_eq!(frame.to_message().unwrap(), Message::Text("Hello there".into()));
    }

    #[test]
    fn ping_inside_fragmented_message_keeps_message() {
        let first = wire(Opcode::Binary, false, b"ab", None);
        let ping = wire(Opcode::Ping, true, b"p", None);
        let last = wire(Opcode::Continuation, true, b"cd", None);

        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        frame.append(&first, true).unwrap();
        assert_eq!(frame.state(), FrameState::Receiving);
        frame.append(&ping, true).unwrap();
        assert_eq!(frame.state(), FrameState::Ping);
        assert_eq!(frame.control_payload(), b"p");
        frame.finish_control();
        assert_eq!(frame.state(), FrameState::Receiving);
        frame.append(&last, true).unwrap();
        assert_eq!(frame.state(), FrameState::Complete);
        assert_eq!(
            frame.to_message().unwrap(),
            Message::Binary(Bytes::from_static(b"abcd"))
        );
    }

    #[test]
    fn control_states() {
        for (opcode, state) in [
            (Opcode::Close, FrameState::Closed),
            (Opcode::Ping, FrameState::Ping),
            (Opcode::Pong, FrameState::Pong),
        ] {
            let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
            frame.append(&wire(opcode, true, &[], None), true).unwrap();
            assert_eq!(frame.state(), state);
            frame.finish_control();
            assert_eq!(frame.state(), FrameState::Empty);
        }
    }

    #[test]
    fn sequencing_errors() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        assert_eq!(
            frame.append(&wire(Opcode::Continuation, true, b"x", None), true),
            Err(ProtocolError::UnexpectedContinuation)
        );

        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        frame.append(&wire(Opcode::Text, false, b"x", None), true).unwrap();
        assert_eq!(
            frame.append(&wire(Opcode::Text, true, b"y", None), true),
            Err(ProtocolError::MessageInterleaved)
        );
    }

    #[test]
    fn declared_length_over_cap_rejected_before_payload() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, 100);
        let header = FrameHeader::new(Opcode::Binary, true, 101).encode();
        assert_eq!(
            frame.append(&header, true),
            Err(ProtocolError::FrameTooLarge { size: 101, max: 100 })
        );
        assert!(frame.is_empty());
        assert!(frame.segments().is_empty());
    }

    #[test]
    fn accumulated_length_over_cap_rejected() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, 100);
        frame.append(&wire(Opcode::Binary, false, &[0; 60], None), true).unwrap();
        assert!(matches!(
            frame.append(&wire(Opcode::Continuation, true, &[0; 60], None), true),
            Err(ProtocolError::FrameTooLarge { size: 120, .. })
        ));
        assert_eq!(frame.len(), 60);

        let mut legacy = DataFrame::new(Framing::Legacy, Role::Server, 4);
        legacy.append(&[LEGACY_START, b'a', b'b'], true).unwrap();
        assert!(legacy.append(b"cde", true).is_err());
        assert_eq!(legacy.len(), 2);
    }

    #[test]
    fn legacy_closing_handshake() {
        let mut frame = DataFrame::new(Framing::Legacy, Role::Server, MAX);
        assert_eq!(frame.append(&[LEGACY_END, LEGACY_START], true).unwrap(), 2);
        assert_eq!(frame.state(), FrameState::Closed);
    }

    #[test]
    fn legacy_rejects_garbage_start() {
        let mut frame = DataFrame::new(Framing::Legacy, Role::Server, MAX);
        assert_eq!(
            frame.append(b"abc", true),
            Err(ProtocolError::LegacyFrameStart)
        );
    }

    #[test]
    fn invalid_utf8_text_is_protocol_error() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        frame.append(&wire(Opcode::Text, true, &[0xFF, 0xFE], None), true).unwrap();
        assert_eq!(frame.to_message(), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn server_rejects_unmasked_client_frames() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Server, MAX);
        assert_eq!(
            frame.append(b"\x81\x02hi", true),
            Err(ProtocolError::MaskMismatch { masked: false })
        );
        assert!(frame.is_empty());
    }

    #[test]
    fn client_rejects_masked_server_frames() {
        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        let bytes = wire(Opcode::Text, true, b"hi", Some([1, 2, 3, 4]));
        assert_eq!(
            frame.append(&bytes, true),
            Err(ProtocolError::MaskMismatch { masked: true })
        );

        let mut frame = DataFrame::new(Framing::Hybi, Role::Client, MAX);
        frame.append(&wire(Opcode::Text, true, b"hi", None), true).unwrap();
        assert_eq!(frame.to_message().unwrap(), Message::Text("hi".into()));
    }
}
