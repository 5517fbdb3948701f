//! Opening handshake for the three protocol variants: request validation,
//! acceptance tokens, subprotocol selection and response rendering on the
//! server side; request building and response validation on the client side.

pub mod hybi;
pub mod legacy;

use crate::error::HandshakeError;
use crate::http::{RequestHeader, ResponseHeader};
use crate::types::Protocol;
use bytes::Bytes;

pub use legacy::{CHALLENGE_LEN, RESPONSE_LEN};

/// Key material sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeKey {
    Hybi {
        key: String,
    },
    Legacy {
        key1: String,
        key2: String,
        challenge: [u8; CHALLENGE_LEN],
    },
}

/// Server proof of having read the client's key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptToken {
    /// `Sec-WebSocket-Accept` value.
    Hybi(String),
    /// MD5 digest sent after the response head.
    Legacy([u8; RESPONSE_LEN]),
}

/// The client half of a negotiation. Built from a parsed request (server
/// side) or from configuration (client side); never mutated afterwards.
#[derive(Clone, Debug)]
pub struct ClientHandshake {
    pub protocol: Protocol,
    pub path: String,
    pub host: String,
    pub origin: Option<String>,
    pub key: HandshakeKey,
    pub subprotocols: Vec<String>,
    pub cookies: Vec<(String, String)>,
}

impl ClientHandshake {
    /// Outbound handshake with freshly generated key material.
    pub fn new(protocol: Protocol, path: impl Into<String>, host: impl Into<String>) -> Self {
        let key = match protocol {
            Protocol::Legacy => HandshakeKey::Legacy {
                key1: legacy::generate_key(),
                key2: legacy::generate_key(),
                challenge: legacy::generate_challenge(),
            },
            Protocol::Hybi10 | Protocol::Rfc6455 => HandshakeKey::Hybi {
                key: hybi::generate_key(),
            },
        };
        Self {
            protocol,
            path: path.into(),
            host: host.into(),
            origin: None,
            key,
            subprotocols: Vec::new(),
            cookies: Vec::new(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_subprotocols(mut self, subprotocols: Vec<String>) -> Self {
        self.subprotocols = subprotocols;
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Extract the handshake from a parsed request. `body` holds the bytes
    /// received after the request head (the legacy challenge).
    pub fn from_request(req: &RequestHeader, body: &[u8]) -> Result<Self, HandshakeError> {
        let protocol = req.protocol.ok_or(HandshakeError::UnsupportedVersion)?;
        let fields = &req.fields;
        let host = fields
            .get("Host")
            .ok_or(HandshakeError::MissingField("Host"))?
            .to_string();
        if !fields.has_token("Upgrade", "websocket") {
            return Err(HandshakeError::MissingField("Upgrade"));
        }
        if !fields.has_token("Connection", "upgrade") {
            return Err(HandshakeError::MissingField("Connection"));
        }

        let (key, origin) = match protocol {
            Protocol::Legacy => {
                let key1 = fields
                    .get("Sec-WebSocket-Key1")
                    .ok_or(HandshakeError::MissingField("Sec-WebSocket-Key1"))?;
                let key2 = fields
                    .get("Sec-WebSocket-Key2")
                    .ok_or(HandshakeError::MissingField("Sec-WebSocket-Key2"))?;
                let challenge: [u8; CHALLENGE_LEN] = body
                    .get(..CHALLENGE_LEN)
                    .and_then(|c| c.try_into().ok())
                    .ok_or(HandshakeError::MissingChallenge)?;
                let key = HandshakeKey::Legacy {
                    key1: key1.to_string(),
                    key2: key2.to_string(),
                    challenge,
                };
                (key, fields.get("Origin").map(str::to_string))
            }
            Protocol::Hybi10 | Protocol::Rfc6455 => {
                let key = fields
                    .get("Sec-WebSocket-Key")
                    .ok_or(HandshakeError::MissingField("Sec-WebSocket-Key"))?;
                let key = HandshakeKey::Hybi {
                    key: key.trim().to_string(),
                };
                (key, hybi::request_origin(protocol, fields))
            }
        };

        Ok(Self {
            protocol,
            path: req.path.clone(),
            host,
            origin,
            key,
            subprotocols: fields.tokens("Sec-WebSocket-Protocol"),
            cookies: req.cookies.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), HandshakeError> {
        if self.host.is_empty() {
            return Err(HandshakeError::MissingField("Host"));
        }
        match (&self.key, self.protocol) {
            (HandshakeKey::Legacy { key1, key2, .. }, Protocol::Legacy) => {
                legacy::key_number(key1, "Sec-WebSocket-Key1")?;
                legacy::key_number(key2, "Sec-WebSocket-Key2")?;
                Ok(())
            }
            (HandshakeKey::Hybi { key }, Protocol::Hybi10 | Protocol::Rfc6455) => {
                if hybi::is_valid_key(key) {
                    Ok(())
                } else {
                    Err(HandshakeError::InvalidKey("Sec-WebSocket-Key"))
                }
            }
            _ => Err(HandshakeError::UnsupportedVersion),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// The token a conforming server answers this handshake with.
    pub fn accept_token(&self) -> Result<AcceptToken, HandshakeError> {
        match &self.key {
            HandshakeKey::Hybi { key } => Ok(AcceptToken::Hybi(hybi::accept_token(key))),
            HandshakeKey::Legacy {
                key1,
                key2,
                challenge,
            } => Ok(AcceptToken::Legacy(legacy::challenge_response(
                key1, key2, challenge,
            )?)),
        }
    }

    /// Render the upgrade request (legacy requests carry the challenge).
    pub fn to_request(&self) -> Bytes {
        match self.protocol {
            Protocol::Legacy => legacy::build_request(self),
            Protocol::Hybi10 | Protocol::Rfc6455 => hybi::build_request(self),
        }
    }

    /// Check the server's answer. `body` holds bytes after the response
    /// head. Returns the subprotocol the server picked, if any.
    pub fn validate_response(
        &self,
        head: &ResponseHeader,
        body: &[u8],
    ) -> Result<Option<String>, HandshakeError> {
        if head.status != 101 {
            return Err(HandshakeError::BadStatus(head.status));
        }
        if !head.fields.has_token("Upgrade", "websocket") {
            return Err(HandshakeError::MissingField("Upgrade"));
        }
        match self.accept_token()? {
            AcceptToken::Hybi(expected) => {
                let got = head
                    .get("Sec-WebSocket-Accept")
                    .ok_or(HandshakeError::MissingField("Sec-WebSocket-Accept"))?;
                if got.trim() != expected {
                    return Err(HandshakeError::AcceptMismatch);
                }
            }
            AcceptToken::Legacy(expected) => {
                if body.get(..RESPONSE_LEN) != Some(&expected[..]) {
                    return Err(HandshakeError::AcceptMismatch);
                }
            }
        }
        match head.get("Sec-WebSocket-Protocol").map(str::trim) {
            None | Some("") => Ok(None),
            Some(chosen) if self.subprotocols.iter().any(|s| s == chosen) => {
                Ok(Some(chosen.to_string()))
            }
            Some(_) => Err(HandshakeError::NoSubprotocol),
        }
    }

    /// Bytes of the server response that follow its head.
    pub fn response_body_len(&self) -> usize {
        match self.protocol {
            Protocol::Legacy => RESPONSE_LEN,
            Protocol::Hybi10 | Protocol::Rfc6455 => 0,
        }
    }
}

pub(crate) fn push_common_request_fields(head: &mut String, hs: &ClientHandshake) {
    if !hs.subprotocols.is_empty() {
        head.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            hs.subprotocols.join(", ")
        ));
    }
    if !hs.cookies.is_empty() {
        let cookies: Vec<String> = hs
            .cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        head.push_str(&format!("Cookie: {}\r\n", cookies.join("; ")));
    }
}

/// The server half of a negotiation.
#[derive(Clone, Debug)]
pub struct ServerHandshake {
    pub protocol: Protocol,
    pub accept: AcceptToken,
    pub origin: Option<String>,
    pub location: String,
    pub subprotocol: Option<String>,
}

impl ServerHandshake {
    pub fn to_response(&self) -> Bytes {
        match &self.accept {
            AcceptToken::Hybi(token) => hybi::build_response(self, token),
            AcceptToken::Legacy(answer) => legacy::build_response(self, answer),
        }
    }
}

/// Pick the first server-supported subprotocol the client also asked for.
/// A client asking for none gets none; a client whose list has no match
/// fails the handshake.
pub fn select_subprotocol(
    supported: &[String],
    requested: &[String],
) -> Result<Option<String>, HandshakeError> {
    if requested.is_empty() {
        return Ok(None);
    }
    supported
        .iter()
        .find(|s| requested.contains(s))
        .cloned()
        .map(Some)
        .ok_or(HandshakeError::NoSubprotocol)
}

/// Server-side acceptance rules.
#[derive(Clone, Debug, Default)]
pub struct HandshakePolicy {
    /// Allowed origins, scheme qualified (`http://example.com`). Empty allows any.
    pub origins: Vec<String>,
    /// Required `Host` value. `None` allows any.
    pub destination: Option<String>,
    /// Subprotocols in preference order.
    pub subprotocols: Vec<String>,
    /// Whether the listener is behind TLS (`wss://` locations).
    pub secure: bool,
}

impl HandshakePolicy {
    /// Validate an inbound request and produce both halves of the handshake.
    pub fn accept(
        &self,
        req: &RequestHeader,
        body: &[u8],
    ) -> Result<(ClientHandshake, ServerHandshake), HandshakeError> {
        let client = ClientHandshake::from_request(req, body)?;
        client.validate()?;
        self.check_origin(client.origin.as_deref())?;
        self.check_destination(&client.host)?;
        let subprotocol = select_subprotocol(&self.subprotocols, &client.subprotocols)?;

        let scheme = if self.secure { "wss" } else { "ws" };
        let server = ServerHandshake {
            protocol: client.protocol,
            accept: client.accept_token()?,
            origin: client.origin.clone(),
            location: format!("{}://{}{}", scheme, client.host, client.path),
            subprotocol,
        };
        Ok((client, server))
    }

    fn check_origin(&self, origin: Option<&str>) -> Result<(), HandshakeError> {
        if self.origins.is_empty() {
            return Ok(());
        }
        match origin {
            Some(o) if self.origins.iter().any(|allowed| allowed == o) => Ok(()),
            other => Err(HandshakeError::OriginRejected(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn check_destination(&self, host: &str) -> Result<(), HandshakeError> {
        match &self.destination {
            Some(dest) if dest != host => Err(HandshakeError::DestinationRejected(host.to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rfc_request(extra: &str) -> RequestHeader {
        let raw = format!(
            "GET /chat HTTP/1.1\r\nHost: server.example.com\r\nUpgrade: websocket\r\n\
             Connection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n{}\r\n",
            extra
        );
        RequestHeader::parse(raw.as_bytes())
    }

    #[test]
    fn subprotocol_first_server_match_wins() {
        assert_eq!(
            select_subprotocol(&strings(&["a", "b"]), &strings(&["b", "c"])),
            Ok(Some("b".to_string()))
        );
        assert_eq!(
            select_subprotocol(&strings(&["c", "b"]), &strings(&["b", "c"])),
            Ok(Some("c".to_string()))
        );
        assert_eq!(
            select_subprotocol(&strings(&["x"]), &strings(&["b", "c"])),
            Err(HandshakeError::NoSubprotocol)
        );
        assert_eq!(select_subprotocol(&strings(&["x"]), &[]), Ok(None));
    }

    #[test]
    fn rfc6455_accept_and_response() {
        let policy = HandshakePolicy::default();
        let (client, server) = policy.accept(&rfc_request(""), &[]).unwrap();
        assert_eq!(client.protocol, Protocol::Rfc6455);
        assert_eq!(
            server.accept,
            AcceptToken::Hybi("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".into())
        );
        let response = server.to_response();
        assert_eq!(
            &response[..],
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
        assert_eq!(server.location, "ws://server.example.com/chat");
    }

    #[test]
    fn negotiated_subprotocol_in_response() {
        let policy = HandshakePolicy {
            subprotocols: strings(&["a", "b"]),
            ..Default::default()
        };
        let (_, server) = policy
            .accept(&rfc_request("Sec-WebSocket-Protocol: b, c\r\n"), &[])
            .unwrap();
        assert_eq!(server.subprotocol.as_deref(), Some("b"));
        let text = String::from_utf8(server.to_response().to_vec()).unwrap();
        assert!(text.contains("Sec-WebSocket-Protocol: b\r\n"));

        let strict = HandshakePolicy {
            subprotocols: strings(&["x"]),
            ..Default::default()
        };
        assert!(matches!(
            strict.accept(&rfc_request("Sec-WebSocket-Protocol: b, c\r\n"), &[]),
            Err(HandshakeError::NoSubprotocol)
        ));
    }

    #[test]
    fn missing_fields_rejected() {
        let req = RequestHeader::parse(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        );
        assert!(matches!(
            HandshakePolicy::default().accept(&req, &[]),
            Err(HandshakeError::MissingField("Host"))
        ));

        let req = RequestHeader::parse(
            b"GET / HTTP/1.1\r\nHost: a\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        );
        assert!(matches!(
            HandshakePolicy::default().accept(&req, &[]),
            Err(HandshakeError::MissingField("Upgrade"))
        ));

        let req = RequestHeader::parse(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(matches!(
            HandshakePolicy::default().accept(&req, &[]),
            Err(HandshakeError::UnsupportedVersion)
        ));
    }

    #[test]
    fn origin_requires_exact_scheme_qualified_match() {
        let policy = HandshakePolicy {
            origins: strings(&["http://example.com"]),
            ..Default::default()
        };
        assert!(policy
            .accept(&rfc_request("Origin: http://example.com\r\n"), &[])
            .is_ok());
        assert!(matches!(
            policy.accept(&rfc_request("Origin: https://example.com\r\n"), &[]),
            Err(HandshakeError::OriginRejected(_))
        ));
        assert!(matches!(
            policy.accept(&rfc_request("Origin: http://EXAMPLE.com\r\n"), &[]),
            Err(HandshakeError::OriginRejected(_))
        ));
        assert!(matches!(
            policy.accept(&rfc_request(""), &[]),
            Err(HandshakeError::OriginRejected(_))
        ));

        let bare = HandshakePolicy {
            origins: strings(&["example.com"]),
            ..Default::default()
        };
        assert!(bare
            .accept(&rfc_request("Origin: http://example.com\r\n"), &[])
            .is_err());
    }

    #[test]
    fn destination_must_match_host() {
        let policy = HandshakePolicy {
            destination: Some("server.example.com".into()),
            ..Default::default()
        };
        assert!(policy.accept(&rfc_request(""), &[]).is_ok());
        let other = HandshakePolicy {
            destination: Some("other.example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            other.accept(&rfc_request(""), &[]),
            Err(HandshakeError::DestinationRejected(_))
        ));
    }

    #[test]
    fn legacy_server_response_carries_digest() {
        let req = RequestHeader::parse(
            b"GET /demo HTTP/1.1\r\nHost: example.com\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key2: 12998 5 Y3 1  .P00\r\nSec-WebSocket-Protocol: sample\r\n\
              Upgrade: WebSocket\r\nSec-WebSocket-Key1: 4 @1  46546xW%0l 1 5\r\n\
              Origin: http://example.com\r\n\r\n",
        );
        let policy = HandshakePolicy {
            subprotocols: strings(&["sample"]),
            ..Default::default()
        };
        assert!(matches!(
            policy.accept(&req, b"^n:d"),
            Err(HandshakeError::MissingChallenge)
        ));
        let (client, server) = policy.accept(&req, b"^n:ds[4U").unwrap();
        assert_eq!(client.protocol, Protocol::Legacy);
        let response = server.to_response();
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 101 WebSocket Protocol Handshake\r\n"));
        assert!(text.contains("Sec-WebSocket-Origin: http://example.com\r\n"));
        assert!(text.contains("Sec-WebSocket-Location: ws://example.com/demo\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: sample\r\n"));
        assert!(response.ends_with(b"\r\n\r\n8jKS'y:G*Co,Wxa-"));
    }

    #[test]
    fn hybi10_uses_sec_websocket_origin() {
        let req = RequestHeader::parse(
            b"GET / HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Origin: http://o\r\n\
              Sec-WebSocket-Version: 8\r\n\r\n",
        );
        let (client, server) = HandshakePolicy::default().accept(&req, &[]).unwrap();
        assert_eq!(client.protocol, Protocol::Hybi10);
        assert_eq!(client.origin.as_deref(), Some("http://o"));
        let text = String::from_utf8(server.to_response().to_vec()).unwrap();
        assert!(text.contains("Sec-WebSocket-Origin: http://o\r\n"));
    }

    #[test]
    fn client_request_roundtrips_through_server() {
        for protocol in Protocol::ALL {
            let client = ClientHandshake::new(protocol, "/room", "localhost:8080")
                .with_origin("http://localhost")
                .with_subprotocols(strings(&["chat"]))
                .with_cookie("sid", "42");
            assert!(client.is_valid(), "{protocol}");
            let request = client.to_request();
            let head_end = crate::http::find_head_end(&request).unwrap();
            let parsed = RequestHeader::parse(&request);
            assert_eq!(parsed.protocol, Some(protocol));
            assert_eq!(parsed.cookies, vec![("sid".to_string(), "42".to_string())]);

            let policy = HandshakePolicy {
                subprotocols: strings(&["chat"]),
                origins: strings(&["http://localhost"]),
                ..Default::default()
            };
            let (_, server) = policy.accept(&parsed, &request[head_end..]).unwrap();
            let response = server.to_response();
            let resp_end = crate::http::find_head_end(&response).unwrap();
            let head = ResponseHeader::parse(&response).unwrap();
            assert_eq!(
                client.validate_response(&head, &response[resp_end..]),
                Ok(Some("chat".to_string()))
            );
            assert_eq!(response.len() - resp_end, client.response_body_len());
        }
    }

    #[test]
    fn client_rejects_bad_responses() {
        let client = ClientHandshake::new(Protocol::Rfc6455, "/", "h");
        let wrong = ResponseHeader::parse(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: nope\r\n\r\n",
        )
        .unwrap();
        assert_eq!(
            client.validate_response(&wrong, &[]),
            Err(HandshakeError::AcceptMismatch)
        );
        let forbidden = ResponseHeader::parse(b"HTTP/1.1 403 Forbidden\r\n\r\n").unwrap();
        assert_eq!(
            client.validate_response(&forbidden, &[]),
            Err(HandshakeError::BadStatus(403))
        );
    }
}
