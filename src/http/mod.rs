//! Minimal HTTP head parsing for the upgrade handshake.
//!
//! Only the request/status line and header fields are read; bodies are left
//! to the caller (the legacy handshake's 8-byte challenge follows the head).

use crate::types::Protocol;
use std::collections::HashMap;

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Offset just past the blank line ending an HTTP head, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_END.len())
        .position(|w| w == HEAD_END)
        .map(|i| i + HEAD_END.len())
}

/// Header fields with case-insensitive lookup. Repeated fields are joined
/// with `", "`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    map: HashMap<String, String>,
}

impl Fields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.map
            .entry(name.to_ascii_lowercase())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// Comma separated tokens of a field, trimmed, empties dropped.
    pub fn tokens(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a comma separated field contains `token` (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name)
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Option<Self> {
        let mut fields = Self::default();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':')?;
            fields.insert(name.trim(), value.trim());
        }
        Some(fields)
    }
}

/// A parsed upgrade request head.
#[derive(Clone, Debug, Default)]
pub struct RequestHeader {
    pub method: String,
    pub path: String,
    /// `None` when the request is malformed or is not a WebSocket upgrade
    /// this engine speaks.
    pub protocol: Option<Protocol>,
    pub cookies: Vec<(String, String)>,
    pub fields: Fields,
}

impl RequestHeader {
    /// Parse a request head. Never fails: malformed input yields a header
    /// with `protocol == None`.
    pub fn parse(buf: &[u8]) -> Self {
        let end = find_head_end(buf).unwrap_or(buf.len());
        let Ok(text) = std::str::from_utf8(&buf[..end]) else {
            return Self::default();
        };
        let mut lines = text.split("\r\n");
        let Some((method, path)) = lines.next().and_then(parse_request_line) else {
            return Self::default();
        };
        let Some(fields) = Fields::parse_lines(lines) else {
            return Self::default();
        };

        let cookies = fields
            .get("Cookie")
            .map(|c| {
                c.split(';')
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let protocol = classify(&method, &fields);
        Self {
            method,
            path,
            protocol,
            cookies,
            fields,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }
}

fn parse_request_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/") || parts.next().is_some() {
        return None;
    }
    Some((method.to_string(), path.to_string()))
}

fn classify(method: &str, fields: &Fields) -> Option<Protocol> {
    if !method.eq_ignore_ascii_case("GET") {
        return None;
    }
    if fields.contains("Sec-WebSocket-Key1") && fields.contains("Sec-WebSocket-Key2") {
        return Some(Protocol::Legacy);
    }
    if !fields.contains("Sec-WebSocket-Key") {
        return None;
    }
    let version = fields.get("Sec-WebSocket-Version")?.trim().parse().ok()?;
    Protocol::from_version(version)
}

/// A parsed response head (client side of the handshake).
#[derive(Clone, Debug, Default)]
pub struct ResponseHeader {
    pub status: u16,
    pub reason: String,
    pub fields: Fields,
}

impl ResponseHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let end = find_head_end(buf)?;
        let text = std::str::from_utf8(&buf[..end]).ok()?;
        let mut lines = text.split("\r\n");
        let status_line = lines.next()?;
        let mut parts = status_line.splitn(3, ' ');
        if !parts.next()?.starts_with("HTTP/") {
            return None;
        }
        let status = parts.next()?.parse().ok()?;
        let reason = parts.next().unwrap_or_default().to_string();
        let fields = Fields::parse_lines(lines)?;
        Some(Self {
            status,
            reason,
            fields,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }
}
