//! HTTP/1.1 wire types and the line grammar used on the receive path.
//!
//! # Design
//! The engine speaks a fixed subset of HTTP/1.1: one status line, `name:
//! value` header lines and a `Content-Length` delimited body. Parsers here
//! work on one already-read line at a time and are total: any input yields
//! either a value or a typed `ParseError`.
//!
//! `HeaderMap` keeps insertion order so the request head the engine writes is
//! deterministic, while lookups and upserts ignore ASCII case.

use crate::error::{ErrorCode, ParseError, TransferError};

/// Ordered header multimap with case-insensitive, last-write-wins keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`. A replaced entry keeps its position but
    /// takes the new spelling of the name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpVersion {
    pub major: u16,
    pub minor: u16,
}

/// A parsed `HTTP/<major>.<minor> <code> <reason>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: HttpVersion,
    pub code: u16,
    pub reason: String,
}

pub const BUSY_REASON: &str = "Server Too Busy";

/// Parse a status line. The reason phrase must be non-empty.
pub fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    let invalid = || ParseError::StatusLine(line.to_string());

    let rest = line.strip_prefix("HTTP/").ok_or_else(invalid)?;
    let (version, rest) = rest.split_once(' ').ok_or_else(invalid)?;
    let (code, reason) = rest.split_once(' ').ok_or_else(invalid)?;

    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    let version = HttpVersion {
        major: parse_digits(major).ok_or_else(invalid)?,
        minor: parse_digits(minor).ok_or_else(invalid)?,
    };
    let code = parse_digits(code).ok_or_else(invalid)?;

    if reason.is_empty() {
        return Err(invalid());
    }

    Ok(StatusLine {
        version,
        code,
        reason: reason.to_string(),
    })
}

/// Parse a `name: value` header line into a lower-cased, trimmed name and a
/// trimmed value.
pub fn parse_header_line(line: &str) -> Result<(String, String), ParseError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ParseError::HeaderLine(line.to_string()))?;

    let name = name.trim();
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c.is_control()) {
        return Err(ParseError::HeaderLine(line.to_string()));
    }

    Ok((name.to_ascii_lowercase(), value.trim().to_string()))
}

/// Whether `s` is an RFC 9110 token, as required for methods and header
/// names.
pub fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Whether `s` can be sent as a header value: no control characters other
/// than horizontal tab.
pub fn is_header_value(s: &str) -> bool {
    !s.chars().any(|c| c.is_control() && c != '\t')
}

/// Parse a `Content-Length` value. Only plain decimal digits are accepted.
pub fn parse_content_length(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_digits(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Decide whether a status line lets the exchange continue.
///
/// Redirects are reported as success and are never followed.
pub fn classify_status(status: &StatusLine) -> Result<(), TransferError> {
    match status.code {
        200 | 201 | 301 | 302 => Ok(()),
        500 if status.reason == BUSY_REASON => Err(TransferError::new(
            ErrorCode::Busy,
            format!("500 {BUSY_REASON}"),
        )),
        code => Err(TransferError::new(
            ErrorCode::Status(code),
            format!("Server returned {code}: {}", status.reason),
        )),
    }
}

/// A fully received response, as carried by `Event::Complete`.
///
/// In incremental mode the body arrives through `Event::RecvBody` chunks and
/// `body` is left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
