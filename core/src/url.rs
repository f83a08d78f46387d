//! Request target parsing.
//!
//! Accepts the narrow URL grammar the storage backend uses:
//! `http(s)://host[:port][/path]`. Anything else is rejected rather than
//! guessed at, so a request either has a complete `Target` or is invalid.

use std::fmt;

use crate::error::UrlError;

/// Where a request goes: the `(secure, host, port)` connection identity plus
/// the path written into the request line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Target {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let (scheme, rest) = url.split_once("://").ok_or(UrlError::MissingScheme)?;

        let (secure, default_port) = if scheme.eq_ignore_ascii_case("http") {
            (false, 80)
        } else if scheme.eq_ignore_ascii_case("https") {
            (true, 443)
        } else {
            return Err(UrlError::UnsupportedScheme(scheme.to_string()));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (authority, default_port),
        };

        if host.is_empty()
            || !host
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        {
            return Err(UrlError::InvalidHost(host.to_string()));
        }

        if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(UrlError::InvalidPath(path.to_string()));
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Whether a connection opened for `self` can serve `other`.
    pub fn matches(&self, other: &Target) -> bool {
        self.secure == other.secure && self.port == other.port && self.host == other.host
    }

    pub fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    /// Value for the `Host` header; the port is only spelled out when it is
    /// not the scheme default.
    pub fn authority(&self) -> String {
        if self.port == self.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

fn parse_port(port: &str) -> Result<u16, UrlError> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UrlError::InvalidPort(port.to_string()));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(UrlError::InvalidPort(port.to_string())),
        Ok(p) => Ok(p),
    }
}
