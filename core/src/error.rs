//! Error types for the transfer engine.
//!
//! # Design
//! Transfer failures never cross a thread boundary as `Err` values. A worker
//! turns every failure into a `TransferError` and delivers it as the terminal
//! `Event::Error` of the request. `ErrorCode` keeps the short machine-readable
//! code the application layer switches on (`busy`, `no_length`, a numeric
//! HTTP status, ...); the message is for humans only.
//!
//! Errors that happen on the caller's thread (bad configuration, engine
//! start-up, misuse of a request handle) are ordinary `Result` errors.

use std::borrow::Cow;
use std::fmt;
use std::io;

/// Short code carried by every terminal error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request URL failed to parse.
    Url,
    /// The request was queued twice.
    AlreadyQueued,
    /// TLS was requested but the engine has no TLS configuration.
    NoTls,
    /// Socket connect or TLS handshake failure.
    ConnFail,
    /// Writing to the socket failed.
    SendFail,
    /// Incremental request without a usable `Content-Length`.
    SetupFail,
    /// The caller did not supply the expected command in time.
    CommandTimeout,
    /// The caller supplied the wrong command for the current state.
    UnexpectedCommand,
    /// An incremental push carried no bytes.
    EmptyData,
    /// An incremental push went past the declared `Content-Length`.
    TooMuchData,
    /// Reading from the socket failed.
    NoResponse,
    /// The status line could not be parsed.
    InvalidStatus,
    /// The server answered `500 Server Too Busy`.
    Busy,
    /// Any other non-success HTTP status.
    Status(u16),
    /// A response header line was malformed.
    InvalidHeader,
    /// The response carried no `Content-Length`.
    NoLength,
    /// The response is larger than the configured ceiling.
    TooBig,
    /// Fewer body bytes arrived than were declared.
    ShortResponse,
    /// The request was aborted through its `AbortHandle`.
    Aborted,
    /// The engine was shut down before the request could run.
    Shutdown,
}

impl ErrorCode {
    /// The wire-stable code string handed to the application layer.
    pub fn as_str(&self) -> Cow<'static, str> {
        let code = match self {
            ErrorCode::Url => "url",
            ErrorCode::AlreadyQueued => "already_queued",
            ErrorCode::NoTls => "no_tls",
            ErrorCode::ConnFail => "conn_fail",
            ErrorCode::SendFail => "send_fail",
            ErrorCode::SetupFail => "setup_fail",
            ErrorCode::CommandTimeout => "command_timeout",
            ErrorCode::UnexpectedCommand => "unexpected_command",
            ErrorCode::EmptyData => "empty_data",
            ErrorCode::TooMuchData => "too_much_data",
            ErrorCode::NoResponse => "no_response",
            ErrorCode::InvalidStatus => "invalid_status",
            ErrorCode::Busy => "busy",
            ErrorCode::Status(status) => return Cow::Owned(status.to_string()),
            ErrorCode::InvalidHeader => "invalid_header",
            ErrorCode::NoLength => "no_length",
            ErrorCode::TooBig => "too_big",
            ErrorCode::ShortResponse => "short_response",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Shutdown => "shutdown",
        };
        Cow::Borrowed(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// A terminal transfer failure: a short code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TransferError {
    pub code: ErrorCode,
    pub message: String,
}

impl TransferError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build an error whose message is `prefix` followed by the cause.
    pub(crate) fn caused_by(code: ErrorCode, prefix: &str, cause: impl fmt::Display) -> Self {
        Self::new(code, format!("{prefix}{cause}"))
    }
}

/// Malformed wire input found by the status-line and header parsers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed status line: {0:?}")]
    StatusLine(String),

    #[error("malformed header line: {0:?}")]
    HeaderLine(String),

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("line is not valid UTF-8")]
    NotUtf8,
}

/// Reasons a URL is rejected by `Target::parse`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("missing \"://\" separator")]
    MissingScheme,

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid host {0:?}")]
    InvalidHost(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid path {0:?}")]
    InvalidPath(String),
}

/// Misuse of a `Request` handle detected on the caller's thread.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("request is not in incremental mode")]
    NotIncremental,

    #[error("request has not been queued")]
    NotQueued,

    #[error("request is in incremental mode")]
    NotBuffered,

    #[error("request cannot be modified after queueing")]
    AlreadyQueued,

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {0:?}")]
    InvalidHeaderValue(String),
}

/// Errors raised while loading or validating an `EngineConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while starting or stopping an `Engine`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("manager thread panicked")]
    ManagerPanicked,
}

/// Errors raised while building the TLS client configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsSetupError {
    #[error("cannot read trust roots: {0}")]
    Roots(#[from] io::Error),

    #[error("invalid pinned key {index}: {reason}")]
    PinnedKey { index: usize, reason: String },

    #[error("tls configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("cannot build certificate verifier: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
}
