//! Asynchronous HTTP/1.1 transfer engine for a cloud storage backend.
//!
//! # Overview
//! Callers build a `Request`, queue it on an `Engine` and receive results as
//! `Event`s on the request's own channel instead of through a blocking
//! return. Each queued request runs on a dedicated worker thread that drives
//! the HTTP exchange over plain TCP or pinned TLS.
//!
//! # Design
//! - `Engine` owns one manager thread. The manager owns the worker registry
//!   and is the only thread that mutates it.
//! - Queueing moves an immutable snapshot of the request to the engine; the
//!   caller keeps the `Request` handle for events, commands and abort.
//! - Buffered mode hands the whole response over in `Event::Complete`.
//!   Incremental mode paces both bodies with `PullBody`/`PushBody` and
//!   `RecvHeaders`/`RecvBody`/`Continue`.
//! - Failures never unwind across threads; every exchange ends in exactly
//!   one terminal `Complete` or `Error` event.
//! - `RunLoop` delivers events to callbacks on the caller's thread.

pub mod abort;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
mod exchange;
pub mod http;
mod manager;
pub mod request;
pub mod runloop;
pub mod tls;
pub mod types;
pub mod url;
mod worker;

pub use abort::AbortHandle;
pub use config::{EngineConfig, TlsConfig};
pub use engine::Engine;
pub use error::{
    ConfigError, EngineError, ErrorCode, ParseError, RequestError, TlsSetupError, TransferError,
    UrlError,
};
pub use http::{HeaderMap, Response, StatusLine};
pub use request::{Request, RequestId};
pub use runloop::RunLoop;
pub use tls::{Connector, KeyVerifier, PinnedKeys};
pub use types::{Command, Event, Mode};
pub use url::Target;
