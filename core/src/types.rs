//! Messages exchanged between a caller and the worker running its request.
//!
//! # Design
//! Events flow from the engine to the caller, commands from the caller to the
//! engine. Both travel over per-request FIFO channels, so the order in which
//! a worker produces events is the order the caller observes them. Commands
//! only exist in incremental mode, where the caller paces the body transfer.

use crate::error::TransferError;
use crate::http::{HeaderMap, Response};

/// How request and response bodies are transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// The request body is supplied up front and the response body is
    /// delivered whole with `Event::Complete`.
    #[default]
    Buffered,
    /// Bodies move in caller-paced chunks via `PullBody`/`PushBody` on the
    /// way out and `RecvHeaders`/`RecvBody`/`Continue` on the way in.
    Incremental,
}

/// The request body as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Buffered(Vec<u8>),
    Incremental,
}

impl Body {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Buffered => Body::Buffered(Vec::new()),
            Mode::Incremental => Body::Incremental,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Body::Buffered(_) => Mode::Buffered,
            Body::Incremental => Mode::Incremental,
        }
    }
}

/// Caller-to-engine command for incremental transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acknowledge `RecvHeaders` or `RecvBody` and let the engine read on.
    Continue,
    /// The next request-body chunk, answering `PullBody`.
    PushBody(Vec<u8>),
}

/// Engine-to-caller notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The engine is ready for the next request-body chunk; `remaining` is
    /// the number of bytes still owed under the declared `Content-Length`.
    PullBody { remaining: u64 },
    /// Response headers are in. No body byte is read before `Continue`.
    RecvHeaders { status: u16, headers: HeaderMap },
    /// One response-body chunk starting at `offset`.
    RecvBody { offset: u64, data: Vec<u8> },
    /// Terminal success.
    Complete(Response),
    /// Terminal failure.
    Error(TransferError),
}

impl Event {
    /// `Complete` and `Error` are the last event a request ever receives.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete(_) | Event::Error(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::PullBody { .. } => "pull_body",
            Event::RecvHeaders { .. } => "recv_headers",
            Event::RecvBody { .. } => "recv_body",
            Event::Complete(_) => "complete",
            Event::Error(_) => "error",
        }
    }
}
