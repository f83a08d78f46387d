//! The caller-side request handle.
//!
//! # Design
//! A `Request` is built and configured on the caller's thread. Queueing it
//! hands an immutable `Exchange` snapshot to the engine; the handle stays
//! with the caller as the endpoint of two channels:
//!
//! - events (engine -> caller), read with `recv_event` and friends or through
//!   a `RunLoop`;
//! - commands (caller -> engine), written by `push_body` and `proceed` in
//!   incremental mode.
//!
//! The handle keeps its own event sender so failures detected while queueing
//! (`url`, `already_queued`, `shutdown`) land on the same channel as every
//! other event.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use uuid::Uuid;

use crate::abort::AbortHandle;
use crate::error::{ErrorCode, RequestError, TransferError, UrlError};
use crate::exchange::Exchange;
use crate::http::{self, HeaderMap};
use crate::types::{Body, Command, Event, Mode};
use crate::url::Target;

/// Identifies a request in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub struct Request {
    id: RequestId,
    method: String,
    url: String,
    target: Result<Target, UrlError>,
    valid_method: bool,
    headers: HeaderMap,
    body: Body,
    queued: bool,
    finished: bool,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    commands_tx: Sender<Command>,
    commands_rx: Option<Receiver<Command>>,
    abort: AbortHandle,
}

impl Request {
    /// Create a request. An unparsable `url` or a `method` that is not a
    /// token does not fail here: the request is marked invalid and queueing
    /// it yields a `url` error event.
    pub fn new(method: impl Into<String>, url: impl Into<String>, mode: Mode) -> Self {
        let method = method.into();
        let url = url.into();
        let id = RequestId::new();
        let target = Target::parse(&url);
        if let Err(err) = &target {
            tracing::debug!(request = %id, %url, error = %err, "invalid request url");
        }
        let valid_method = http::is_token(&method);
        if !valid_method {
            tracing::debug!(request = %id, %method, "invalid request method");
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();

        Self {
            id,
            method,
            url,
            target,
            valid_method,
            headers: HeaderMap::new(),
            body: Body::for_mode(mode),
            queued: false,
            finished: false,
            events_tx,
            events_rx,
            commands_tx,
            commands_rx: Some(commands_rx),
            abort: AbortHandle::new(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mode(&self) -> Mode {
        self.body.mode()
    }

    /// `None` when the URL failed to parse.
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref().ok()
    }

    pub fn is_invalid(&self) -> bool {
        self.target.is_err() || !self.valid_method
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Insert or replace a request header (names compare case-insensitively).
    /// The name must be a token and the value free of control characters.
    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), RequestError> {
        if self.queued {
            return Err(RequestError::AlreadyQueued);
        }
        let (name, value) = (name.into(), value.into());
        if !http::is_token(&name) {
            return Err(RequestError::InvalidHeaderName(name));
        }
        if !http::is_header_value(&value) {
            return Err(RequestError::InvalidHeaderValue(name));
        }
        self.headers.insert(name, value);
        Ok(())
    }

    /// Replace the body of a buffered request.
    pub fn set_body(&mut self, data: impl Into<Vec<u8>>) -> Result<(), RequestError> {
        if self.queued {
            return Err(RequestError::AlreadyQueued);
        }
        match &mut self.body {
            Body::Buffered(body) => {
                *body = data.into();
                Ok(())
            }
            Body::Incremental => Err(RequestError::NotBuffered),
        }
    }

    /// Send the next body chunk; the answer to `Event::PullBody`.
    pub fn push_body(&self, data: impl Into<Vec<u8>>) -> Result<(), RequestError> {
        self.send_command(Command::PushBody(data.into()))
    }

    /// The `continue` command; the answer to `RecvHeaders` and `RecvBody`.
    pub fn proceed(&self) -> Result<(), RequestError> {
        self.send_command(Command::Continue)
    }

    fn send_command(&self, command: Command) -> Result<(), RequestError> {
        if self.mode() != Mode::Incremental {
            return Err(RequestError::NotIncremental);
        }
        if !self.queued {
            return Err(RequestError::NotQueued);
        }
        if self.commands_tx.send(command).is_err() {
            tracing::trace!(request = %self.id, "command dropped, exchange is over");
        }
        Ok(())
    }

    /// Close the request's connection and cancel its pending I/O.
    pub fn abort(&self) {
        tracing::debug!(request = %self.id, "abort requested");
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Block until the next event. Returns `None` for a request that was
    /// never queued, and once the terminal event has been consumed and no
    /// further event is pending.
    pub fn recv_event(&mut self) -> Option<Event> {
        if !self.queued {
            return None;
        }
        let event = if self.finished {
            self.events_rx.try_recv().ok()?
        } else {
            self.events_rx.recv().ok()?
        };
        Some(self.observe(event))
    }

    pub fn recv_event_timeout(&mut self, timeout: Duration) -> Option<Event> {
        if !self.queued {
            return None;
        }
        let event = if self.finished {
            self.events_rx.try_recv().ok()?
        } else {
            self.events_rx.recv_timeout(timeout).ok()?
        };
        Some(self.observe(event))
    }

    pub fn try_recv_event(&mut self) -> Option<Event> {
        let event = self.events_rx.try_recv().ok()?;
        Some(self.observe(event))
    }

    /// Whether the terminal event has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn observe(&mut self, event: Event) -> Event {
        if event.is_terminal() {
            self.finished = true;
        }
        event
    }

    pub(crate) fn events(&self) -> &Receiver<Event> {
        &self.events_rx
    }

    /// Queued and still waiting for its terminal event; the event channel
    /// belongs to a running exchange.
    pub(crate) fn in_flight(&self) -> bool {
        self.queued && !self.finished
    }

    /// Deliver a queue-time failure as the request's error event.
    pub(crate) fn reject(&self, err: TransferError) -> TransferError {
        tracing::debug!(request = %self.id, code = %err.code, message = %err.message, "request rejected");
        let _ = self.events_tx.send(Event::Error(err.clone()));
        err
    }

    /// Mark the request queued and snapshot it for the engine. An invalid
    /// request reports `url` on every attempt.
    pub(crate) fn take_exchange(&mut self) -> Result<Exchange, TransferError> {
        let target = match &self.target {
            Ok(target) if self.valid_method => target.clone(),
            _ => {
                self.queued = true;
                let message = if self.valid_method {
                    format!("Invalid URL: {}", self.url)
                } else {
                    format!("Invalid method: {}", self.method)
                };
                return Err(TransferError::new(ErrorCode::Url, message));
            }
        };

        if self.queued {
            return Err(TransferError::new(
                ErrorCode::AlreadyQueued,
                format!("Request {} {} is already queued", self.method, self.url),
            ));
        }
        self.queued = true;
        let commands = self.commands_rx.take().ok_or_else(|| {
            TransferError::new(
                ErrorCode::AlreadyQueued,
                format!("Request {} {} is already queued", self.method, self.url),
            )
        })?;

        let mode = self.body.mode();
        Ok(Exchange {
            id: self.id,
            method: self.method.clone(),
            url: self.url.clone(),
            target,
            headers: self.headers.clone(),
            body: std::mem::replace(&mut self.body, Body::for_mode(mode)),
            events: self.events_tx.clone(),
            commands,
            abort: self.abort.clone(),
        })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("mode", &self.mode())
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}
