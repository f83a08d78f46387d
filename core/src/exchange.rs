//! The HTTP/1.1 request/response state machine run by a worker.
//!
//! # Design
//! `Exchange` is the immutable snapshot of a `Request` taken when it is
//! queued. Running it walks the states
//!
//! ```text
//! Connect -> SendHeaders -> SendBody -> RecvStatusLine -> RecvHeaders -> RecvBody -> Done
//! ```
//!
//! with one method per state. Each state either advances or returns a
//! `TransferError`; `run` turns that error into the single terminal
//! `Event::Error`. Buffered and incremental transfers share the machine and
//! only differ in `send_body` and `recv_body`.

use std::fmt::Write as _;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::abort::AbortHandle;
use crate::config::EngineConfig;
use crate::connection::{Connection, ReadLineError};
use crate::error::{ErrorCode, TransferError};
use crate::http::{
    classify_status, parse_content_length, parse_header_line, parse_status_line, HeaderMap,
    Response, StatusLine,
};
use crate::request::RequestId;
use crate::tls::Connector;
use crate::types::{Body, Command, Event};
use crate::url::Target;

/// Settings shared by every worker of one engine.
#[derive(Debug)]
pub(crate) struct Context {
    pub config: EngineConfig,
    pub connector: Connector,
}

/// Whether the connection may serve another exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reuse {
    Keep,
    Close,
}

#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) id: RequestId,
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) target: Target,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) events: Sender<Event>,
    pub(crate) commands: Receiver<Command>,
    pub(crate) abort: AbortHandle,
}

impl Exchange {
    pub(crate) fn emit(&self, event: Event) {
        tracing::trace!(request = %self.id, event = event.name(), "emit");
        // The caller may have dropped its request; nobody is left to tell.
        let _ = self.events.send(event);
    }

    pub(crate) fn fail(&self, err: TransferError) {
        tracing::debug!(request = %self.id, code = %err.code, message = %err.message, "request failed");
        self.emit(Event::Error(err));
    }

    /// Run the exchange on `slot`, opening a connection there if needed.
    /// A failed exchange leaves the slot empty.
    pub(crate) fn run(self, slot: &mut Option<Connection>, ctx: &Context) -> Reuse {
        let span = tracing::debug_span!(
            "exchange",
            request = %self.id,
            method = %self.method,
            host = %self.target.host,
            port = self.target.port,
        );
        let _entered = span.enter();

        let outcome = self.drive(slot, ctx);
        self.abort.detach();
        match outcome {
            Ok(reuse) => reuse,
            Err(err) => {
                let err = if self.abort.is_aborted() && err.code != ErrorCode::Aborted {
                    TransferError::new(ErrorCode::Aborted, format!("Request aborted ({err})"))
                } else {
                    err
                };
                self.fail(err);
                *slot = None;
                Reuse::Close
            }
        }
    }

    fn drive(&self, slot: &mut Option<Connection>, ctx: &Context) -> Result<Reuse, TransferError> {
        self.check_abort()?;
        let conn = self.connect(slot, ctx)?;
        let length = self.send_headers(conn)?;
        self.send_body(conn, length, ctx)?;
        self.check_abort()?;
        let status = self.recv_status_line(conn, ctx)?;
        let (headers, length) = self.recv_headers(conn, ctx)?;
        self.check_abort()?;
        let response = self.recv_body(conn, ctx, status, headers, length)?;
        let reuse = self.done(conn);
        self.emit(Event::Complete(response));
        Ok(reuse)
    }

    fn check_abort(&self) -> Result<(), TransferError> {
        if self.abort.is_aborted() {
            return Err(TransferError::new(ErrorCode::Aborted, "Request aborted"));
        }
        Ok(())
    }

    fn connect<'a>(
        &self,
        slot: &'a mut Option<Connection>,
        ctx: &Context,
    ) -> Result<&'a mut Connection, TransferError> {
        let conn = match slot.take() {
            Some(conn) => {
                tracing::debug!("reusing connection");
                conn
            }
            None => Connection::open(&self.target, &ctx.connector, &self.abort, &ctx.config)?,
        };
        let conn = slot.insert(conn);
        conn.begin(&self.abort);
        Ok(conn)
    }

    /// Write the request line and headers; returns the body length.
    fn send_headers(&self, conn: &mut Connection) -> Result<u64, TransferError> {
        let mut headers = self.headers.clone();
        headers.insert("Host", self.target.authority());
        headers.insert("Connection", "close");
        conn.set_close();

        let length = match &self.body {
            Body::Buffered(data) => {
                let length = data.len() as u64;
                headers.insert("Content-Length", length.to_string());
                length
            }
            Body::Incremental => headers
                .get("content-length")
                .and_then(parse_content_length)
                .ok_or_else(|| {
                    TransferError::new(
                        ErrorCode::SetupFail,
                        "Incremental request needs a numeric Content-Length header",
                    )
                })?,
        };

        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.target.path);
        for (name, value) in headers.iter() {
            tracing::trace!(%name, %value, "request header");
            let _ = write!(head, "{name}: {value}\r\n");
        }
        head.push_str("\r\n");

        conn.write_all(head.as_bytes())
            .map_err(|err| TransferError::caused_by(ErrorCode::SendFail, "Can't send request headers: ", err))?;
        Ok(length)
    }

    fn send_body(&self, conn: &mut Connection, length: u64, ctx: &Context) -> Result<(), TransferError> {
        match &self.body {
            Body::Buffered(data) if data.is_empty() => Ok(()),
            Body::Buffered(data) => conn
                .write_all(data)
                .map_err(|err| TransferError::caused_by(ErrorCode::SendFail, "Can't send request body: ", err)),
            Body::Incremental => self.pull_body(conn, length, ctx),
        }
    }

    fn pull_body(&self, conn: &mut Connection, length: u64, ctx: &Context) -> Result<(), TransferError> {
        let mut remaining = length;
        while remaining > 0 {
            self.emit(Event::PullBody { remaining });
            let data = match self.wait_command(ctx.config.command_timeout())? {
                Command::PushBody(data) => data,
                Command::Continue => {
                    return Err(TransferError::new(
                        ErrorCode::UnexpectedCommand,
                        "Expected push_body, got continue",
                    ))
                }
            };

            if data.is_empty() {
                return Err(TransferError::new(ErrorCode::EmptyData, "Pushed body chunk is empty"));
            }
            let len = data.len() as u64;
            if len > remaining {
                return Err(TransferError::new(
                    ErrorCode::TooMuchData,
                    format!("Pushed {len} bytes with only {remaining} remaining"),
                ));
            }

            conn.write_all(&data)
                .map_err(|err| TransferError::caused_by(ErrorCode::SendFail, "Can't send request body: ", err))?;
            remaining -= len;
            tracing::trace!(sent = len, remaining, "request body chunk");
        }
        Ok(())
    }

    fn recv_status_line(&self, conn: &mut Connection, ctx: &Context) -> Result<StatusLine, TransferError> {
        let line = conn.read_line(ctx.config.max_line_length).map_err(|err| match err {
            ReadLineError::Parse(err) => {
                TransferError::caused_by(ErrorCode::InvalidStatus, "Can't read response status: ", err)
            }
            err => TransferError::caused_by(ErrorCode::NoResponse, "No response: ", err),
        })?;
        tracing::trace!(%line, "status line");

        let status = parse_status_line(&line)
            .map_err(|err| TransferError::caused_by(ErrorCode::InvalidStatus, "Can't read response status: ", err))?;
        classify_status(&status)?;
        Ok(status)
    }

    /// Read header lines up to the blank line; returns the headers and the
    /// declared body length.
    fn recv_headers(&self, conn: &mut Connection, ctx: &Context) -> Result<(HeaderMap, u64), TransferError> {
        let mut headers = HeaderMap::new();
        let mut length = None;

        loop {
            let line = conn.read_line(ctx.config.max_line_length).map_err(|err| match err {
                ReadLineError::Parse(err) => {
                    TransferError::caused_by(ErrorCode::InvalidHeader, "Invalid response header: ", err)
                }
                err => TransferError::caused_by(ErrorCode::NoResponse, "No response: ", err),
            })?;
            if line.is_empty() {
                break;
            }

            let invalid = || TransferError::new(ErrorCode::InvalidHeader, format!("Invalid response header {line}"));
            let (name, value) = parse_header_line(&line).map_err(|_| invalid())?;
            tracing::trace!(%name, %value, "response header");

            match name.as_str() {
                "content-length" => length = Some(parse_content_length(&value).ok_or_else(invalid)?),
                "connection" if value.eq_ignore_ascii_case("close") => conn.set_close(),
                _ => {}
            }
            headers.insert(name, value);
        }

        let length = length.ok_or_else(|| {
            TransferError::new(ErrorCode::NoLength, "We need content length from the server!")
        })?;
        Ok((headers, length))
    }

    fn recv_body(
        &self,
        conn: &mut Connection,
        ctx: &Context,
        status: StatusLine,
        headers: HeaderMap,
        length: u64,
    ) -> Result<Response, TransferError> {
        let body = match &self.body {
            Body::Buffered(_) => self.read_whole_body(conn, ctx, length)?,
            Body::Incremental => {
                self.emit(Event::RecvHeaders {
                    status: status.code,
                    headers: headers.clone(),
                });
                self.expect_continue(ctx)?;
                self.stream_body(conn, ctx, length)?;
                Vec::new()
            }
        };

        Ok(Response {
            status: status.code,
            reason: status.reason,
            headers,
            body,
        })
    }

    fn read_whole_body(&self, conn: &mut Connection, ctx: &Context, length: u64) -> Result<Vec<u8>, TransferError> {
        if length > ctx.config.max_response_size {
            return Err(TransferError::new(
                ErrorCode::TooBig,
                format!("Response is too big: {length} bytes"),
            ));
        }
        let body = conn
            .read_body(length as usize)
            .map_err(|err| TransferError::caused_by(ErrorCode::NoResponse, "Can't receive response body: ", err))?;
        if body.len() as u64 != length {
            return Err(short_response(length, body.len() as u64));
        }
        Ok(body)
    }

    fn stream_body(&self, conn: &mut Connection, ctx: &Context, length: u64) -> Result<(), TransferError> {
        let chunk_size = ctx.config.chunk_size as u64;
        let mut offset = 0;
        while offset < length {
            let want = chunk_size.min(length - offset);
            let data = conn
                .read_body(want as usize)
                .map_err(|err| TransferError::caused_by(ErrorCode::NoResponse, "Can't receive response body: ", err))?;
            let got = data.len() as u64;
            if got != want {
                return Err(short_response(length, offset + got));
            }

            self.emit(Event::RecvBody { offset, data });
            offset += got;
            self.expect_continue(ctx)?;
        }
        Ok(())
    }

    fn done(&self, conn: &mut Connection) -> Reuse {
        conn.finish();
        if conn.is_closing() {
            Reuse::Close
        } else {
            Reuse::Keep
        }
    }

    fn expect_continue(&self, ctx: &Context) -> Result<(), TransferError> {
        match self.wait_command(ctx.config.command_timeout())? {
            Command::Continue => Ok(()),
            Command::PushBody(_) => Err(TransferError::new(
                ErrorCode::UnexpectedCommand,
                "Expected continue, got push_body",
            )),
        }
    }

    fn wait_command(&self, timeout: Duration) -> Result<Command, TransferError> {
        crossbeam_channel::select! {
            recv(self.commands) -> command => command.map_err(|_| {
                TransferError::new(ErrorCode::CommandTimeout, "Caller went away")
            }),
            recv(self.abort.signal()) -> _ => Err(TransferError::new(ErrorCode::Aborted, "Request aborted")),
            default(timeout) => Err(TransferError::new(
                ErrorCode::CommandTimeout,
                format!("No command within {} s", timeout.as_secs()),
            )),
        }
    }
}

fn short_response(expected: u64, got: u64) -> TransferError {
    TransferError::new(
        ErrorCode::ShortResponse,
        format!("Expecting {expected}, got {got} bytes"),
    )
}
