//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Handles (`FfiEngine`, `FfiRequest`) are opaque: C sees only pointers and
//! passes them back into every entry point. Events cross the boundary as a
//! borrowed `FfiEvent` whose pointers stay valid for the duration of one
//! callback invocation; `EventFrame` owns the storage behind them.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::ptr;

use cloudxfer_core::{Engine, Event, HeaderMap, Request, TransferError};

/// Opaque handle to a running engine.
pub struct FfiEngine {
    pub(crate) inner: Engine,
}

/// Callback invoked by `cloudxfer_request_dispatch` once per event.
///
/// `event` and everything it points to are only valid during the call.
/// The callback may call `cloudxfer_request_push_body`,
/// `cloudxfer_request_continue`, `cloudxfer_request_abort` and the response
/// getters on `request`, but must not free it.
pub type FfiEventCallback =
    extern "C" fn(request: *mut FfiRequest, event: *const FfiEvent, user_data: *mut c_void);

/// Opaque handle to one request plus the state the C side reads back.
pub struct FfiRequest {
    pub(crate) inner: Request,
    pub(crate) callback: Option<FfiEventCallback>,
    pub(crate) user_data: *mut c_void,
    pub(crate) status: u16,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
}

impl FfiRequest {
    pub(crate) fn new(inner: Request) -> Self {
        Self {
            inner,
            callback: None,
            user_data: ptr::null_mut(),
            status: 0,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Keep what the getters expose in sync with the event stream.
    pub(crate) fn record(&mut self, event: &Event) {
        match event {
            Event::RecvHeaders { status, headers } => {
                self.status = *status;
                self.headers = headers.clone();
            }
            Event::Complete(response) => {
                self.status = response.status;
                self.headers = response.headers.clone();
                self.body = response.body.clone();
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// Result of an FFI call that does not return a handle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiStatus {
    Ok = 0,
    /// A required pointer argument was null.
    NullArg = 1,
    /// A string argument was not valid UTF-8, or not a valid header name
    /// or value.
    InvalidArg = 2,
    /// The call does not fit the request's mode or lifecycle stage.
    Misuse = 3,
    /// The engine refused the request; the error is also delivered as an
    /// event through `cloudxfer_request_dispatch`.
    Rejected = 4,
    /// A panic was caught at the boundary.
    Panic = 5,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiEventKind {
    PullBody = 0,
    RecvHeaders = 1,
    RecvBody = 2,
    Complete = 3,
    Error = 4,
}

/// One event as seen from C.
///
/// Fields not used by `kind` are zero or null:
/// - `PullBody`: `remaining`.
/// - `RecvHeaders`: `status`; headers via the response getters.
/// - `RecvBody`: `offset`, `data`, `data_len`.
/// - `Complete`: `status`, `data`, `data_len` (the buffered body).
/// - `Error`: `error_code`, `error_message`.
#[repr(C)]
pub struct FfiEvent {
    pub kind: FfiEventKind,
    pub status: u16,
    pub remaining: u64,
    pub offset: u64,
    pub data: *const u8,
    pub data_len: usize,
    pub error_code: *const c_char,
    pub error_message: *const c_char,
}

/// Owns the storage an `FfiEvent` points into.
pub(crate) struct EventFrame {
    pub(crate) event: FfiEvent,
    _data: Vec<u8>,
    _code: Option<CString>,
    _message: Option<CString>,
}

impl EventFrame {
    pub(crate) fn new(event: Event) -> Self {
        let mut raw = FfiEvent {
            kind: FfiEventKind::Error,
            status: 0,
            remaining: 0,
            offset: 0,
            data: ptr::null(),
            data_len: 0,
            error_code: ptr::null(),
            error_message: ptr::null(),
        };
        let mut data = Vec::new();
        let mut code = None;
        let mut message = None;

        match event {
            Event::PullBody { remaining } => {
                raw.kind = FfiEventKind::PullBody;
                raw.remaining = remaining;
            }
            Event::RecvHeaders { status, .. } => {
                raw.kind = FfiEventKind::RecvHeaders;
                raw.status = status;
            }
            Event::RecvBody { offset, data: chunk } => {
                raw.kind = FfiEventKind::RecvBody;
                raw.offset = offset;
                data = chunk;
            }
            Event::Complete(response) => {
                raw.kind = FfiEventKind::Complete;
                raw.status = response.status;
                data = response.body;
            }
            Event::Error(err) => {
                raw.kind = FfiEventKind::Error;
                let (c, m) = error_strings(&err);
                code = Some(c);
                message = Some(m);
            }
        }

        if !data.is_empty() {
            raw.data = data.as_ptr();
            raw.data_len = data.len();
        }
        if let Some(c) = &code {
            raw.error_code = c.as_ptr();
        }
        if let Some(m) = &message {
            raw.error_message = m.as_ptr();
        }

        Self {
            event: raw,
            _data: data,
            _code: code,
            _message: message,
        }
    }
}

/// Error code and message as C strings; interior NULs are dropped.
fn error_strings(err: &TransferError) -> (CString, CString) {
    (
        to_cstring(&err.code.as_str()),
        to_cstring(&err.message),
    )
}

pub(crate) fn to_cstring(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}
