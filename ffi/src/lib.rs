//! C-ABI wrapper around `cloudxfer-core`.
//!
//! # Overview
//! Lets the application layer (C, or a scripting runtime with a C FFI)
//! create requests, queue them on an engine and react to their events
//! without touching Rust types directly.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Events are pulled, not pushed: the caller's run loop calls
//!   `cloudxfer_request_dispatch`, which invokes the registered callback on
//!   the calling thread. Worker threads never call into C.
//! - Handles returned by `cloudxfer_init` and `cloudxfer_request_new` are
//!   owned by the caller and released with `cloudxfer_shutdown` and
//!   `cloudxfer_request_free`. Strings returned by getters are released
//!   with `cloudxfer_free_string`.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use cloudxfer_core::{Engine, EngineConfig, Mode, Request, RequestError};

use types::*;

/// Run `f`, turning a panic into `fallback`.
fn guard<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!("panic caught at FFI boundary");
        fallback
    })
}

/// Borrow a C string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Result<&'a str, FfiStatus> {
    if ptr.is_null() {
        return Err(FfiStatus::NullArg);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiStatus::InvalidArg)
}

/// Copy a byte buffer argument. A zero length accepts a null pointer.
///
/// # Safety
/// When `len > 0`, `data` must point to `len` readable bytes.
unsafe fn bytes_arg(data: *const u8, len: usize) -> Result<Vec<u8>, FfiStatus> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if data.is_null() {
        return Err(FfiStatus::NullArg);
    }
    Ok(unsafe { std::slice::from_raw_parts(data, len) }.to_vec())
}

impl From<RequestError> for FfiStatus {
    fn from(err: RequestError) -> Self {
        tracing::debug!(error = %err, "request call refused");
        match err {
            RequestError::InvalidHeaderName(_) | RequestError::InvalidHeaderValue(_) => {
                FfiStatus::InvalidArg
            }
            _ => FfiStatus::Misuse,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------------

/// Start an engine.
///
/// `config_json` holds an `EngineConfig` as JSON; null means defaults.
/// Returns null if the configuration is invalid or the engine threads
/// cannot be started. Release with `cloudxfer_shutdown`.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_init(config_json: *const c_char) -> *mut FfiEngine {
    guard(std::ptr::null_mut(), || {
        let config = if config_json.is_null() {
            EngineConfig::default()
        } else {
            let parsed = unsafe { str_arg(config_json) }
                .ok()
                .map(EngineConfig::from_json_str);
            match parsed {
                Some(Ok(config)) => config,
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "rejecting engine configuration");
                    return std::ptr::null_mut();
                }
                None => {
                    tracing::warn!("engine configuration is not UTF-8");
                    return std::ptr::null_mut();
                }
            }
        };
        match Engine::start(config) {
            Ok(engine) => Box::into_raw(Box::new(FfiEngine { inner: engine })),
            Err(err) => {
                tracing::warn!(error = %err, "engine failed to start");
                std::ptr::null_mut()
            }
        }
    })
}

/// Stop the engine, abort in-flight requests and free the handle.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_shutdown(engine: *mut FfiEngine) -> FfiStatus {
    if engine.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let engine = unsafe { Box::from_raw(engine) };
        match engine.inner.shutdown() {
            Ok(()) => FfiStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "engine shutdown failed");
                FfiStatus::Rejected
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Request construction
// ---------------------------------------------------------------------------

/// Create a request. An unparseable URL still yields a handle; queueing it
/// reports a `url` error.
///
/// Returns null only if `method` or `url` is null or not UTF-8.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_new(
    method: *const c_char,
    url: *const c_char,
    incremental: bool,
) -> *mut FfiRequest {
    guard(std::ptr::null_mut(), || {
        let (Ok(method), Ok(url)) = (unsafe { str_arg(method) }, unsafe { str_arg(url) }) else {
            return std::ptr::null_mut();
        };
        let mode = if incremental {
            Mode::Incremental
        } else {
            Mode::Buffered
        };
        let request = Request::new(method, url, mode);
        Box::into_raw(Box::new(FfiRequest::new(request)))
    })
}

/// Set a request header. Only valid before the request is queued.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_set_header(
    request: *mut FfiRequest,
    name: *const c_char,
    value: *const c_char,
) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let (name, value) = match (unsafe { str_arg(name) }, unsafe { str_arg(value) }) {
            (Ok(name), Ok(value)) => (name, value),
            (Err(status), _) | (_, Err(status)) => return status,
        };
        let request = unsafe { &mut *request };
        match request.inner.set_header(name, value) {
            Ok(()) => FfiStatus::Ok,
            Err(err) => err.into(),
        }
    })
}

/// Copy `len` bytes as the body of a buffered request.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_set_body(
    request: *mut FfiRequest,
    data: *const u8,
    len: usize,
) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let body = match unsafe { bytes_arg(data, len) } {
            Ok(body) => body,
            Err(status) => return status,
        };
        let request = unsafe { &mut *request };
        match request.inner.set_body(body) {
            Ok(()) => FfiStatus::Ok,
            Err(err) => err.into(),
        }
    })
}

/// Hand the next piece of an incremental upload to the engine, in answer
/// to a `PullBody` event. May be called from inside the event callback.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_push_body(
    request: *mut FfiRequest,
    data: *const u8,
    len: usize,
) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let body = match unsafe { bytes_arg(data, len) } {
            Ok(body) => body,
            Err(status) => return status,
        };
        let request = unsafe { &*request };
        match request.inner.push_body(body) {
            Ok(()) => FfiStatus::Ok,
            Err(err) => err.into(),
        }
    })
}

/// Let an incremental download proceed after `RecvHeaders` or `RecvBody`.
/// May be called from inside the event callback.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_continue(request: *mut FfiRequest) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let request = unsafe { &*request };
        match request.inner.proceed() {
            Ok(()) => FfiStatus::Ok,
            Err(err) => err.into(),
        }
    })
}

/// Abort the request. The worker stops at its next blocking point and the
/// request ends with an `aborted` error event.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_abort(request: *mut FfiRequest) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        unsafe { &*request }.inner.abort();
        FfiStatus::Ok
    })
}

/// Register the callback `cloudxfer_request_dispatch` delivers events to.
/// A null `callback` unregisters; events are then consumed silently.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_set_event_callback(
    request: *mut FfiRequest,
    callback: Option<FfiEventCallback>,
    user_data: *mut c_void,
) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let request = unsafe { &mut *request };
        request.callback = callback;
        request.user_data = user_data;
        FfiStatus::Ok
    })
}

// ---------------------------------------------------------------------------
// Queueing and event delivery
// ---------------------------------------------------------------------------

/// Queue the request on the engine.
///
/// `Rejected` means the request failed before reaching a worker (invalid
/// URL, queued twice, engine shut down); its `Error` event is still
/// delivered by `cloudxfer_request_dispatch`.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_queue_request(
    engine: *mut FfiEngine,
    request: *mut FfiRequest,
) -> FfiStatus {
    if engine.is_null() || request.is_null() {
        return FfiStatus::NullArg;
    }
    guard(FfiStatus::Panic, || {
        let engine = unsafe { &*engine };
        let request = unsafe { &mut *request };
        match engine.inner.queue(&mut request.inner) {
            Ok(()) => FfiStatus::Ok,
            Err(err) => {
                tracing::debug!(code = %err.code, message = %err.message, "request rejected");
                FfiStatus::Rejected
            }
        }
    })
}

/// Deliver pending events to the callback on the calling thread.
///
/// Waits up to `timeout_ms` for the first event, then drains whatever else
/// is already pending. Returns the number of events delivered, or -1 for a
/// null handle or a caught panic.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_dispatch(request: *mut FfiRequest, timeout_ms: u32) -> i32 {
    if request.is_null() {
        return -1;
    }
    guard(-1, || {
        let mut delivered = 0;
        let mut wait = Some(Duration::from_millis(u64::from(timeout_ms)));

        loop {
            // The callback may re-enter through `request`, so no reference
            // into it is held across the call.
            let (event, callback, user_data) = {
                let state = unsafe { &mut *request };
                let event = match wait.take() {
                    Some(timeout) => state.inner.recv_event_timeout(timeout),
                    None => state.inner.try_recv_event(),
                };
                let Some(event) = event else { break };
                state.record(&event);
                (event, state.callback, state.user_data)
            };

            let frame = EventFrame::new(event);
            if let Some(callback) = callback {
                callback(request, &frame.event, user_data);
            }
            delivered += 1;
        }
        delivered
    })
}

// ---------------------------------------------------------------------------
// Response access
// ---------------------------------------------------------------------------

/// Status code of the last `RecvHeaders` or `Complete` event, or 0.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_get_status(request: *const FfiRequest) -> u16 {
    if request.is_null() {
        return 0;
    }
    guard(0, || unsafe { &*request }.status)
}

/// Response header value, matched case-insensitively. Returns null if no
/// headers were received yet or the header is absent. Free the result with
/// `cloudxfer_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_get_response_header(
    request: *const FfiRequest,
    name: *const c_char,
) -> *mut c_char {
    if request.is_null() {
        return std::ptr::null_mut();
    }
    guard(std::ptr::null_mut(), || {
        let Ok(name) = (unsafe { str_arg(name) }) else {
            return std::ptr::null_mut();
        };
        match unsafe { &*request }.headers.get(name) {
            Some(value) => to_cstring(value).into_raw(),
            None => std::ptr::null_mut(),
        }
    })
}

/// Body of a completed buffered request. The pointer is owned by the
/// request and valid until it is freed; `out_len` receives the length.
/// Returns null for an empty or not yet received body.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_get_response_body(
    request: *const FfiRequest,
    out_len: *mut usize,
) -> *const u8 {
    if request.is_null() {
        return std::ptr::null();
    }
    guard(std::ptr::null(), || {
        let body = &unsafe { &*request }.body;
        if !out_len.is_null() {
            unsafe { *out_len = body.len() };
        }
        if body.is_empty() {
            std::ptr::null()
        } else {
            body.as_ptr()
        }
    })
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a request. A queued request is aborted first. Safe to call with
/// null; must not be called from inside its own event callback.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_request_free(request: *mut FfiRequest) {
    if !request.is_null() {
        guard((), || {
            let request = unsafe { Box::from_raw(request) };
            if request.inner.is_queued() && !request.inner.is_finished() {
                request.inner.abort();
            }
            drop(request);
        });
    }
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn cloudxfer_free_string(s: *mut c_char) {
    if !s.is_null() {
        guard((), || drop(unsafe { CString::from_raw(s) }));
    }
}
