//! Wire edge cases against scripted peers.
//!
//! # Design
//! Each test binds a raw `TcpListener` and plays one side of the exchange by
//! hand, which lets it send replies no real server would (custom reason
//! phrases, missing lengths, truncated bodies) and pause at exact protocol
//! points.

mod common;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;

use cloudxfer_core::{Engine, EngineConfig, ErrorCode, Event, Mode, Request, TransferError};
use common::{next_event, plain_engine, short_timeouts, terminal_event, WAIT};

/// Accept one connection on a random port and hand it to `script`.
fn scripted_peer<F>(script: F) -> String
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        if let Ok((socket, _)) = listener.accept() {
            script(socket);
        }
    });
    format!("http://{addr}")
}

/// Read the request head, up to and including the blank line.
fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Read the head, send `reply` verbatim, close.
fn reply_with(reply: &'static str) -> impl FnOnce(TcpStream) + Send + 'static {
    move |mut socket| {
        read_head(&mut socket);
        let _ = socket.write_all(reply.as_bytes());
    }
}

/// Read the head, then hold the connection until the client closes it.
fn hold_open(heads: mpsc::Sender<String>) -> impl FnOnce(TcpStream) + Send + 'static {
    move |mut socket| {
        let head = read_head(&mut socket);
        let _ = heads.send(head);
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest);
    }
}

fn buffered_error(base: &str, config: EngineConfig) -> TransferError {
    let engine = plain_engine(config);
    let mut request = Request::new("GET", format!("{base}/blob"), Mode::Buffered);
    engine.queue(&mut request).unwrap();
    match terminal_event(&mut request) {
        Event::Error(err) => err,
        other => panic!("expected error, got {other:?}"),
    }
}

fn expect_error(request: &mut Request) -> TransferError {
    match terminal_event(request) {
        Event::Error(err) => err,
        other => panic!("expected error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Request head
// ---------------------------------------------------------------------------

#[test]
fn request_head_carries_host_length_and_close() {
    let (tx, rx) = mpsc::channel();
    let base = scripted_peer(move |mut socket| {
        let head = read_head(&mut socket);
        let mut body = [0u8; 5];
        socket.read_exact(&mut body).unwrap();
        tx.send((head, body.to_vec())).unwrap();
        let _ = socket.write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok");
    });
    let port = base.rsplit(':').next().unwrap().to_string();

    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("POST", format!("{base}/blobs?x=1"), Mode::Buffered);
    request.set_header("X-Client", "scripted").unwrap();
    request.set_header("connection", "keep-alive").unwrap();
    request.set_body(b"hello".to_vec()).unwrap();
    engine.queue(&mut request).unwrap();

    match terminal_event(&mut request) {
        Event::Complete(response) => {
            assert_eq!(response.status, 201);
            assert_eq!(response.body, b"ok");
        }
        other => panic!("unexpected {other:?}"),
    }

    let (head, body) = rx.recv_timeout(WAIT).unwrap();
    let lines: Vec<&str> = head.trim_end().split("\r\n").collect();
    assert_eq!(lines[0], "POST /blobs?x=1 HTTP/1.1");
    assert!(lines.contains(&"X-Client: scripted"));
    assert!(lines.contains(&format!("Host: 127.0.0.1:{port}").as_str()));
    assert!(lines.contains(&"Content-Length: 5"));
    // The caller's keep-alive is overridden in place.
    assert!(lines.contains(&"Connection: close"));
    assert!(!lines.iter().any(|l| l.eq_ignore_ascii_case("connection: keep-alive")));
    assert_eq!(body, b"hello");
}

// ---------------------------------------------------------------------------
// Status line and headers
// ---------------------------------------------------------------------------

#[test]
fn server_too_busy_is_busy() {
    let base = scripted_peer(reply_with(
        "HTTP/1.1 500 Server Too Busy\r\nContent-Length: 0\r\n\r\n",
    ));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::Busy);
    assert_eq!(err.code.as_str(), "busy");
}

#[test]
fn other_server_error_is_numeric() {
    let base = scripted_peer(reply_with(
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n",
    ));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::Status(500));
    assert_eq!(err.message, "Server returned 500: Internal Server Error");
}

#[test]
fn garbage_status_line_is_invalid_status() {
    let base = scripted_peer(reply_with("SSH-2.0-OpenSSH_9.6\r\n\r\n"));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::InvalidStatus);
}

#[test]
fn overlong_status_line_is_invalid_status() {
    let base = scripted_peer(move |mut socket| {
        read_head(&mut socket);
        let line = format!("HTTP/1.1 200 {}\r\n\r\n", "O".repeat(500));
        let _ = socket.write_all(line.as_bytes());
    });
    let err = buffered_error(
        &base,
        EngineConfig {
            max_line_length: 128,
            ..short_timeouts()
        },
    );
    assert_eq!(err.code, ErrorCode::InvalidStatus);
}

#[test]
fn closed_without_reply_is_no_response() {
    let base = scripted_peer(|mut socket| {
        read_head(&mut socket);
    });
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::NoResponse);
}

#[test]
fn header_without_colon_is_invalid_header() {
    let base = scripted_peer(reply_with(
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nthis is not a header\r\n\r\n",
    ));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::InvalidHeader);
}

#[test]
fn unparsable_content_length_is_invalid_header() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n"));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::InvalidHeader);
}

#[test]
fn missing_content_length_is_no_length() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nbody"));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::NoLength);
    assert_eq!(err.message, "We need content length from the server!");
}

#[test]
fn redirect_is_reported_not_followed() {
    let base = scripted_peer(reply_with(
        "HTTP/1.1 302 Found\r\nLocation: http://elsewhere/\r\nContent-Length: 0\r\n\r\n",
    ));
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", format!("{base}/"), Mode::Buffered);
    engine.queue(&mut request).unwrap();
    match terminal_event(&mut request) {
        Event::Complete(response) => {
            assert_eq!(response.status, 302);
            assert_eq!(response.header("location"), Some("http://elsewhere/"));
            assert!(response.body.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Response body
// ---------------------------------------------------------------------------

#[test]
fn truncated_body_is_short_response() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"));
    let err = buffered_error(&base, short_timeouts());
    assert_eq!(err.code, ErrorCode::ShortResponse);
    assert_eq!(err.message, "Expecting 10, got 3 bytes");
}

#[test]
fn body_over_ceiling_is_too_big() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n"));
    let err = buffered_error(
        &base,
        EngineConfig {
            max_response_size: 100,
            ..short_timeouts()
        },
    );
    assert_eq!(err.code, ErrorCode::TooBig);
}

#[test]
fn zero_length_buffered_body_completes_empty() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"));
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", format!("{base}/"), Mode::Buffered);
    engine.queue(&mut request).unwrap();
    match terminal_event(&mut request) {
        Event::Complete(response) => assert!(response.body.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn zero_length_incremental_body_completes_after_continue() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"));
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", format!("{base}/"), Mode::Incremental);
    engine.queue(&mut request).unwrap();

    assert!(matches!(next_event(&mut request), Event::RecvHeaders { status: 200, .. }));
    request.proceed().unwrap();
    assert!(matches!(next_event(&mut request), Event::Complete(_)));
}

#[test]
fn truncated_incremental_body_is_short_response() {
    let base = scripted_peer(reply_with("HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nabcd"));
    let engine = plain_engine(EngineConfig {
        chunk_size: 4,
        ..short_timeouts()
    });
    let mut request = Request::new("GET", format!("{base}/"), Mode::Incremental);
    engine.queue(&mut request).unwrap();

    assert!(matches!(next_event(&mut request), Event::RecvHeaders { .. }));
    request.proceed().unwrap();
    match next_event(&mut request) {
        Event::RecvBody { offset, data } => {
            assert_eq!(offset, 0);
            assert_eq!(data, b"abcd");
        }
        other => panic!("unexpected {other:?}"),
    }
    request.proceed().unwrap();
    let err = expect_error(&mut request);
    assert_eq!(err.code, ErrorCode::ShortResponse);
    assert_eq!(err.message, "Expecting 8, got 4 bytes");
}

// ---------------------------------------------------------------------------
// Incremental upload protocol
// ---------------------------------------------------------------------------

fn incremental_put(base: &str, config: EngineConfig, length: Option<&str>) -> (Engine, Request) {
    let engine = plain_engine(config);
    let mut request = Request::new("PUT", format!("{base}/blob"), Mode::Incremental);
    if let Some(length) = length {
        request.set_header("Content-Length", length).unwrap();
    }
    engine.queue(&mut request).unwrap();
    (engine, request)
}

#[test]
fn incremental_without_length_is_setup_fail() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), None);
    assert_eq!(expect_error(&mut request).code, ErrorCode::SetupFail);
}

#[test]
fn incremental_with_bad_length_is_setup_fail() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), Some("lots"));
    assert_eq!(expect_error(&mut request).code, ErrorCode::SetupFail);
}

#[test]
fn continue_instead_of_push_is_unexpected_command() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), Some("4"));

    assert_eq!(next_event(&mut request), Event::PullBody { remaining: 4 });
    request.proceed().unwrap();
    assert_eq!(expect_error(&mut request).code, ErrorCode::UnexpectedCommand);
}

#[test]
fn empty_push_is_empty_data() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), Some("4"));

    assert_eq!(next_event(&mut request), Event::PullBody { remaining: 4 });
    request.push_body(Vec::new()).unwrap();
    assert_eq!(expect_error(&mut request).code, ErrorCode::EmptyData);
}

#[test]
fn push_past_declared_length_is_too_much_data() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), Some("4"));

    assert_eq!(next_event(&mut request), Event::PullBody { remaining: 4 });
    request.push_body(b"abc".to_vec()).unwrap();
    assert_eq!(next_event(&mut request), Event::PullBody { remaining: 1 });
    request.push_body(b"de".to_vec()).unwrap();
    assert_eq!(expect_error(&mut request).code, ErrorCode::TooMuchData);
}

#[test]
fn silent_caller_is_command_timeout() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let config = EngineConfig {
        command_timeout_secs: 1,
        ..short_timeouts()
    };
    let (_engine, mut request) = incremental_put(&base, config, Some("4"));

    assert_eq!(next_event(&mut request), Event::PullBody { remaining: 4 });
    assert_eq!(expect_error(&mut request).code, ErrorCode::CommandTimeout);
}

#[test]
fn pushed_chunks_reach_the_server_in_order() {
    let (tx, rx) = mpsc::channel();
    let base = scripted_peer(move |mut socket| {
        read_head(&mut socket);
        let mut body = [0u8; 9];
        socket.read_exact(&mut body).unwrap();
        tx.send(body.to_vec()).unwrap();
        let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    });
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), Some("9"));

    for chunk in [&b"abc"[..], b"defg", b"hi"] {
        assert!(matches!(next_event(&mut request), Event::PullBody { .. }));
        request.push_body(chunk.to_vec()).unwrap();
    }
    assert!(matches!(next_event(&mut request), Event::RecvHeaders { status: 200, .. }));
    request.proceed().unwrap();
    assert!(matches!(next_event(&mut request), Event::Complete(_)));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), b"abcdefghi");
}

// ---------------------------------------------------------------------------
// Abort and shutdown
// ---------------------------------------------------------------------------

#[test]
fn abort_cancels_pending_read() {
    let (tx, rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", format!("{base}/"), Mode::Buffered);
    engine.queue(&mut request).unwrap();

    rx.recv_timeout(WAIT).unwrap();
    request.abort();
    assert_eq!(expect_error(&mut request).code, ErrorCode::Aborted);
}

#[test]
fn abort_wakes_command_wait() {
    let (tx, _rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let (_engine, mut request) = incremental_put(&base, short_timeouts(), Some("4"));

    assert_eq!(next_event(&mut request), Event::PullBody { remaining: 4 });
    request.abort();
    assert_eq!(expect_error(&mut request).code, ErrorCode::Aborted);
}

#[test]
fn abort_before_queue_never_connects() {
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", "http://127.0.0.1:9/", Mode::Buffered);
    request.abort();
    engine.queue(&mut request).unwrap();
    assert_eq!(expect_error(&mut request).code, ErrorCode::Aborted);
}

#[test]
fn shutdown_aborts_in_flight_and_joins_workers() {
    let (tx, rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", format!("{base}/"), Mode::Buffered);
    engine.queue(&mut request).unwrap();
    rx.recv_timeout(WAIT).unwrap();
    assert_eq!(engine.live_workers(), 1);

    engine.shutdown().unwrap();
    assert_eq!(engine.live_workers(), 0);
    assert_eq!(expect_error(&mut request).code, ErrorCode::Aborted);
    assert!(request.recv_event_timeout(Duration::from_millis(50)).is_none());
}

#[test]
fn shutdown_fails_backlogged_requests() {
    let (tx, rx) = mpsc::channel();
    let base = scripted_peer(hold_open(tx));
    let engine = plain_engine(EngineConfig {
        max_workers: 1,
        ..short_timeouts()
    });

    let mut running = Request::new("GET", format!("{base}/"), Mode::Buffered);
    engine.queue(&mut running).unwrap();
    rx.recv_timeout(WAIT).unwrap();

    let mut waiting = Request::new("GET", format!("{base}/"), Mode::Buffered);
    engine.queue(&mut waiting).unwrap();

    engine.shutdown().unwrap();
    assert_eq!(expect_error(&mut running).code, ErrorCode::Aborted);
    assert_eq!(expect_error(&mut waiting).code, ErrorCode::Shutdown);
}

// ---------------------------------------------------------------------------
// Queueing twice
// ---------------------------------------------------------------------------

#[test]
fn requeue_while_in_flight_keeps_the_real_completion() {
    let base = scripted_peer(|mut socket| {
        read_head(&mut socket);
        std::thread::sleep(Duration::from_millis(300));
        let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    });
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", format!("{base}/slow"), Mode::Buffered);
    engine.queue(&mut request).unwrap();

    let err = engine.queue(&mut request).unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyQueued);
    assert!(!request.is_finished());

    match next_event(&mut request) {
        Event::Complete(response) => assert_eq!(response.body, b"hello"),
        other => panic!("expected complete, got {other:?}"),
    }
    assert!(request.is_finished());
    assert_eq!(request.recv_event(), None);
}

#[test]
fn invalid_url_is_reported_on_every_queue() {
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET", "not a url", Mode::Buffered);

    for _ in 0..2 {
        let err = engine.queue(&mut request).unwrap_err();
        assert_eq!(err.code, ErrorCode::Url);
        assert_eq!(request.recv_event(), Some(Event::Error(err)));
    }
    assert_eq!(request.recv_event(), None);
}

#[test]
fn invalid_method_is_rejected_before_any_connection() {
    let engine = plain_engine(short_timeouts());
    let mut request = Request::new("GET /evil", "http://127.0.0.1:1/", Mode::Buffered);
    let err = engine.queue(&mut request).unwrap_err();
    assert_eq!(err.code, ErrorCode::Url);
    assert_eq!(err.message, "Invalid method: GET /evil");
}
