//! Helpers shared by the integration test binaries.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use cloudxfer_core::{Connector, Engine, EngineConfig, Event, Request};

static TRACING: Once = Once::new();

/// Route engine logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Start the mock blob server on a random port and return its address.
pub fn start_mock_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

/// Plaintext engine with short timeouts.
pub fn plain_engine(config: EngineConfig) -> Engine {
    init_tracing();
    Engine::with_connector(config, Connector::disabled()).unwrap()
}

pub fn short_timeouts() -> EngineConfig {
    EngineConfig {
        io_timeout_secs: 5,
        connect_timeout_secs: 5,
        command_timeout_secs: 5,
        ..EngineConfig::default()
    }
}

pub const WAIT: Duration = Duration::from_secs(10);

/// Next event or a test failure after `WAIT`.
pub fn next_event(request: &mut Request) -> Event {
    request
        .recv_event_timeout(WAIT)
        .unwrap_or_else(|| panic!("no event for {request:?}"))
}

/// Drain events until the terminal one.
pub fn terminal_event(request: &mut Request) -> Event {
    loop {
        let event = next_event(request);
        if event.is_terminal() {
            return event;
        }
    }
}
