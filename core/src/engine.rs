//! Engine lifecycle: start, queue, shutdown.
//!
//! # Design
//! `Engine` is an explicit handle rather than process-wide state. Starting it
//! builds the TLS connector and spawns the manager thread; everything after
//! that flows through the manager's command channel. The channel sender sits
//! behind a lock that `shutdown` empties, so once `Stop` has been sent no
//! further request can reach the manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorCode, TransferError};
use crate::exchange::Context;
use crate::manager::{shutdown_error, Manager, ManagerCommand};
use crate::request::Request;
use crate::tls::Connector;

pub struct Engine {
    manager: Mutex<Option<Sender<ManagerCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    live: Arc<AtomicUsize>,
    tls: bool,
}

impl Engine {
    /// Start an engine. A TLS setup failure is logged and leaves the engine
    /// running without TLS, so `https` requests fail with `no_tls`.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let connector = match Connector::from_config(&config.tls) {
            Ok(connector) => connector,
            Err(err) => {
                tracing::warn!(error = %err, "TLS setup failed, https requests will be rejected");
                Connector::disabled()
            }
        };
        Self::with_connector(config, connector)
    }

    /// Start an engine with a prepared TLS connector.
    pub fn with_connector(config: EngineConfig, connector: Connector) -> Result<Self, EngineError> {
        config.validate()?;
        let tls = connector.is_enabled();
        let ctx = Arc::new(Context { config, connector });
        let live = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = crossbeam_channel::unbounded();
        let manager = Manager::new(rx, tx.clone(), ctx, live.clone());
        let thread = thread::Builder::new()
            .name("cloudxfer-manager".to_string())
            .spawn(move || manager.run())
            .map_err(|source| EngineError::Spawn {
                thread: "manager",
                source,
            })?;

        tracing::debug!(tls, "engine started");
        Ok(Self {
            manager: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            live,
            tls,
        })
    }

    /// Hand `request` to the engine without blocking.
    ///
    /// On failure the error is returned and also delivered as the request's
    /// terminal error event; no worker is involved. Queueing a request whose
    /// exchange is still running only returns `already_queued`, leaving its
    /// event stream untouched.
    pub fn queue(&self, request: &mut Request) -> Result<(), TransferError> {
        let exchange = match request.take_exchange() {
            Ok(exchange) => exchange,
            Err(err) if err.code == ErrorCode::AlreadyQueued && request.in_flight() => {
                tracing::debug!(request = %request.id(), "request is already in flight");
                return Err(err);
            }
            Err(err) => return Err(request.reject(err)),
        };

        let manager = self.manager.lock();
        let Some(tx) = manager.as_ref() else {
            let err = shutdown_error();
            exchange.fail(err.clone());
            return Err(err);
        };

        tracing::debug!(request = %exchange.id, method = %exchange.method, url = %exchange.url, "queueing request");
        if let Err(err) = tx.send(ManagerCommand::QueueRequest(exchange)) {
            let err_event = shutdown_error();
            if let ManagerCommand::QueueRequest(exchange) = err.into_inner() {
                exchange.fail(err_event.clone());
            }
            return Err(err_event);
        }
        Ok(())
    }

    /// Stop the manager, abort in-flight exchanges and join every thread.
    /// Calls after the first are no-ops.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let Some(tx) = self.manager.lock().take() else {
            return Ok(());
        };
        tracing::debug!("engine shutting down");
        let _ = tx.send(ManagerCommand::Stop);
        drop(tx);

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            thread.join().map_err(|_| EngineError::ManagerPanicked)?;
        }
        tracing::debug!("engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.manager.lock().is_some()
    }

    /// Whether `https` requests can be served.
    pub fn has_tls(&self) -> bool {
        self.tls
    }

    /// Worker threads spawned and not yet joined.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "engine shutdown failed");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("tls", &self.tls)
            .field("live_workers", &self.live_workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::{Event, Mode};

    fn engine() -> Engine {
        Engine::with_connector(EngineConfig::default(), Connector::disabled()).unwrap()
    }

    #[test]
    fn invalid_url_is_rejected_without_a_worker() {
        let engine = engine();
        let mut request = Request::new("GET", "gopher://h/", Mode::Buffered);
        let err = engine.queue(&mut request).unwrap_err();
        assert_eq!(err.code, ErrorCode::Url);
        assert_eq!(request.recv_event(), Some(Event::Error(err)));
        assert_eq!(engine.live_workers(), 0);
    }

    #[test]
    fn queue_after_shutdown_is_rejected() {
        let engine = engine();
        engine.shutdown().unwrap();
        assert!(!engine.is_running());

        let mut request = Request::new("GET", "http://127.0.0.1:1/", Mode::Buffered);
        let err = engine.queue(&mut request).unwrap_err();
        assert_eq!(err.code, ErrorCode::Shutdown);
        assert!(matches!(request.recv_event(), Some(Event::Error(e)) if e.code == ErrorCode::Shutdown));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let engine = engine();
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();
        assert_eq!(engine.live_workers(), 0);
    }

    #[test]
    fn https_without_tls_fails_with_no_tls() {
        let engine = engine();
        assert!(!engine.has_tls());
        let mut request = Request::new("GET", "https://127.0.0.1:1/", Mode::Buffered);
        engine.queue(&mut request).unwrap();
        match request.recv_event() {
            Some(Event::Error(err)) => assert_eq!(err.code, ErrorCode::NoTls),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
