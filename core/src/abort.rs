//! Cancellation of in-flight exchanges.
//!
//! An `AbortHandle` is shared between a `Request`, the worker running it and
//! the manager. Aborting sets a flag, shuts the attached socket down so any
//! blocked read or write returns, and disconnects a signal channel so a
//! worker waiting for a caller command wakes up.
//!
//! Cancellation is cooperative: before a connection is attached the flag is
//! only noticed at the next state boundary of the exchange.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

#[derive(Debug)]
struct AbortState {
    aborted: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
    // Dropped on abort; never carries a message.
    signal_tx: Mutex<Option<Sender<()>>>,
    signal_rx: Receiver<()>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(AbortState {
                aborted: AtomicBool::new(false),
                socket: Mutex::new(None),
                signal_tx: Mutex::new(Some(tx)),
                signal_rx: rx,
            }),
        }
    }

    /// Mark the exchange for closure and cancel its pending I/O.
    pub fn abort(&self) {
        if self.inner.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(socket) = self.inner.socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.inner.signal_tx.lock().take();
        tracing::debug!("exchange aborted");
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Register the socket whose I/O `abort` should cancel. A socket attached
    /// after the abort is shut down immediately.
    pub(crate) fn attach(&self, socket: &TcpStream) {
        let clone = match socket.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                tracing::warn!(error = %err, "cannot clone socket for abort handle");
                return;
            }
        };
        let mut slot = self.inner.socket.lock();
        if self.is_aborted() {
            let _ = clone.shutdown(Shutdown::Both);
        } else {
            *slot = Some(clone);
        }
    }

    pub(crate) fn detach(&self) {
        self.inner.socket.lock().take();
    }

    /// Becomes ready (disconnected) once `abort` has been called.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal_rx
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}
