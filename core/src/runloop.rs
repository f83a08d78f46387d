//! Callback delivery on the caller's thread.
//!
//! A `RunLoop` owns registered requests and waits on all of their event
//! channels at once. Each event is handed to the request's callback on the
//! thread that drives the loop, never on a worker thread. The callback gets
//! the request back mutably so it can answer with `push_body` or `proceed`.

use std::time::{Duration, Instant};

use crossbeam_channel::Select;

use crate::request::{Request, RequestId};
use crate::types::Event;

pub type EventCallback = Box<dyn FnMut(&mut Request, Event) + Send>;

struct Entry {
    request: Request,
    callback: EventCallback,
}

#[derive(Default)]
pub struct RunLoop {
    entries: Vec<Entry>,
}

impl RunLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `request`; `callback` sees every event it receives
    /// from now on. The request is dropped after its terminal event.
    pub fn register<F>(&mut self, request: Request, callback: F) -> RequestId
    where
        F: FnMut(&mut Request, Event) + Send + 'static,
    {
        let id = request.id();
        self.entries.push(Entry {
            request,
            callback: Box::new(callback),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver at most one event, waiting up to `timeout` for one to arrive.
    /// Returns whether an event was delivered.
    pub fn run_once(&mut self, timeout: Duration) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let index = {
            let mut select = Select::new();
            for entry in &self.entries {
                select.recv(entry.request.events());
            }
            match select.ready_timeout(timeout) {
                Ok(index) => index,
                Err(_) => return false,
            }
        };

        let entry = &mut self.entries[index];
        let Some(event) = entry.request.try_recv_event() else {
            return false;
        };
        let terminal = event.is_terminal();
        tracing::trace!(request = %entry.request.id(), event = event.name(), "dispatching event");
        (entry.callback)(&mut entry.request, event);

        if terminal {
            self.entries.swap_remove(index);
        }
        true
    }

    /// Deliver events until every registered request has finished or
    /// `timeout` elapses. Returns whether the loop ran dry.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.entries.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.run_once(remaining) && Instant::now() >= deadline {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop")
            .field("requests", &self.entries.len())
            .finish()
    }
}
