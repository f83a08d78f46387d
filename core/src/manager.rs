//! The manager thread: owns the worker registry.
//!
//! # Design
//! All registry mutation happens on the manager thread in response to
//! `ManagerCommand`s, so the `HashMap` needs no lock. Each queued exchange
//! gets a fresh worker; once `max_workers` are alive further exchanges wait
//! in a FIFO backlog until a worker stops.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::abort::AbortHandle;
use crate::error::{ErrorCode, TransferError};
use crate::exchange::{Context, Exchange};
use crate::worker::{Worker, WorkerCommand, WorkerId};

pub(crate) enum ManagerCommand {
    QueueRequest(Exchange),
    WorkerStopped(WorkerId),
    Stop,
}

struct WorkerHandle {
    commands: Sender<WorkerCommand>,
    thread: JoinHandle<()>,
    abort: AbortHandle,
}

pub(crate) struct Manager {
    commands: Receiver<ManagerCommand>,
    /// Handed to workers so they can report back.
    notify: Sender<ManagerCommand>,
    ctx: Arc<Context>,
    workers: HashMap<WorkerId, WorkerHandle>,
    backlog: VecDeque<Exchange>,
    next_id: WorkerId,
    live: Arc<AtomicUsize>,
}

pub(crate) fn shutdown_error() -> TransferError {
    TransferError::new(ErrorCode::Shutdown, "Engine is shut down")
}

impl Manager {
    pub(crate) fn new(
        commands: Receiver<ManagerCommand>,
        notify: Sender<ManagerCommand>,
        ctx: Arc<Context>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            commands,
            notify,
            ctx,
            workers: HashMap::new(),
            backlog: VecDeque::new(),
            next_id: 0,
            live,
        }
    }

    pub(crate) fn run(mut self) {
        tracing::debug!("manager started");
        while let Ok(command) = self.commands.recv() {
            match command {
                ManagerCommand::QueueRequest(exchange) => self.queue(exchange),
                ManagerCommand::WorkerStopped(id) => {
                    self.reap(id);
                    self.drain_backlog();
                }
                ManagerCommand::Stop => {
                    self.stop();
                    break;
                }
            }
        }
        tracing::debug!("manager finished");
    }

    fn queue(&mut self, exchange: Exchange) {
        if self.workers.len() >= self.ctx.config.max_workers {
            tracing::debug!(
                request = %exchange.id,
                backlog = self.backlog.len() + 1,
                "all workers busy, request waits"
            );
            self.backlog.push_back(exchange);
            return;
        }
        self.dispatch(exchange);
    }

    fn drain_backlog(&mut self) {
        while self.workers.len() < self.ctx.config.max_workers {
            let Some(exchange) = self.backlog.pop_front() else {
                break;
            };
            self.dispatch(exchange);
        }
    }

    fn dispatch(&mut self, exchange: Exchange) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = match Worker::spawn(id, rx, self.notify.clone(), self.ctx.clone()) {
            Ok(thread) => thread,
            Err(err) => {
                tracing::warn!(worker = id, error = %err, "cannot spawn worker");
                exchange.fail(TransferError::caused_by(
                    ErrorCode::ConnFail,
                    "Cannot start worker: ",
                    err,
                ));
                return;
            }
        };
        self.live.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(worker = id, request = %exchange.id, url = %exchange.url, "dispatching request");
        let abort = exchange.abort.clone();
        if let Err(err) = tx.send(WorkerCommand::DoRequest(exchange)) {
            if let WorkerCommand::DoRequest(exchange) = err.into_inner() {
                exchange.fail(shutdown_error());
            }
        }
        self.workers.insert(
            id,
            WorkerHandle {
                commands: tx,
                thread,
                abort,
            },
        );
    }

    fn reap(&mut self, id: WorkerId) {
        let Some(handle) = self.workers.remove(&id) else {
            return;
        };
        self.join(id, handle);
    }

    fn join(&self, id: WorkerId, handle: WorkerHandle) {
        if handle.thread.join().is_err() {
            tracing::warn!(worker = id, "worker panicked");
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    fn stop(&mut self) {
        tracing::debug!(workers = self.workers.len(), backlog = self.backlog.len(), "stopping");

        for handle in self.workers.values() {
            handle.abort.abort();
            let _ = handle.commands.send(WorkerCommand::Stop);
        }
        for (id, handle) in std::mem::take(&mut self.workers) {
            self.join(id, handle);
        }
        for exchange in self.backlog.drain(..) {
            exchange.fail(shutdown_error());
        }
    }
}
