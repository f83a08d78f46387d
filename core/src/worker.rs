//! Worker threads: one exchange at a time over at most one connection.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::connection::Connection;
use crate::exchange::{Context, Exchange, Reuse};
use crate::manager::ManagerCommand;

pub(crate) type WorkerId = u64;

pub(crate) enum WorkerCommand {
    DoRequest(Exchange),
    Stop,
}

pub(crate) struct Worker {
    id: WorkerId,
    commands: Receiver<WorkerCommand>,
    manager: Sender<ManagerCommand>,
    ctx: Arc<Context>,
    connection: Option<Connection>,
}

impl Worker {
    pub(crate) fn spawn(
        id: WorkerId,
        commands: Receiver<WorkerCommand>,
        manager: Sender<ManagerCommand>,
        ctx: Arc<Context>,
    ) -> std::io::Result<JoinHandle<()>> {
        let worker = Worker {
            id,
            commands,
            manager,
            ctx,
            connection: None,
        };
        thread::Builder::new()
            .name(format!("cloudxfer-worker-{id}"))
            .spawn(move || worker.run())
    }

    fn run(mut self) {
        tracing::debug!(worker = self.id, "worker started");

        while let Ok(command) = self.commands.recv() {
            match command {
                WorkerCommand::DoRequest(exchange) => {
                    if self.do_request(exchange) == Reuse::Close {
                        break;
                    }
                }
                WorkerCommand::Stop => {
                    tracing::debug!(worker = self.id, "stop requested");
                    break;
                }
            }
        }

        self.connection = None;
        tracing::debug!(worker = self.id, "worker finished");
        let _ = self.manager.send(ManagerCommand::WorkerStopped(self.id));
    }

    fn do_request(&mut self, exchange: Exchange) -> Reuse {
        if let Some(conn) = &self.connection {
            if !conn.target().matches(&exchange.target) {
                tracing::debug!(worker = self.id, "dropping connection to a different target");
                self.connection = None;
            }
        }
        exchange.run(&mut self.connection, &self.ctx)
    }
}
