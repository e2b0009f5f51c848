//! Background search indexer.
//!
//! Writers enqueue index updates on a bounded channel and return without
//! waiting; one worker thread applies them to the [`SearchIndex`] in order.
//! A barrier command lets callers wait until every earlier update has been
//! applied, which bounds how stale search results can be.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

use crate::error::{ExecutionError, NeotomaError, NeotomaResult};
use crate::ids::EntityId;
use crate::search::{SearchDocument, SearchIndex};

pub(crate) enum IndexCommand {
    Upsert(Box<SearchDocument>),
    Remove(EntityId),
    Barrier(Sender<()>),
}

pub(crate) struct IndexWorker {
    tx: Option<Sender<IndexCommand>>,
    handle: Option<JoinHandle<()>>,
    capacity: usize,
}

impl IndexWorker {
    pub(crate) fn start(index: Arc<SearchIndex>, capacity: usize) -> NeotomaResult<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<IndexCommand>(capacity);

        let handle = thread::Builder::new()
            .name("neotoma-indexer".to_string())
            .spawn(move || {
                for command in rx {
                    match command {
                        IndexCommand::Upsert(doc) => {
                            let entity_id = doc.snapshot.entity_id.clone();
                            if let Err(e) = index.upsert(*doc) {
                                tracing::warn!(%entity_id, error = %e, "index upsert failed");
                            } else {
                                tracing::debug!(%entity_id, "indexed snapshot");
                            }
                        }
                        IndexCommand::Remove(entity_id) => {
                            if let Err(e) = index.remove(&entity_id) {
                                tracing::warn!(%entity_id, error = %e, "index remove failed");
                            }
                        }
                        IndexCommand::Barrier(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
            })
            .map_err(|e| NeotomaError::internal(format!("failed to spawn indexer: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            capacity,
        })
    }

    fn sender(&self) -> NeotomaResult<&Sender<IndexCommand>> {
        self.tx
            .as_ref()
            .ok_or_else(|| NeotomaError::internal("indexer is shut down"))
    }

    /// Enqueues a command, blocking while the queue is full.
    pub(crate) fn submit(&self, command: IndexCommand) -> NeotomaResult<()> {
        let tx = self.sender()?;
        match tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                tracing::debug!(capacity = self.capacity, "index queue full; waiting");
                tx.send(command)
                    .map_err(|_| NeotomaError::internal("indexer disconnected"))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(NeotomaError::internal("indexer disconnected"))
            }
        }
    }

    /// Waits until every command enqueued before this call has been applied.
    pub(crate) fn barrier(&self, timeout: Duration) -> NeotomaResult<()> {
        let deadline = Instant::now() + timeout;
        let timed_out = || {
            NeotomaError::from(ExecutionError::IndexTimeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        };

        let (reply_tx, reply_rx) = bounded::<()>(1);
        match self.sender()?.send_timeout(IndexCommand::Barrier(reply_tx), timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(timed_out()),
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(NeotomaError::internal("indexer disconnected"));
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match reply_rx.recv_timeout(remaining) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(timed_out()),
            Err(RecvTimeoutError::Disconnected) => {
                Err(NeotomaError::internal("indexer disconnected"))
            }
        }
    }

    /// Number of commands waiting to be applied.
    pub(crate) fn queue_depth(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit.
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
