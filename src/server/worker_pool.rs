//! Partitioned message processing.
//!
//! Each partition gets its own bounded queue and task, so messages of one
//! partition are handled strictly in order while partitions run in parallel.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const QUEUE_CAPACITY: usize = 1024;

/// A raw message as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    pub partition: u16,
    pub offset: u64,
    /// Broker timestamp; drives the task trigger clock.
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message. Failures are the handler's to log; nothing
    /// propagates back into the pool.
    async fn handle(&self, message: &ConsumedMessage);
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Partition {0} is not served by this pool")]
    UnknownPartition(u16),
    #[error("Worker for partition {0} has stopped")]
    WorkerStopped(u16),
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<ConsumedMessage>>,
    handles: Vec<JoinHandle<()>>,
    /// Next offset to consume per partition, advanced after handling.
    committed: Arc<DashMap<u16, u64>>,
}

impl WorkerPool {
    pub fn start<H: MessageHandler + 'static>(handler: Arc<H>, partitions: u16) -> Self {
        let committed = Arc::new(DashMap::new());
        let mut senders = Vec::with_capacity(partitions as usize);
        let mut handles = Vec::with_capacity(partitions as usize);

        for partition in 0..partitions {
            let (tx, mut rx) = mpsc::channel::<ConsumedMessage>(QUEUE_CAPACITY);
            let handler = Arc::clone(&handler);
            let committed = Arc::clone(&committed);
            handles.push(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    handler.handle(&message).await;
                    committed.insert(partition, message.offset + 1);
                }
                debug!(partition, "Partition worker drained.");
            }));
            senders.push(tx);
        }

        info!(partitions, "Worker pool started.");
        WorkerPool {
            senders,
            handles,
            committed,
        }
    }

    pub fn partitions(&self) -> u16 {
        self.senders.len() as u16
    }

    /// Partition serving messages of `project_id`.
    pub fn partition_for(&self, project_id: i32) -> u16 {
        let partitions = self.senders.len().max(1) as i64;
        (i64::from(project_id).rem_euclid(partitions)) as u16
    }

    pub async fn submit(&self, message: ConsumedMessage) -> Result<(), PoolError> {
        let partition = message.partition;
        let sender = self
            .senders
            .get(partition as usize)
            .ok_or(PoolError::UnknownPartition(partition))?;
        sender
            .send(message)
            .await
            .map_err(|_| PoolError::WorkerStopped(partition))
    }

    pub fn committed_offset(&self, partition: u16) -> Option<u64> {
        self.committed.get(&partition).map(|offset| *offset)
    }

    /// Stops accepting messages, waits until every queued message is handled
    /// and returns the final committed offsets.
    pub async fn shutdown(self) -> BTreeMap<u16, u64> {
        drop(self.senders);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Partition worker panicked.");
            }
        }
        info!("Worker pool stopped.");
        self.committed
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}
