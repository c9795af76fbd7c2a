//! Newline-delimited JSON input, standing in for the broker.

use std::collections::HashMap;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::consumer::decoder::EnvelopeHint;
use crate::server::worker_pool::{ConsumedMessage, PoolError, WorkerPool};

/// Feeds every non-blank line of `reader` into the pool and returns how many
/// messages were submitted. Messages are stamped with their ingestion time,
/// the same way a broker stamps produced records.
pub async fn pump_lines<R>(reader: R, pool: &WorkerPool) -> Result<u64, SourceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut next_offsets: HashMap<u16, u64> = HashMap::new();
    let mut submitted = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let payload = line.as_bytes().to_vec();
        let hint = EnvelopeHint::peek(&payload);
        let partition = match hint.project_id {
            Some(project_id) => pool.partition_for(project_id),
            None => 0,
        };
        let offset = next_offsets.entry(partition).or_insert(0);
        let message = ConsumedMessage {
            partition,
            offset: *offset,
            timestamp: Utc::now(),
            payload,
        };
        *offset += 1;

        pool.submit(message).await?;
        submitted += 1;
    }

    debug!(submitted, "Input exhausted.");
    Ok(submitted)
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl SourceError {
    pub fn log(&self) {
        warn!(error = %self, "Input source stopped.");
    }
}
