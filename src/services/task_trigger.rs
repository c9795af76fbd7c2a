//! Downstream task dispatch driven by message timestamps.
//!
//! Broker timestamps act as the clock for the missed-check-in and timeout
//! sweeps. Each partition reports the latest timestamp it has processed, the
//! slowest partition defines the reference time, and a tick is dispatched for
//! every minute the reference crosses.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::monitors::schedule::truncate_to_minute;

pub const TICK_TASKS: [&str; 2] = ["check_missing", "check_timeout"];

/// Most minutes dispatched for a single clock advance. Older minutes of a
/// larger gap are skipped.
pub const MAX_BACKFILL_MINUTES: i64 = 60;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Failed to dispatch tick {tick}: {source}")]
    Dispatch {
        tick: DateTime<Utc>,
        #[source]
        source: reqwest::Error,
    },
    #[error("Tick {tick} rejected with HTTP {status}")]
    Rejected {
        tick: DateTime<Utc>,
        status: reqwest::StatusCode,
    },
}

/// Best-effort notification that a message at `ts` has been handled.
#[async_trait]
pub trait TaskTrigger: Send + Sync {
    async fn trigger(&self, ts: DateTime<Utc>, partition: u16) -> Result<(), TriggerError>;
}

#[derive(Debug, Default)]
struct ClockState {
    partitions: HashMap<u16, DateTime<Utc>>,
    last_tick: Option<DateTime<Utc>>,
}

impl ClockState {
    /// Records `ts` for `partition` and returns the minute ticks that became
    /// due, oldest first. Timestamps ahead of `now` count as `now`.
    fn observe(&mut self, ts: DateTime<Utc>, partition: u16, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let ts = ts.min(now);
        let latest = self.partitions.entry(partition).or_insert(ts);
        if ts > *latest {
            *latest = ts;
        }

        let Some(reference) = self.partitions.values().min().copied() else {
            return Vec::new();
        };
        let reference = truncate_to_minute(reference);

        let Some(last_tick) = self.last_tick else {
            self.last_tick = Some(reference);
            return Vec::new();
        };
        if reference <= last_tick {
            return Vec::new();
        }

        let mut tick = last_tick + Duration::minutes(1);
        let earliest = reference - Duration::minutes(MAX_BACKFILL_MINUTES - 1);
        if tick < earliest {
            warn!(
                skipped = (earliest - tick).num_minutes(),
                from = %tick.to_rfc3339(),
                "Clock jumped ahead, skipping old ticks."
            );
            tick = earliest;
        }

        let mut ticks = Vec::new();
        while tick <= reference {
            ticks.push(tick);
            tick += Duration::minutes(1);
        }
        self.last_tick = Some(reference);
        ticks
    }
}

#[derive(Serialize)]
struct TickPayload<'a> {
    tick: String,
    tasks: &'a [&'a str],
}

/// Default trigger: logs each tick and POSTs it to a webhook when one is
/// configured.
pub struct ClockTicker {
    state: Mutex<ClockState>,
    client: Client,
    webhook_url: Option<String>,
}

impl ClockTicker {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            state: Mutex::new(ClockState::default()),
            client: Client::new(),
            webhook_url,
        }
    }

    pub async fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_tick
    }

    async fn dispatch(&self, tick: DateTime<Utc>) -> Result<(), TriggerError> {
        info!(tick = %tick.to_rfc3339(), "Dispatching monitor tasks.");
        let Some(url) = &self.webhook_url else {
            return Ok(());
        };
        let payload = TickPayload {
            tick: tick.to_rfc3339(),
            tasks: &TICK_TASKS,
        };
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|source| TriggerError::Dispatch { tick, source })?;
        if !response.status().is_success() {
            return Err(TriggerError::Rejected {
                tick,
                status: response.status(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TaskTrigger for ClockTicker {
    async fn trigger(&self, ts: DateTime<Utc>, partition: u16) -> Result<(), TriggerError> {
        let ticks = self.state.lock().await.observe(ts, partition, Utc::now());
        if ticks.len() > 1 {
            debug!(count = ticks.len(), "Backfilling skipped clock ticks.");
        }
        for tick in ticks {
            self.dispatch(tick).await?;
        }
        Ok(())
    }
}
