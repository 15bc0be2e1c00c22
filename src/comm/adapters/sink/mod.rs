//! Sinks and the sink dispatcher.
//!
//! The polling loop hands batches to [`SinkDispatcher::dispatch`], which never waits: batches go
//! to a bounded queue drained by one worker task, and a full queue drops the batch with a
//! warning. Each sink call runs under its own timeout; failures are logged per sink and never
//! retried within the same cycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::comm::core::model::DecodedRecord;

pub mod jsonl;
pub mod log_sink;
pub mod memory;
pub mod text_file;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("serialize error: {message}")]
    Serialize { message: String },

    #[error("rejected: {message}")]
    Rejected { message: String },
}

impl From<std::io::Error> for SinkError {
    fn from(value: std::io::Error) -> Self {
        SinkError::Io {
            message: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(value: serde_json::Error) -> Self {
        SinkError::Serialize {
            message: value.to_string(),
        }
    }
}

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    fn write<'a>(&'a self, records: &'a [DecodedRecord]) -> SinkFuture<'a>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkOutcome {
    pub sink: String,
    pub result: Result<(), SinkError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    Dropped,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub batches_queued: u64,
    pub batches_dropped: u64,
    pub batches_written: u64,
    pub sink_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failures: AtomicU64,
}

enum Command {
    Batch(Vec<DecodedRecord>),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct SinkDispatcher {
    tx: mpsc::Sender<Command>,
    sinks: Arc<Vec<Arc<dyn RecordSink>>>,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl SinkDispatcher {
    /// Spawns the worker task; must be called inside a tokio runtime.
    pub fn new(sinks: Vec<Arc<dyn RecordSink>>, capacity: usize, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));
        let sinks = Arc::new(sinks);
        let counters = Arc::new(Counters::default());

        let worker_sinks = Arc::clone(&sinks);
        let worker_counters = Arc::clone(&counters);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Batch(records) => {
                        let outcomes = write_all(&worker_sinks, &records, timeout).await;
                        let failures = outcomes.iter().filter(|o| o.result.is_err()).count();
                        worker_counters.written.fetch_add(1, Ordering::Relaxed);
                        worker_counters
                            .failures
                            .fetch_add(failures as u64, Ordering::Relaxed);
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            log::debug!("[sink] dispatcher worker exited");
        });

        Self {
            tx,
            sinks,
            timeout,
            counters,
        }
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Fire-and-forget hand-off; never blocks the caller.
    pub fn dispatch(&self, records: Vec<DecodedRecord>) -> DispatchOutcome {
        if records.is_empty() || self.sinks.is_empty() {
            return DispatchOutcome::Queued;
        }

        let blocks: Vec<u32> = records.iter().map(|r| r.block_id).collect();
        match self.tx.try_send(Command::Batch(records)) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[sink] queue full, dropping batch blocks={blocks:?}");
                DispatchOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[sink] dispatcher closed, dropping batch blocks={blocks:?}");
                DispatchOutcome::Dropped
            }
        }
    }

    /// Writes synchronously to every sink, bypassing the queue; returns one outcome per sink.
    pub async fn write_now(&self, records: &[DecodedRecord]) -> Vec<SinkOutcome> {
        write_all(&self.sinks, records, self.timeout).await
    }

    /// Resolves once every batch queued before this call has been handed to the sinks.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            batches_queued: self.counters.queued.load(Ordering::Relaxed),
            batches_dropped: self.counters.dropped.load(Ordering::Relaxed),
            batches_written: self.counters.written.load(Ordering::Relaxed),
            sink_failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

async fn write_all(
    sinks: &[Arc<dyn RecordSink>],
    records: &[DecodedRecord],
    timeout: Duration,
) -> Vec<SinkOutcome> {
    let mut outcomes = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let result = match tokio::time::timeout(timeout, sink.write(records)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        if let Err(err) = &result {
            let blocks: Vec<u32> = records.iter().map(|r| r.block_id).collect();
            log::warn!("[sink] sink={} blocks={blocks:?} failed: {err}", sink.name());
        }

        outcomes.push(SinkOutcome {
            sink: sink.name().to_string(),
            result,
        });
    }
    outcomes
}
