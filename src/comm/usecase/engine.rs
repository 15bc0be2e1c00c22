//! Block mapping: polling cycle controller and background run engine.
//!
//! Per controller (one per endpoint), a cycle reads every planned block sequentially in ascending
//! block id order over the controller's own reader session, decodes it against the field table
//! and hands one record per block to the sink dispatcher.
//!
//! Failure isolation:
//! - a failed or timed-out read marks every field of that block absent; the cycle continues
//! - a field that does not decode is marked absent; the rest of the block still decodes
//! - sink failures never reach the loop (fire-and-forget dispatch)
//!
//! A stop request lets the in-flight block read finish, skips the remaining blocks and moves the
//! controller to `Disconnected`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::comm::adapters::reader::{BlockReader, ReaderError};
use crate::comm::adapters::sink::SinkDispatcher;
use crate::comm::adapters::storage::hex_dump::export_raw;
use crate::comm::adapters::storage::settings::PollerSettingsV1;
use crate::comm::core::codec::decode_field;
use crate::comm::core::model::{
    ControllerState, CycleStats, CycleWarning, DecodedRecord, DecodedValue, Quality,
    RawBlockSnapshot, SourceBlockConfig,
};
use crate::comm::core::plan::{build_read_plan, PlanOptions, ReadJob, ReadPlan};
use crate::comm::core::table::BlockTable;
use crate::comm::error::{PollRunError, PollRunErrorKind};

const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub struct CycleOptions {
    pub read_timeout: Duration,
    /// Extra read attempts for a failed block within the same cycle.
    pub retry_count: u32,
    pub retry_pause: Duration,
    pub raw_export_dir: Option<PathBuf>,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(2000),
            retry_count: 0,
            retry_pause: DEFAULT_RETRY_PAUSE,
            raw_export_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerOptions {
    pub interval: Duration,
    pub plan: PlanOptions,
    pub cycle: CycleOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            plan: PlanOptions::default(),
            cycle: CycleOptions::default(),
        }
    }
}

impl ControllerOptions {
    pub fn from_settings(settings: &PollerSettingsV1) -> Self {
        Self {
            interval: settings.interval(),
            plan: PlanOptions {
                read_ceiling: settings.read_ceiling,
            },
            cycle: CycleOptions {
                read_timeout: settings.read_timeout(),
                retry_count: settings.retry_count,
                retry_pause: DEFAULT_RETRY_PAUSE,
                raw_export_dir: settings.raw_export_dir.clone(),
            },
        }
    }

    /// Longest a stop request may wait for the in-flight block (all attempts plus pauses).
    pub fn stop_grace(&self) -> Duration {
        let attempts = self.cycle.retry_count.saturating_add(1);
        self.cycle.read_timeout * attempts
            + self.cycle.retry_pause * self.cycle.retry_count
            + Duration::from_secs(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub records: Vec<DecodedRecord>,
    pub stats: CycleStats,
    pub warnings: Vec<CycleWarning>,
    pub stopped_early: bool,
    /// The reader reported the session as gone; the controller reconnects on the next tick.
    pub session_lost: bool,
}

pub async fn execute_cycle_once(
    reader: &dyn BlockReader,
    table: &BlockTable,
    plan: &ReadPlan,
    options: &CycleOptions,
    dispatcher: Option<&SinkDispatcher>,
    stop_rx: &watch::Receiver<bool>,
) -> CycleOutcome {
    let started = Instant::now();
    let mut records: Vec<DecodedRecord> = Vec::with_capacity(plan.jobs.len());
    let mut failed_blocks: Vec<u32> = Vec::new();
    let mut stopped_early = false;
    let mut session_lost = false;

    for job in &plan.jobs {
        if *stop_rx.borrow() {
            log::info!(
                "[poll] stop requested, skipping blocks from block={}",
                job.block_id
            );
            stopped_early = true;
            break;
        }

        let Some(block) = table.get(job.block_id) else {
            log::warn!("[poll] block={} planned but not configured", job.block_id);
            continue;
        };

        let (read, duration_ms) = read_with_retry(reader, job, options, stop_rx).await;
        let captured_at = Utc::now();

        let (snapshot, failure_quality) = match read {
            Ok(bytes) => {
                if bytes.len() < job.length as usize {
                    if job.uses_ceiling {
                        log::debug!(
                            "[poll] block={} returned {} of {} ceiling bytes",
                            job.block_id,
                            bytes.len(),
                            job.length
                        );
                    } else {
                        log::warn!(
                            "[poll] block={} short read: got={} requested={}",
                            job.block_id,
                            bytes.len(),
                            job.length
                        );
                    }
                }
                (
                    RawBlockSnapshot::succeeded(job.block_id, bytes, captured_at),
                    Quality::Ok,
                )
            }
            Err(err) => {
                log::warn!(
                    "[poll] block={} read failed after {}ms: {}",
                    job.block_id,
                    duration_ms,
                    err
                );
                if err == ReaderError::NotConnected {
                    session_lost = true;
                }
                failed_blocks.push(job.block_id);
                (
                    RawBlockSnapshot::failed(job.block_id, captured_at, err.to_string()),
                    err.quality(),
                )
            }
        };

        if let (Some(dir), true) = (&options.raw_export_dir, snapshot.read_succeeded) {
            if let Err(err) = export_raw(dir, &snapshot) {
                log::warn!(
                    "[poll] block={} raw export to {} failed: {}",
                    job.block_id,
                    dir.display(),
                    err
                );
            }
        }

        let record = decode_block(block, &snapshot, failure_quality);
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch(vec![record.clone()]);
        }
        records.push(record);
    }

    let stats = calc_stats(&records, failed_blocks.len(), elapsed_ms(started));
    let warnings = build_cycle_warnings(&stats, &failed_blocks, stopped_early);
    CycleOutcome {
        records,
        stats,
        warnings,
        stopped_early,
        session_lost,
    }
}

/// Decodes every configured field of `block` from one snapshot.
///
/// A failed snapshot yields every field absent with `failure_quality`; a short snapshot yields
/// `OutOfBounds` for exactly the fields it does not cover.
pub fn decode_block(
    block: &SourceBlockConfig,
    snapshot: &RawBlockSnapshot,
    failure_quality: Quality,
) -> DecodedRecord {
    let values = block
        .fields()
        .map(|field| {
            if !snapshot.read_succeeded {
                let message = snapshot.error.as_deref().unwrap_or("read failed");
                return DecodedValue::absent(field, failure_quality, message);
            }

            match decode_field(&snapshot.bytes, field) {
                Ok(value) => DecodedValue::decoded(field, value),
                Err(err) => {
                    log::warn!(
                        "[poll] block={} field={} offset={} type={} decode failed: {}",
                        block.block_id,
                        field.name,
                        field.offset,
                        field.type_token,
                        err
                    );
                    DecodedValue::absent(field, Quality::DecodeError, err.to_string())
                }
            }
        })
        .collect();

    DecodedRecord {
        block_id: block.block_id,
        display_name: block.display_name.clone(),
        captured_at: snapshot.captured_at,
        values,
    }
}

async fn read_with_retry(
    reader: &dyn BlockReader,
    job: &ReadJob,
    options: &CycleOptions,
    stop_rx: &watch::Receiver<bool>,
) -> (Result<Vec<u8>, ReaderError>, u32) {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        // The read itself is never cancelled by stop: the in-flight block completes.
        let read_fut = reader.read(job.block_id, job.start_offset, job.length);
        let result = match tokio::time::timeout(options.read_timeout, read_fut).await {
            Ok(inner) => inner,
            Err(_) => Err(ReaderError::Timeout),
        };

        let retryable = matches!(
            result,
            Err(ReaderError::Timeout) | Err(ReaderError::Transport { .. })
        );
        if !retryable || attempt >= options.retry_count || *stop_rx.borrow() {
            return (result, elapsed_ms(started));
        }

        attempt += 1;
        log::debug!(
            "[poll] block={} retry {}/{} after: {:?}",
            job.block_id,
            attempt,
            options.retry_count,
            result
        );

        tokio::select! {
            _ = wait_stop(stop_rx.clone()) => {
                return (result, elapsed_ms(started));
            }
            _ = tokio::time::sleep(options.retry_pause) => {}
        }
    }
}

async fn wait_stop(mut stop_rx: watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn elapsed_ms(started: Instant) -> u32 {
    started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}

fn calc_stats(records: &[DecodedRecord], blocks_failed: usize, duration_ms: u32) -> CycleStats {
    let mut stats = CycleStats {
        blocks: records.len() as u32,
        blocks_failed: blocks_failed as u32,
        duration_ms,
        ..CycleStats::default()
    };

    for value in records.iter().flat_map(|r| r.values.iter()) {
        stats.total += 1;
        match value.quality {
            Quality::Ok => stats.ok += 1,
            Quality::Timeout => stats.timeout += 1,
            Quality::TransportFailure => stats.transport_failure += 1,
            Quality::DecodeError => stats.decode_error += 1,
        }
    }

    stats
}

fn build_cycle_warnings(
    stats: &CycleStats,
    failed_blocks: &[u32],
    stopped_early: bool,
) -> Vec<CycleWarning> {
    let mut warnings: Vec<CycleWarning> = Vec::new();

    if stats.timeout > 0 {
        warnings.push(CycleWarning {
            code: "CYCLE_TIMEOUT".to_string(),
            message: format!("timeout count: {}", stats.timeout),
            block_id: None,
        });
    }

    if stats.transport_failure > 0 {
        warnings.push(CycleWarning {
            code: "CYCLE_TRANSPORT_FAILURE".to_string(),
            message: format!(
                "transport failure count: {} (blocks {:?})",
                stats.transport_failure, failed_blocks
            ),
            block_id: None,
        });
    }

    if stats.decode_error > 0 {
        warnings.push(CycleWarning {
            code: "CYCLE_DECODE_ERROR".to_string(),
            message: format!("decode error count: {}", stats.decode_error),
            block_id: None,
        });
    }

    if stats.blocks == 0 {
        warnings.push(CycleWarning {
            code: "CYCLE_NO_RECORDS".to_string(),
            message: "cycle produced no records".to_string(),
            block_id: None,
        });
    }

    if stopped_early {
        warnings.push(CycleWarning {
            code: "CYCLE_STOPPED_EARLY".to_string(),
            message: "stop requested before all blocks were read".to_string(),
            block_id: None,
        });
    }

    warnings
}

/// Connects, runs one cycle and disconnects; no sinks involved.
pub async fn run_single_cycle(
    reader: &dyn BlockReader,
    table: &BlockTable,
    options: &ControllerOptions,
) -> Result<CycleOutcome, ReaderError> {
    match tokio::time::timeout(options.cycle.read_timeout, reader.connect()).await {
        Ok(connected) => connected?,
        Err(_) => return Err(ReaderError::Timeout),
    }

    let (_stop_tx, stop_rx) = watch::channel(false);
    let plan = build_read_plan(table, &options.plan);
    let outcome = execute_cycle_once(reader, table, &plan, &options.cycle, None, &stop_rx).await;

    if let Err(err) = reader.disconnect().await {
        log::warn!("[poll] endpoint={} disconnect failed: {}", reader.endpoint(), err);
    }
    Ok(outcome)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatestSnapshot {
    pub endpoint: String,
    pub state: ControllerState,
    pub cycles: u64,
    pub records: Vec<DecodedRecord>,
    pub stats: CycleStats,
    pub warnings: Vec<CycleWarning>,
    pub updated_at_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl LatestSnapshot {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            state: ControllerState::Idle,
            cycles: 0,
            records: Vec::new(),
            stats: CycleStats::default(),
            warnings: Vec::new(),
            updated_at_utc: Utc::now(),
            last_error: None,
        }
    }
}

/// State machine `Idle → Connected → Cycling → Disconnected` around one reader session.
///
/// A failed handshake leaves the controller `Idle` and is retried on the next tick. A reader
/// reporting the session gone mid-cycle drops it back to `Idle` the same way. Only a stop request
/// ends the loop.
pub struct PollingController {
    reader: Arc<dyn BlockReader>,
    table: Arc<BlockTable>,
    plan: ReadPlan,
    options: ControllerOptions,
    dispatcher: Option<SinkDispatcher>,
    latest: Arc<Mutex<LatestSnapshot>>,
}

impl PollingController {
    pub fn new(
        reader: Arc<dyn BlockReader>,
        table: Arc<BlockTable>,
        options: ControllerOptions,
        dispatcher: Option<SinkDispatcher>,
    ) -> Self {
        let plan = build_read_plan(&table, &options.plan);
        let latest = Arc::new(Mutex::new(LatestSnapshot::new(reader.endpoint())));
        Self {
            reader,
            table,
            plan,
            options,
            dispatcher,
            latest,
        }
    }

    pub fn plan(&self) -> &ReadPlan {
        &self.plan
    }

    pub fn latest_handle(&self) -> Arc<Mutex<LatestSnapshot>> {
        Arc::clone(&self.latest)
    }

    pub fn state(&self) -> ControllerState {
        self.latest.lock().state
    }

    /// Runs until `stop_rx` turns true (or its sender is dropped); returns the final snapshot.
    pub async fn run(self, mut stop_rx: watch::Receiver<bool>) -> LatestSnapshot {
        let endpoint = self.reader.endpoint();
        log::info!(
            "[poll] endpoint={} start blocks={:?} intervalMs={}",
            endpoint,
            self.plan.jobs.iter().map(|j| j.block_id).collect::<Vec<_>>(),
            self.options.interval.as_millis()
        );

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if *stop_rx.borrow() {
                        break;
                    }

                    if self.state() == ControllerState::Idle {
                        match self.connect(&stop_rx).await {
                            Ok(()) => self.set_state(ControllerState::Connected),
                            Err(err) => {
                                log::warn!("[poll] endpoint={} connect failed: {}", endpoint, err);
                                self.latest.lock().last_error = Some(format!("connect: {err}"));
                                continue;
                            }
                        }
                    }

                    self.set_state(ControllerState::Cycling);
                    let outcome = execute_cycle_once(
                        self.reader.as_ref(),
                        &self.table,
                        &self.plan,
                        &self.options.cycle,
                        self.dispatcher.as_ref(),
                        &stop_rx,
                    )
                    .await;

                    let stopped_early = outcome.stopped_early;
                    let session_lost = outcome.session_lost;
                    self.publish(outcome);

                    if stopped_early {
                        break;
                    }
                    if session_lost {
                        log::warn!("[poll] endpoint={} session lost, reconnecting on next tick", endpoint);
                        self.set_state(ControllerState::Idle);
                    }
                }
            }
        }

        self.shutdown().await
    }

    async fn connect(&self, stop_rx: &watch::Receiver<bool>) -> Result<(), ReaderError> {
        let connect = self.reader.connect();
        tokio::select! {
            _ = wait_stop(stop_rx.clone()) => Err(ReaderError::Transport {
                message: "stop requested".to_string(),
            }),
            res = tokio::time::timeout(self.options.cycle.read_timeout, connect) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(ReaderError::Timeout),
                }
            }
        }
    }

    async fn shutdown(&self) -> LatestSnapshot {
        let endpoint = self.reader.endpoint();
        if self.state() != ControllerState::Idle {
            match tokio::time::timeout(self.options.cycle.read_timeout, self.reader.disconnect())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("[poll] endpoint={} disconnect failed: {}", endpoint, err),
                Err(_) => log::warn!("[poll] endpoint={} disconnect timed out", endpoint),
            }
        }
        self.set_state(ControllerState::Disconnected);
        log::info!("[poll] endpoint={} stopped", endpoint);
        self.latest.lock().clone()
    }

    fn publish(&self, outcome: CycleOutcome) {
        let last_error = outcome
            .records
            .iter()
            .flat_map(|r| r.values.iter().map(move |v| (r.block_id, v)))
            .find_map(|(block_id, v)| {
                v.error
                    .as_ref()
                    .map(|e| format!("block={} field={} offset={}: {}", block_id, v.field_name, v.offset, e))
            });

        let mut guard = self.latest.lock();
        guard.cycles += 1;
        guard.updated_at_utc = outcome
            .records
            .first()
            .map(|r| r.captured_at)
            .unwrap_or_else(Utc::now);
        guard.records = outcome.records;
        guard.stats = outcome.stats;
        guard.warnings = outcome.warnings;
        guard.last_error = last_error;
    }

    fn set_state(&self, next: ControllerState) {
        let mut guard = self.latest.lock();
        if guard.state != next {
            log::info!(
                "[poll] endpoint={} state {:?} -> {:?}",
                guard.endpoint,
                guard.state,
                next
            );
            guard.state = next;
        }
    }
}

struct RunHandle {
    endpoint: String,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<LatestSnapshot>,
    latest: Arc<Mutex<LatestSnapshot>>,
    stop_grace: Duration,
}

/// Background polling engine: any number of controllers keyed by run id, one shared dispatcher.
///
/// - `start_run` spawns the controller and returns immediately
/// - `latest`/`state` read the cached snapshot and never trigger a read
/// - `stop_run` waits for the in-flight block, bounded by the controller's stop grace
pub struct PollRunEngine {
    runs: Mutex<HashMap<Uuid, RunHandle>>,
    dispatcher: Option<SinkDispatcher>,
}

impl PollRunEngine {
    pub fn new(dispatcher: Option<SinkDispatcher>) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            dispatcher,
        }
    }

    pub fn start_run(
        &self,
        reader: Arc<dyn BlockReader>,
        table: Arc<BlockTable>,
        options: ControllerOptions,
    ) -> Uuid {
        let run_id = Uuid::new_v4();
        let endpoint = reader.endpoint();
        let stop_grace = options.stop_grace();

        if self.runs.lock().values().any(|h| h.endpoint == endpoint) {
            log::warn!("[poll] endpoint={} already has an active run", endpoint);
        }

        let controller = PollingController::new(reader, table, options, self.dispatcher.clone());
        let latest = controller.latest_handle();
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(controller.run(stop_rx));

        log::info!("[poll] runId={} endpoint={} started", run_id, endpoint);
        self.runs.lock().insert(
            run_id,
            RunHandle {
                endpoint,
                stop_tx,
                join,
                latest,
                stop_grace,
            },
        );
        run_id
    }

    pub fn run_ids(&self) -> Vec<Uuid> {
        self.runs.lock().keys().copied().collect()
    }

    pub fn latest(&self, run_id: Uuid) -> Option<LatestSnapshot> {
        let latest = {
            let guard = self.runs.lock();
            guard.get(&run_id).map(|h| Arc::clone(&h.latest))
        }?;
        let snapshot = latest.lock().clone();
        Some(snapshot)
    }

    pub fn state(&self, run_id: Uuid) -> Option<ControllerState> {
        self.latest(run_id).map(|s| s.state)
    }

    pub async fn stop_run(&self, run_id: Uuid) -> Result<LatestSnapshot, PollRunError> {
        let handle = self.runs.lock().remove(&run_id);
        let Some(mut handle) = handle else {
            return Err(PollRunError {
                kind: PollRunErrorKind::RunNotFound,
                message: "run not found".to_string(),
                run_id: Some(run_id.to_string()),
            });
        };

        let _ = handle.stop_tx.send(true);
        match tokio::time::timeout(handle.stop_grace, &mut handle.join).await {
            Ok(Ok(snapshot)) => {
                log::info!("[poll] runId={} endpoint={} stopped", run_id, handle.endpoint);
                Ok(snapshot)
            }
            Ok(Err(join_err)) => Err(PollRunError {
                kind: PollRunErrorKind::InternalError,
                message: format!("controller task failed: {join_err}"),
                run_id: Some(run_id.to_string()),
            }),
            Err(_) => {
                handle.join.abort();
                log::warn!(
                    "[poll] runId={} endpoint={} did not stop within {}ms, aborted",
                    run_id,
                    handle.endpoint,
                    handle.stop_grace.as_millis()
                );
                Err(PollRunError {
                    kind: PollRunErrorKind::StopTimeout,
                    message: format!("not stopped within {}ms", handle.stop_grace.as_millis()),
                    run_id: Some(run_id.to_string()),
                })
            }
        }
    }

    pub async fn stop_all(&self) -> Vec<(Uuid, Result<LatestSnapshot, PollRunError>)> {
        let mut out = Vec::new();
        for run_id in self.run_ids() {
            let result = self.stop_run(run_id).await;
            out.push((run_id, result));
        }
        out
    }
}

impl Default for PollRunEngine {
    fn default() -> Self {
        Self::new(None)
    }
}
