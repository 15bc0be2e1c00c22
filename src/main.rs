//! plc-block-mapper CLI
//!
//! ```bash
//! # Poll the blocks of a field table every second, replaying raw exports
//! plc-block-mapper --field-table demos/field_tables --snapshot-dir demos/raw poll
//!
//! # One cycle, records printed as JSON
//! plc-block-mapper --settings demos/poller.v1.json once
//!
//! # Heuristic scan of blocks with no field table
//! plc-block-mapper --snapshot-dir demos/raw scan --blocks 100,102
//!
//! # Validate a field table
//! plc-block-mapper check demos/field_tables/dbs.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use plc_block_mapper::comm::adapters::config_loader::{load_field_table, LoadReport};
use plc_block_mapper::comm::adapters::reader::mock::SimulatedReader;
use plc_block_mapper::comm::adapters::reader::snapshot::HexSnapshotReader;
use plc_block_mapper::comm::adapters::reader::BlockReader;
use plc_block_mapper::comm::adapters::sink::jsonl::JsonLinesSink;
use plc_block_mapper::comm::adapters::sink::log_sink::LogSink;
use plc_block_mapper::comm::adapters::sink::text_file::TextFileSink;
use plc_block_mapper::comm::adapters::sink::{RecordSink, SinkDispatcher};
use plc_block_mapper::comm::adapters::storage::settings::{
    load_settings, PollerSettingsV1, SinkKind, SIMULATED_SCHEME,
};
use plc_block_mapper::comm::core::plan::build_read_plan;
use plc_block_mapper::comm::core::table::BlockTable;
use plc_block_mapper::comm::error::LoadErrorReport;
use plc_block_mapper::comm::usecase::engine::{
    run_single_cycle, ControllerOptions, PollingController,
};
use plc_block_mapper::comm::usecase::explore::{explore, ExploreOptions};

const SNAPSHOT_SCHEME: &str = "snapshot://";

/// Decode raw PLC data blocks into named, typed values
#[derive(Parser, Debug)]
#[command(name = "plc-block-mapper")]
#[command(version)]
struct Cli {
    /// Settings file (poller.v1.json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Field table file or directory of per-block files
    #[arg(short = 't', long, global = true)]
    field_table: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Controller endpoint (sim://<name> or snapshot://<dir>)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Block ids to poll (comma-separated)
    #[arg(short, long, global = true, value_delimiter = ',')]
    blocks: Option<Vec<u32>>,

    /// Replay raw exports from this directory (shortcut for --endpoint snapshot://<dir>)
    #[arg(long, global = true, conflicts_with = "endpoint")]
    snapshot_dir: Option<PathBuf>,

    /// Write DB<id>_raw.txt exports here every cycle
    #[arg(long, global = true)]
    raw_export_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll on the configured interval until Ctrl+C
    Poll,

    /// Run a single cycle and print the records as JSON
    Once,

    /// Heuristic scan of blocks without a field table
    Scan {
        /// Bytes covered by the boolean scan
        #[arg(long)]
        bool_span: Option<usize>,
    },

    /// Load a field table and print the validation report
    Check {
        /// Field table file or directory (defaults to --field-table)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = resolve_settings(&cli)?;

    match cli.command.as_ref().unwrap_or(&Command::Poll) {
        Command::Poll => cmd_poll(&settings).await,
        Command::Once => cmd_once(&settings).await,
        Command::Scan { bool_span } => cmd_scan(&settings, *bool_span).await,
        Command::Check { path } => {
            let path = path
                .clone()
                .or_else(|| settings.field_table.clone())
                .context("no field table given (use check <path> or --field-table)")?;
            cmd_check(&path)
        }
    }
}

fn resolve_settings(cli: &Cli) -> Result<PollerSettingsV1> {
    let mut settings = match &cli.settings {
        Some(path) => match load_settings(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => bail!("settings file not found: {}", path.display()),
            Err(err) => {
                let report = LoadErrorReport::from(&err);
                bail!(
                    "failed to load settings {}: {}",
                    path.display(),
                    serde_json::to_string(&report)?
                );
            }
        },
        None => PollerSettingsV1::default(),
    };

    if let Some(path) = &cli.field_table {
        settings.field_table = Some(path.clone());
    }
    if let Some(interval_ms) = cli.interval_ms {
        settings.interval_ms = interval_ms;
    }
    if let Some(endpoint) = &cli.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(dir) = &cli.snapshot_dir {
        settings.endpoint = format!("{SNAPSHOT_SCHEME}{}", dir.display());
    }
    if let Some(blocks) = &cli.blocks {
        settings.blocks = Some(blocks.clone());
    }
    if let Some(dir) = &cli.raw_export_dir {
        settings.raw_export_dir = Some(dir.clone());
    }
    Ok(settings)
}

fn load_table(settings: &PollerSettingsV1) -> Result<BlockTable> {
    let path = settings
        .field_table
        .as_deref()
        .context("no field table configured (use --field-table or fieldTable in settings)")?;
    let mut report = load_report(path)?;

    if let Some(blocks) = &settings.blocks {
        let missing = report.table.retain_blocks(blocks);
        if !missing.is_empty() {
            log::warn!("[config] requested blocks not in field table: {:?}", missing);
        }
    }
    if report.table.is_empty() {
        bail!("field table {} has no blocks to poll", path.display());
    }
    Ok(report.table)
}

fn load_report(path: &Path) -> Result<LoadReport> {
    load_field_table(path).map_err(|err| {
        let report = LoadErrorReport::from(&err);
        anyhow::anyhow!(
            "{}",
            serde_json::to_string(&report).unwrap_or_else(|_| err.to_string())
        )
    })
}

/// Builds the reader for `settings.endpoint`. A simulated endpoint serves zero-filled blocks.
fn build_reader(settings: &PollerSettingsV1, table: &BlockTable) -> Result<Arc<dyn BlockReader>> {
    let endpoint = settings.endpoint.as_str();
    if let Some(dir) = endpoint.strip_prefix(SNAPSHOT_SCHEME) {
        return Ok(Arc::new(HexSnapshotReader::new(dir)));
    }
    if settings.uses_simulated_endpoint() {
        log::warn!(
            "[poll] endpoint={} is simulated: every block reads as zeros (set --endpoint or endpoint in settings)",
            endpoint
        );
    }
    if let Some(name) = endpoint.strip_prefix(SIMULATED_SCHEME) {
        let plan = build_read_plan(
            table,
            &ControllerOptions::from_settings(settings).plan,
        );
        let reader = plan.jobs.iter().fold(SimulatedReader::new(name), |reader, job| {
            reader.with_block(job.block_id, vec![0; job.length as usize])
        });
        return Ok(Arc::new(reader));
    }
    bail!("no transport available for endpoint {endpoint} (expected sim:// or snapshot://)")
}

fn build_dispatcher(settings: &PollerSettingsV1) -> Result<SinkDispatcher> {
    let mut sinks: Vec<Arc<dyn RecordSink>> = Vec::new();
    for sink in &settings.sinks {
        let built: Arc<dyn RecordSink> = match (sink.kind, &sink.path) {
            (SinkKind::Log, _) => Arc::new(LogSink::new()),
            (SinkKind::TextFile, Some(path)) => Arc::new(TextFileSink::new(path)),
            (SinkKind::JsonLines, Some(path)) => Arc::new(JsonLinesSink::new(path)),
            (kind, None) => bail!("sink {kind:?} requires a path"),
        };
        sinks.push(built);
    }
    Ok(SinkDispatcher::new(
        sinks,
        settings.sink_queue_capacity,
        settings.sink_timeout(),
    ))
}

async fn cmd_poll(settings: &PollerSettingsV1) -> Result<()> {
    let table = Arc::new(load_table(settings)?);
    let reader = build_reader(settings, &table)?;
    let dispatcher = build_dispatcher(settings)?;
    let options = ControllerOptions::from_settings(settings);

    let controller = PollingController::new(reader, table, options, Some(dispatcher.clone()));
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(controller.run(stop_rx));

    println!("plc-block-mapper v{}", env!("CARGO_PKG_VERSION"));
    println!("Polling {} every {}ms", settings.endpoint, settings.interval_ms);
    println!("Press Ctrl+C to stop...");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    println!("\nStopping...");
    let _ = stop_tx.send(true);

    let last = run.await.context("polling task failed")?;
    dispatcher.flush().await;

    let stats = dispatcher.stats();
    println!(
        "cycles={} lastOk={}/{} batchesWritten={} batchesDropped={} sinkFailures={}",
        last.cycles,
        last.stats.ok,
        last.stats.total,
        stats.batches_written,
        stats.batches_dropped,
        stats.sink_failures
    );
    Ok(())
}

async fn cmd_once(settings: &PollerSettingsV1) -> Result<()> {
    let table = load_table(settings)?;
    let reader = build_reader(settings, &table)?;
    let options = ControllerOptions::from_settings(settings);

    let outcome = run_single_cycle(reader.as_ref(), &table, &options)
        .await
        .with_context(|| format!("cycle against {} failed", settings.endpoint))?;

    let dispatcher = build_dispatcher(settings)?;
    for result in dispatcher.write_now(&outcome.records).await {
        if let Err(err) = result.result {
            log::warn!("[sink] {} failed: {}", result.sink, err);
        }
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn cmd_scan(settings: &PollerSettingsV1, bool_span: Option<usize>) -> Result<()> {
    let block_ids = match &settings.blocks {
        Some(blocks) if !blocks.is_empty() => blocks.clone(),
        _ => bail!("scan needs --blocks (or blocks in settings)"),
    };
    let mut options = ExploreOptions {
        read_ceiling: settings.read_ceiling,
        read_timeout: settings.read_timeout(),
        thresholds: settings.scan_thresholds.clone(),
        ..ExploreOptions::default()
    };
    if let Some(span) = bool_span {
        options.bool_span = span;
    }

    let reader = build_reader(settings, &BlockTable::new())?;
    let scans = explore(reader.as_ref(), &block_ids, &options)
        .await
        .with_context(|| format!("cannot connect to {}", settings.endpoint))?;

    for scan in &scans {
        println!("\n=== DB{} ({} bytes) ===", scan.block_id, scan.length);
        if let Some(error) = &scan.error {
            println!("  read failed: {error}");
            continue;
        }
        if !scan.has_data {
            println!("  all zero");
            continue;
        }
        for value in scan.numeric.iter().chain(&scan.strings).chain(&scan.bools) {
            println!(
                "  {:<10} {:<8} {}",
                value.field_name,
                value.semantic_type,
                value.value_display().unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let report = load_report(path)?;
    println!("{}", report.summary());
    for block in report.table.blocks() {
        println!(
            "  DB{} {:<24} fields={} readLen={}",
            block.block_id,
            block.display_name,
            block.len(),
            block
                .required_len()
                .map(|len| len.to_string())
                .unwrap_or_else(|| "ceiling".to_string())
        );
    }
    for skipped in &report.skipped {
        println!(
            "  skipped {} (block {}): {}",
            skipped.source,
            skipped
                .block_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string()),
            skipped.reason
        );
    }
    Ok(())
}
