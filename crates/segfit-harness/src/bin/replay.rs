//! CLI entrypoint for the segfit trace-replay harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use segfit_core::HeapConfig;
use segfit_harness::report::sha256_hex;
use segfit_harness::structured_log::{LogEmitter, LogEntry, LogLevel};
use segfit_harness::{ReplayOptions, Replayer, TraceFixture};

/// Replay allocation trace fixtures against the segfit heap.
#[derive(Debug, Parser)]
#[command(name = "replay")]
#[command(about = "Replay allocation traces and verify heap properties")]
struct Cli {
    /// Trace fixture JSON files, replayed in order against fresh heaps.
    #[arg(required = true)]
    traces: Vec<PathBuf>,

    /// Run a full property sweep every N ops (0 disables mid-trace sweeps).
    #[arg(long, default_value_t = 64)]
    checkpoint_every: usize,

    /// Hard cap on arena bytes; requests past it fail as out-of-memory.
    #[arg(long)]
    arena_limit: Option<usize>,

    /// Write structured JSONL logs (harness events plus the heap's
    /// lifecycle trail) to this path.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Write per-fixture JSON reports to this directory.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let run_id = format!("{:08x}", std::process::id());
    let mut emitter = match &cli.log {
        Some(path) => Some(LogEmitter::to_file(path, &run_id)?),
        None => None,
    };
    if let Some(dir) = &cli.report {
        std::fs::create_dir_all(dir)?;
    }

    let mut all_passed = true;
    for path in &cli.traces {
        let fixture = TraceFixture::from_file(path)?;
        eprintln!("Replaying {} ({} ops)", fixture.name, fixture.ops.len());

        let mut heap_config = HeapConfig::default();
        if let Some(limit) = cli.arena_limit {
            heap_config.arena_limit = limit;
        }
        let options = ReplayOptions {
            checkpoint_every: cli.checkpoint_every,
            heap: heap_config,
        };

        let mut replayer = Replayer::new(options)?;
        let outcome = replayer.run(&fixture);

        if let Some(emitter) = emitter.as_mut() {
            for record in replayer.heap_mut().drain_lifecycle() {
                emitter.emit_entry(LogEntry::from(record))?;
            }
        }

        let mut report = match outcome {
            Ok(report) => report,
            Err(err) => {
                all_passed = false;
                eprintln!("FAIL {}: {err}", fixture.name);
                if let Some(emitter) = emitter.as_mut() {
                    let entry = LogEntry::new("", LogLevel::Error, "fixture_failed")
                        .with_outcome("fail")
                        .with_details(serde_json::json!({
                            "fixture": fixture.name,
                            "error": err.to_string(),
                        }));
                    emitter.emit_entry(entry)?;
                }
                continue;
            }
        };
        report.trace_sha256 = Some(sha256_hex(path)?);

        eprintln!(
            "PASS {}: {} ops, {} checkpoints, {} heap bytes",
            report.fixture, report.ops_executed, report.checkpoints, report.heap_bytes
        );
        if let Some(emitter) = emitter.as_mut() {
            let entry = LogEntry::new("", LogLevel::Info, "fixture_passed")
                .with_outcome("pass")
                .with_details(serde_json::to_value(&report)?);
            emitter.emit_entry(entry)?;
        }
        if let Some(dir) = &cli.report {
            let out = dir.join(format!("{}.report.json", report.fixture));
            std::fs::write(&out, report.to_json()?)?;
        }
    }

    if let Some(emitter) = emitter.as_mut() {
        emitter.flush()?;
    }
    Ok(all_passed)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
