//! End-to-end replay of trace fixtures.

use std::path::PathBuf;

use segfit_core::HeapConfig;
use segfit_harness::{ReplayOptions, Replayer, TraceFixture, TraceOp};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

#[test]
fn bundled_smoke_fixture_passes() {
    let fixture = TraceFixture::from_file(&fixture_path("smoke.json")).unwrap();
    assert_eq!(fixture.version, "v1");

    let options = ReplayOptions {
        checkpoint_every: 4,
        ..ReplayOptions::default()
    };
    let mut replayer = Replayer::new(options).unwrap();
    let report = replayer.run(&fixture).unwrap();

    assert!(report.passed);
    assert_eq!(report.ops_executed, fixture.ops.len());
    assert_eq!(report.live_blocks, 0);

    // The trace frees everything, so the heap ends fully coalesced.
    let stats = replayer.heap().stats();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(
        stats.heap_bytes,
        stats.base_bytes + stats.free_block_bytes
    );
}

#[test]
fn synthetic_churn_survives_tight_checkpoints() {
    let mut ops = Vec::new();
    for round in 0u32..64 {
        let size = 1 + (round as usize * 37) % 700;
        if round % 4 == 3 {
            ops.push(TraceOp::Calloc {
                id: round,
                count: 1 + round as usize % 5,
                size: 1 + size / 4,
            });
        } else {
            ops.push(TraceOp::Alloc { id: round, size });
        }
        if round % 5 == 2 {
            ops.push(TraceOp::Realloc {
                id: round,
                size: 1 + (size * 3) % 900,
            });
        }
        if round >= 8 {
            ops.push(TraceOp::Free { id: round - 8 });
        }
    }
    for id in 56u32..64 {
        ops.push(TraceOp::Free { id });
    }
    let fixture = TraceFixture {
        version: "v1".into(),
        name: "churn".into(),
        captured_at: "2026-08-28T00:00:00Z".into(),
        ops,
    };

    let options = ReplayOptions {
        checkpoint_every: 1,
        ..ReplayOptions::default()
    };
    let mut replayer = Replayer::new(options).unwrap();
    let report = replayer.run(&fixture).unwrap();
    assert!(report.passed);
    assert_eq!(report.live_blocks, 0);
    assert_eq!(replayer.heap().stats().live_blocks, 0);
}

#[test]
fn arena_limit_failure_reports_op_index() {
    let fixture = TraceFixture {
        version: "v1".into(),
        name: "limited".into(),
        captured_at: "2026-08-28T00:00:00Z".into(),
        ops: vec![
            TraceOp::Alloc { id: 1, size: 256 },
            TraceOp::Alloc { id: 2, size: 4096 },
        ],
    };
    let options = ReplayOptions {
        heap: HeapConfig {
            arena_limit: 1024,
            ..HeapConfig::default()
        },
        ..ReplayOptions::default()
    };
    let mut replayer = Replayer::new(options).unwrap();
    let err = replayer.run(&fixture).unwrap_err();
    assert!(err.to_string().starts_with("op 1:"));
}

#[test]
fn lifecycle_trail_matches_replayed_ops() {
    let fixture = TraceFixture::from_file(&fixture_path("smoke.json")).unwrap();
    let mut replayer = Replayer::new(ReplayOptions::default()).unwrap();
    replayer.run(&fixture).unwrap();

    let records = replayer.heap_mut().drain_lifecycle();
    let allocs = records.iter().filter(|r| r.event == "alloc").count();
    let frees = records.iter().filter(|r| r.event == "free").count();
    // realloc emits an alloc + a free for the moved block.
    assert!(allocs >= 11);
    assert_eq!(allocs, frees);
}
