//! End-to-end pipeline runs over real external processes.
//!
//! These tests exercise the full path: JSON spec parsing, stage spawning,
//! the instrumented relays, telemetry emission, and run finalization.
//! They cover the observable properties of a run:
//! - conservation: byte-preserving pipelines deliver exactly the input size
//!   over every link
//! - monotonicity: per-link snapshot values never decrease
//! - finality: the last record carries the complete totals
//! - transform correctness: bytes arrive downstream unmodified in order
//! - failure propagation: a missing stage aborts without fake totals

use hp4_core::{PipelineRun, RunError, Snapshot, SpecParser, TelemetryConfig};
use std::io::Write;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const SENTENCE: &str = "Lorem ipsum dolor sit amet, consectetur volutpat.\n";

fn write_corpus(path: &std::path::Path, lines: usize) -> u64 {
    let mut file = std::fs::File::create(path).unwrap();
    for _ in 0..lines {
        file.write_all(SENTENCE.as_bytes()).unwrap();
    }
    (SENTENCE.len() * lines) as u64
}

fn fast_telemetry() -> TelemetryConfig {
    TelemetryConfig {
        sample_interval: Duration::from_millis(5),
        ..TelemetryConfig::default()
    }
}

async fn run_spec(
    json: &str,
) -> (
    Result<hp4_core::RunOutcome, RunError>,
    Vec<Snapshot>,
) {
    let spec = SpecParser::from_str(json).unwrap();
    let (out, mut observer) = tokio::io::duplex(1 << 20);
    let result = PipelineRun::with_telemetry(spec, fast_telemetry())
        .execute(out)
        .await;
    let mut raw = Vec::new();
    observer.read_to_end(&mut raw).await.unwrap();
    let records = String::from_utf8_lossy(&raw)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (result, records)
}

#[tokio::test]
async fn test_cat_sed_save_transforms_and_conserves() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("smallfile.txt");
    let output = dir.path().join("smallfile_A.txt");
    let input_len = write_corpus(&input, 200);

    let json = format!(
        r#"{{
            "pipeline": "smallfile",
            "stages": [
                {{"name": "cat", "command": "cat", "args": ["{}"]}},
                {{"name": "sed", "command": "sed", "args": ["-e", "s/a/A/g"]}},
                {{"name": "save", "command": "tee", "args": ["{}"]}}
            ]
        }}"#,
        input.display(),
        output.display()
    );

    let (result, records) = run_spec(&json).await;
    let outcome = result.unwrap();

    // Conservation: sed's substitution is length-preserving, so both links
    // deliver exactly the input size.
    assert_eq!(outcome.totals.get("cat-to-sed"), Some(input_len));
    assert_eq!(outcome.totals.get("sed-to-save"), Some(input_len));

    // Finality: the last record is authoritative and matches the outcome.
    let last = records.last().unwrap();
    assert_eq!(last.get("cat-to-sed"), Some(input_len));
    assert_eq!(last.get("sed-to-save"), Some(input_len));

    // Monotonicity per link across all emitted records.
    for link in ["cat-to-sed", "sed-to-save"] {
        let values: Vec<u64> = records.iter().filter_map(|r| r.get(link)).collect();
        assert!(
            values.windows(2).all(|w| w[0] <= w[1]),
            "{link} regressed: {values:?}"
        );
        assert_eq!(values.last().copied(), Some(input_len));
    }

    // Transform correctness: every 'a' capitalized, nothing reordered.
    let transformed = std::fs::read_to_string(&output).unwrap();
    assert_eq!(transformed.len() as u64, input_len);
    for line in transformed.lines() {
        assert_eq!(line, "Lorem ipsum dolor sit Amet, consectetur volutpAt.");
    }
}

#[tokio::test]
async fn test_larger_corpus_is_counted_exactly() {
    // The counters are u64 end to end; this exercises multiple relay chunks
    // to confirm exact accounting, not approximation.
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("largefile.txt");
    let input_len = write_corpus(&input, 40_000); // ~2 MB, dozens of chunks

    let json = format!(
        r#"{{
            "stages": [
                {{"name": "cat", "command": "cat", "args": ["{}"]}},
                {{"name": "count", "command": "wc", "args": ["-c"]}}
            ]
        }}"#,
        input.display()
    );

    let (result, records) = run_spec(&json).await;
    let outcome = result.unwrap();
    assert_eq!(outcome.totals.get("cat-to-count"), Some(input_len));
    assert_eq!(records.last().unwrap().get("cat-to-count"), Some(input_len));
}

#[tokio::test]
async fn test_missing_middle_stage_aborts_without_totals() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    write_corpus(&input, 10);

    let json = format!(
        r#"{{
            "stages": [
                {{"name": "cat", "command": "cat", "args": ["{}"]}},
                {{"name": "munge", "command": "hp4-test-no-such-program", "args": []}},
                {{"name": "save", "command": "cat", "args": []}}
            ]
        }}"#,
        input.display()
    );

    let (result, records) = run_spec(&json).await;
    let err = result.unwrap_err();
    assert!(matches!(&err, RunError::Spawn { stage, .. } if stage == "munge"));
    assert_eq!(err.exit_code(), 2);
    // No telemetry stream may imply the pipeline ran.
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_failing_stage_reports_failure_outcome() {
    let json = r#"{
        "stages": [
            {"name": "produce", "command": "echo", "args": ["payload"]},
            {"name": "check", "command": "grep", "args": ["missing-token"]}
        ]
    }"#;

    // grep exits 1 when nothing matches; the run must fail mid-pipeline.
    let (result, _records) = run_spec(json).await;
    let err = result.unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
