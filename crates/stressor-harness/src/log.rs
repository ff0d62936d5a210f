//! Run bundle: the on-disk artifact of one harness invocation.
//!
//! Layout of `<base>/<suite>-seed-<seed>/`:
//! - `meta.json` for run metadata
//! - `events.jsonl` for structured lifecycle events
//! - `report.jsonl` with one [`RunReport`] per scenario
//!
//! The `run_end` event carries the SHA-256 of `report.jsonl` so CI can
//! detect a truncated or edited report.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use stressor_error::{Result, StressError};
use stressor_types::{DeadlineNotice, ExecutionFault};
use tracing::{error, info, warn};

use crate::auditor::RunReport;

/// Version of the bundle schema.
pub const LOG_SCHEMA_VERSION: u32 = 1;

/// Files that must be present in every run bundle.
pub const REQUIRED_BUNDLE_FILES: [&str; 3] = ["meta.json", "events.jsonl", "report.jsonl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    RunStart,
    ScenarioStart,
    Fault,
    Deadline,
    ScenarioEnd,
    RunEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMeta {
    pub schema_version: u32,
    pub suite: String,
    pub seed: u64,
    pub harness_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessEvent {
    pub kind: LifecycleEventKind,
    pub status: Option<RunStatus>,
    pub step: u64,
    pub message: String,
    pub payload: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub struct RunBundle {
    root: PathBuf,
    events_path: PathBuf,
    report_path: PathBuf,
    next_step: u64,
}

impl RunBundle {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scenario_start(&mut self, scenario: &str, forks: u32) -> Result<()> {
        self.emit(
            LifecycleEventKind::ScenarioStart,
            scenario,
            payload([("forks", json!(forks))]),
        )
    }

    pub fn record_fault(&mut self, scenario: &str, fault: &ExecutionFault) -> Result<()> {
        self.emit(
            LifecycleEventKind::Fault,
            scenario,
            payload([
                ("fork", json!(fault.fork)),
                ("iteration", json!(fault.iteration)),
                ("kind", json!(fault.kind.to_string())),
                ("detail", json!(fault.message)),
            ]),
        )
    }

    pub fn record_deadline(&mut self, scenario: &str, notice: &DeadlineNotice) -> Result<()> {
        self.emit(
            LifecycleEventKind::Deadline,
            scenario,
            payload([
                ("fork", json!(notice.fork)),
                ("completed_trials", json!(notice.completed_trials)),
            ]),
        )
    }

    /// Append `report` to `report.jsonl` and log the scenario's end.
    pub fn scenario_end(&mut self, report: &RunReport) -> Result<()> {
        append_line(&self.report_path, &serde_json::to_string(report)?)?;
        self.emit(
            LifecycleEventKind::ScenarioEnd,
            &report.scenario,
            payload([
                ("verdict", json!(report.verdict.as_str())),
                ("trials", json!(report.total_trials)),
                ("faults", json!(report.fault_count)),
                ("partial", json!(report.partial)),
            ]),
        )
    }

    pub fn finish(self, status: RunStatus) -> Result<PathBuf> {
        let report_sha256 = sha256_hex(&fs::read(&self.report_path)?);
        let event = HarnessEvent {
            kind: LifecycleEventKind::RunEnd,
            status: Some(status),
            step: self.next_step,
            message: "run_end".to_owned(),
            payload: payload([("report_sha256", json!(report_sha256))]),
        };
        self.write_event_line(&event)?;
        info!(
            bundle = %self.root.display(),
            status = ?status,
            "run bundle finalized"
        );
        Ok(self.root)
    }

    fn emit(
        &mut self,
        kind: LifecycleEventKind,
        message: &str,
        payload: BTreeMap<String, Value>,
    ) -> Result<()> {
        let event = HarnessEvent {
            kind,
            status: None,
            step: self.next_step,
            message: message.to_owned(),
            payload,
        };
        self.next_step = self.next_step.saturating_add(1);
        self.write_event_line(&event)
    }

    fn write_event_line(&self, event: &HarnessEvent) -> Result<()> {
        append_line(&self.events_path, &serde_json::to_string(event)?)
    }
}

pub fn init_run_bundle(base_dir: &Path, suite: &str, seed: u64) -> Result<RunBundle> {
    if suite.is_empty() {
        return Err(StressError::internal("suite must be non-empty"));
    }

    let root = base_dir.join(bundle_dir_name(suite, seed));
    fs::create_dir_all(&root)?;

    let meta = BundleMeta {
        schema_version: LOG_SCHEMA_VERSION,
        suite: suite.to_owned(),
        seed,
        harness_version: env!("CARGO_PKG_VERSION").to_owned(),
    };
    fs::write(root.join("meta.json"), serde_json::to_vec_pretty(&meta)?)?;

    let events_path = root.join("events.jsonl");
    let report_path = root.join("report.jsonl");
    fs::write(&events_path, b"")?;
    fs::write(&report_path, b"")?;

    let mut bundle = RunBundle {
        root,
        events_path,
        report_path,
        next_step: 0,
    };
    bundle.emit(LifecycleEventKind::RunStart, "run_start", BTreeMap::new())?;

    info!(
        suite,
        seed,
        root = %bundle.root.display(),
        "run bundle initialized"
    );
    Ok(bundle)
}

pub fn validate_required_files(bundle_root: &Path) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_BUNDLE_FILES
        .iter()
        .copied()
        .filter(|name| !bundle_root.join(name).is_file())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    error!(
        bundle = %bundle_root.display(),
        missing_count = missing.len(),
        "missing required run bundle files"
    );
    Err(StressError::internal(format!(
        "missing required bundle files: {}",
        missing.join(", ")
    )))
}

pub fn validate_bundle_meta(bundle_root: &Path) -> Result<BundleMeta> {
    let bytes = fs::read(bundle_root.join("meta.json"))?;
    let meta: BundleMeta = serde_json::from_slice(&bytes)
        .map_err(|err| StressError::internal(format!("meta.json parse failure: {err}")))?;

    if meta.schema_version != LOG_SCHEMA_VERSION {
        warn!(
            expected = LOG_SCHEMA_VERSION,
            found = meta.schema_version,
            "bundle schema version mismatch"
        );
        return Err(StressError::internal(format!(
            "unsupported schema version: expected {LOG_SCHEMA_VERSION}, got {}",
            meta.schema_version
        )));
    }
    if meta.suite.is_empty() {
        return Err(StressError::internal("meta.json must include a non-empty suite"));
    }
    Ok(meta)
}

pub fn validate_events_jsonl(bundle_root: &Path) -> Result<Vec<HarnessEvent>> {
    let contents = fs::read_to_string(bundle_root.join("events.jsonl"))?;
    let mut events = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            return Err(StressError::internal(format!(
                "events.jsonl has empty line at {line_no}"
            )));
        }
        let event: HarnessEvent = serde_json::from_str(line).map_err(|err| {
            StressError::internal(format!("events.jsonl parse failure at line {line_no}: {err}"))
        })?;
        if event.message.is_empty() {
            return Err(StressError::internal(format!(
                "events.jsonl has empty message at line {line_no}"
            )));
        }
        events.push(event);
    }

    if events.is_empty() {
        return Err(StressError::internal(
            "events.jsonl must contain at least one event",
        ));
    }
    Ok(events)
}

/// Full check: files, meta, event framing, and the report checksum.
pub fn validate_bundle(bundle_root: &Path) -> Result<()> {
    validate_required_files(bundle_root)?;
    validate_bundle_meta(bundle_root)?;
    let events = validate_events_jsonl(bundle_root)?;

    if events.first().map(|event| event.kind) != Some(LifecycleEventKind::RunStart) {
        return Err(StressError::internal(
            "events.jsonl must start with a run_start event",
        ));
    }
    let Some(run_end) = events
        .last()
        .filter(|event| event.kind == LifecycleEventKind::RunEnd)
    else {
        return Err(StressError::internal(
            "events.jsonl must end with a run_end event",
        ));
    };

    let recorded = run_end
        .payload
        .get("report_sha256")
        .and_then(Value::as_str)
        .ok_or_else(|| StressError::internal("run_end event lacks report_sha256"))?;
    let actual = sha256_hex(&fs::read(bundle_root.join("report.jsonl"))?);
    if recorded != actual {
        return Err(StressError::internal(format!(
            "report.jsonl checksum mismatch: recorded={recorded} actual={actual}"
        )));
    }
    Ok(())
}

// ─── Private helpers ───

fn payload<const N: usize>(fields: [(&str, Value); N]) -> BTreeMap<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

fn append_line(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0F)]));
    }
    out
}

fn bundle_dir_name(suite: &str, seed: u64) -> String {
    let suite: String = suite
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{suite}-seed-{seed}")
}

#[cfg(test)]
mod tests {
    use stressor_types::{Expect, ExpectationTable, FaultKind, Outcome, TrialEvent, TrialResult};

    use super::*;
    use crate::auditor::audit_table;

    fn sample_report() -> RunReport {
        let table = ExpectationTable::new().with([1, 0], Expect::Acceptable, "first won");
        let events = [TrialEvent::Trial(TrialResult {
            fork: 0,
            iteration: 0,
            outcome: Outcome::from([1, 0]),
        })];
        audit_table("visit_cas_race", "", &table, &events)
    }

    #[test]
    fn full_lifecycle_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bundle = init_run_bundle(dir.path(), "builtin suite", 7).expect("init");
        assert!(
            bundle.root().ends_with("builtin_suite-seed-7"),
            "case=sanitized_name"
        );
        bundle.scenario_start("visit_cas_race", 2).expect("start");
        bundle
            .record_fault(
                "visit_cas_race",
                &ExecutionFault {
                    fork: 1,
                    iteration: 3,
                    kind: FaultKind::ResetPanic,
                    message: "init failed".to_owned(),
                },
            )
            .expect("fault");
        bundle
            .record_deadline(
                "visit_cas_race",
                &DeadlineNotice {
                    fork: 1,
                    completed_trials: 3,
                },
            )
            .expect("deadline");
        bundle.scenario_end(&sample_report()).expect("end");
        let root = bundle.finish(RunStatus::Passed).expect("finish");

        validate_bundle(&root).expect("valid bundle");
        let events = validate_events_jsonl(&root).expect("events");
        let kinds: Vec<LifecycleEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LifecycleEventKind::RunStart,
                LifecycleEventKind::ScenarioStart,
                LifecycleEventKind::Fault,
                LifecycleEventKind::Deadline,
                LifecycleEventKind::ScenarioEnd,
                LifecycleEventKind::RunEnd,
            ]
        );
        let steps: Vec<u64> = events.iter().map(|e| e.step).collect();
        assert_eq!(steps, (0..6).collect::<Vec<_>>());
        assert_eq!(validate_bundle_meta(&root).expect("meta").seed, 7);
    }

    #[test]
    fn unfinished_bundle_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = init_run_bundle(dir.path(), "suite", 1).expect("init");
        let err = validate_bundle(bundle.root()).expect_err("no run_end");
        assert!(err.to_string().contains("run_end"));
    }

    #[test]
    fn edited_report_breaks_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bundle = init_run_bundle(dir.path(), "suite", 1).expect("init");
        bundle.scenario_end(&sample_report()).expect("end");
        let root = bundle.finish(RunStatus::Passed).expect("finish");
        append_line(&root.join("report.jsonl"), "{}").expect("tamper");
        let err = validate_bundle(&root).expect_err("checksum mismatch");
        assert!(err.to_string().contains("checksum"), "case=err={err}");
    }

    #[test]
    fn missing_files_and_bad_meta_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = validate_required_files(dir.path()).expect_err("empty dir");
        assert!(err.to_string().contains("meta.json"));

        fs::write(
            dir.path().join("meta.json"),
            r#"{"schema_version":99,"suite":"s","seed":1,"harness_version":"0"}"#,
        )
        .expect("write meta");
        let result = validate_bundle_meta(dir.path());
        assert!(result.is_err(), "case=schema_mismatch");
    }

    #[test]
    fn empty_suite_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(init_run_bundle(dir.path(), "", 1).is_err());
    }

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        let hex = sha256_hex(b"");
        assert_eq!(
            hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
