//! Fork worker protocol.
//!
//! The parent re-launches the harness binary with [`WORKER_FLAG`] followed by
//! the fields of a [`WorkerRequest`]. The worker runs exactly one in-process
//! fork and writes one JSON [`WorkerRecord`] per line on stdout, ending with
//! `done`. Everything else (logs, panics) goes to stderr.

use std::io::Write;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use stressor_error::{Result, StressError};
use stressor_types::{DeadlineNotice, ExecutionFault, TrialEvent, TrialResult};
use tracing::{debug, info};

use crate::config::{DEFAULT_MAX_START_JITTER_SPINS, Isolation, SchedulerConfig};
use crate::registry::ScenarioRegistry;
use crate::scheduler::Scheduler;

/// First argument of a worker invocation.
pub const WORKER_FLAG: &str = "--fork-worker";

/// Trial records buffered between explicit flushes.
const FLUSH_EVERY: u64 = 256;

/// What one worker process must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub scenario: String,
    pub fork: u32,
    pub seed: u64,
    pub time_budget_ms: u64,
    pub iterations: Option<u64>,
    /// Remaining global deadline, relative to worker start.
    pub deadline_ms: Option<u64>,
    pub max_start_jitter_spins: u32,
}

impl WorkerRequest {
    /// Request for `fork` of `scenario`, with the global deadline converted
    /// to the time remaining now.
    #[must_use]
    pub fn for_fork(scenario: &str, fork: u32, config: &SchedulerConfig) -> Self {
        let deadline_ms = config.deadline.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX)
        });
        Self {
            scenario: scenario.to_owned(),
            fork,
            seed: config.seed,
            time_budget_ms: u64::try_from(config.time_budget.as_millis()).unwrap_or(u64::MAX),
            iterations: config.iterations_per_fork,
            deadline_ms,
            max_start_jitter_spins: config.max_start_jitter_spins,
        }
    }

    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            WORKER_FLAG.to_owned(),
            self.scenario.clone(),
            "--fork-index".to_owned(),
            self.fork.to_string(),
            "--seed".to_owned(),
            self.seed.to_string(),
            "--time-budget-ms".to_owned(),
            self.time_budget_ms.to_string(),
            "--jitter-spins".to_owned(),
            self.max_start_jitter_spins.to_string(),
        ];
        if let Some(iterations) = self.iterations {
            args.push("--iterations".to_owned());
            args.push(iterations.to_string());
        }
        if let Some(deadline_ms) = self.deadline_ms {
            args.push("--deadline-ms".to_owned());
            args.push(deadline_ms.to_string());
        }
        args
    }

    /// Parse the arguments that follow the program name. The first one must
    /// be [`WORKER_FLAG`].
    pub fn parse_args(args: &[String]) -> std::result::Result<Self, String> {
        let mut iter = args.iter();
        match iter.next().map(String::as_str) {
            Some(WORKER_FLAG) => {}
            _ => return Err(format!("worker invocation must start with {WORKER_FLAG}")),
        }
        let scenario = iter
            .next()
            .ok_or_else(|| format!("{WORKER_FLAG} requires a scenario name"))?
            .clone();

        let mut fork = None;
        let mut seed = None;
        let mut time_budget_ms = None;
        let mut iterations = None;
        let mut deadline_ms = None;
        let mut max_start_jitter_spins = DEFAULT_MAX_START_JITTER_SPINS;
        while let Some(flag) = iter.next() {
            let value = iter
                .next()
                .ok_or_else(|| format!("{flag} requires a value"))?;
            match flag.as_str() {
                "--fork-index" => fork = Some(parse_number(flag, value)?),
                "--seed" => seed = Some(parse_number(flag, value)?),
                "--time-budget-ms" => time_budget_ms = Some(parse_number(flag, value)?),
                "--iterations" => iterations = Some(parse_number(flag, value)?),
                "--deadline-ms" => deadline_ms = Some(parse_number(flag, value)?),
                "--jitter-spins" => max_start_jitter_spins = parse_number(flag, value)?,
                unknown => return Err(format!("unknown worker option: {unknown}")),
            }
        }

        Ok(Self {
            scenario,
            fork: fork.ok_or("--fork-index is required")?,
            seed: seed.ok_or("--seed is required")?,
            time_budget_ms: time_budget_ms.ok_or("--time-budget-ms is required")?,
            iterations,
            deadline_ms,
            max_start_jitter_spins,
        })
    }

    /// Scheduler view of this request, anchored at `started`.
    #[must_use]
    pub fn scheduler_config(&self, started: Instant) -> SchedulerConfig {
        SchedulerConfig {
            fork_count: 1,
            iterations_per_fork: self.iterations,
            time_budget: Duration::from_millis(self.time_budget_ms),
            deadline: self.deadline_ms.map(|ms| started + Duration::from_millis(ms)),
            isolation: Isolation::InProcess,
            seed: self.seed,
            max_start_jitter_spins: self.max_start_jitter_spins,
        }
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> std::result::Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got {value:?}"))
}

/// One line of worker output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum WorkerRecord {
    Trial(TrialResult),
    Fault(ExecutionFault),
    Deadline(DeadlineNotice),
    /// Final record. `trials` is the number of trial records written.
    Done { trials: u64 },
}

impl WorkerRecord {
    /// Fork the record belongs to; `None` for `done`.
    #[must_use]
    pub fn fork(&self) -> Option<u32> {
        match self {
            Self::Trial(trial) => Some(trial.fork),
            Self::Fault(fault) => Some(fault.fork),
            Self::Deadline(notice) => Some(notice.fork),
            Self::Done { .. } => None,
        }
    }
}

impl From<TrialEvent> for WorkerRecord {
    fn from(event: TrialEvent) -> Self {
        match event {
            TrialEvent::Trial(trial) => Self::Trial(trial),
            TrialEvent::Fault(fault) => Self::Fault(fault),
            TrialEvent::DeadlineExceeded(notice) => Self::Deadline(notice),
        }
    }
}

/// Decode one worker output line. `line_no` is 1-based.
pub fn parse_record(line_no: usize, line: &str) -> Result<WorkerRecord> {
    serde_json::from_str(line.trim()).map_err(|err| StressError::WorkerProtocol {
        line: line_no,
        detail: err.to_string(),
    })
}

/// Body of a worker process: run the requested fork and stream its records
/// to `out`. Returns the number of completed trials.
pub fn run_fork_worker(
    registry: &ScenarioRegistry,
    request: &WorkerRequest,
    out: &mut impl Write,
) -> Result<u64> {
    let started = Instant::now();
    let scenario = registry
        .get(&request.scenario)?
        .ok_or_else(|| StressError::UnknownScenario(request.scenario.clone()))?;
    info!(
        scenario = %request.scenario,
        fork = request.fork,
        seed = request.seed,
        "fork worker start"
    );

    let config = request.scheduler_config(started);
    let mut trials = 0_u64;
    for event in Scheduler::fork_events(scenario, request.fork, &config) {
        let is_trial = event.as_trial().is_some();
        write_record(out, &WorkerRecord::from(event))?;
        if is_trial {
            trials += 1;
            if trials % FLUSH_EVERY == 0 {
                out.flush()?;
            }
        } else {
            out.flush()?;
        }
    }
    write_record(out, &WorkerRecord::Done { trials })?;
    out.flush()?;
    debug!(fork = request.fork, trials, "fork worker done");
    Ok(trials)
}

fn write_record(out: &mut impl Write, record: &WorkerRecord) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}
