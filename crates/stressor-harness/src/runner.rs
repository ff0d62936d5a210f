//! Harness runner: registry → scheduler → auditor for every selected
//! scenario, plus the global verdict and the optional run bundle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use stressor_error::{Result, StressError};
use stressor_types::{TrialEvent, Verdict};
use tracing::{info, warn};

use crate::auditor::{RunReport, audit};
use crate::config::{HarnessConfig, Isolation};
use crate::log::{RunBundle, RunStatus, init_run_bundle};
use crate::registry::{ScenarioRegistry, select};
use crate::scheduler::Scheduler;

/// Default suite name for run bundles.
pub const DEFAULT_SUITE: &str = "stressor";

/// Result of one harness invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOutcome {
    pub reports: Vec<RunReport>,
    pub verdict: Verdict,
    /// Root of the finalized run bundle, when one was requested.
    pub bundle: Option<PathBuf>,
}

impl HarnessOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Process exit code for this outcome: 0 on PASS, 1 on FAIL.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.passed() { 0 } else { 1 }
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.reports.iter().any(|report| report.partial)
    }
}

pub struct Harness {
    registry: ScenarioRegistry,
    config: HarnessConfig,
    isolation: Isolation,
    bundle_dir: Option<PathBuf>,
    suite: String,
}

impl Harness {
    #[must_use]
    pub fn new(registry: ScenarioRegistry, config: HarnessConfig) -> Self {
        Self {
            registry,
            config,
            isolation: Isolation::InProcess,
            bundle_dir: None,
            suite: DEFAULT_SUITE.to_owned(),
        }
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Write a run bundle under `dir`.
    #[must_use]
    pub fn with_bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = suite.into();
        self
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn run(&self) -> Result<HarnessOutcome> {
        self.run_with(|_| {})
    }

    /// Like [`run`](Self::run), calling `on_report` as each scenario
    /// finishes.
    pub fn run_with(&self, mut on_report: impl FnMut(&RunReport)) -> Result<HarnessOutcome> {
        let started = Instant::now();
        let discovered = self.registry.discover()?;
        let selected = select(&discovered, self.config.filter.as_deref());
        if selected.is_empty() {
            return Err(StressError::config(format!(
                "no scenario matches filter {:?}",
                self.config.filter.as_deref().unwrap_or("")
            )));
        }

        let deadline = self.config.deadline_from(started);
        let scheduler_config = self
            .config
            .scheduler_config(self.isolation.clone(), deadline)?;
        let mut bundle = match &self.bundle_dir {
            Some(dir) => Some(init_run_bundle(dir, &self.suite, scheduler_config.seed)?),
            None => None,
        };

        let time_budget_ms =
            u64::try_from(scheduler_config.time_budget.as_millis()).unwrap_or(u64::MAX);
        info!(
            scenarios = selected.len(),
            mode = %self.config.mode,
            forks = scheduler_config.fork_count,
            time_budget_ms,
            iterations = ?scheduler_config.iterations_per_fork,
            seed = scheduler_config.seed,
            "harness run start"
        );

        let mut reports = Vec::with_capacity(selected.len());
        for scenario in selected {
            info!(scenario = scenario.name(), "scenario start");
            if let Some(bundle) = bundle.as_mut() {
                bundle.scenario_start(scenario.name(), scheduler_config.fork_count)?;
            }

            let events: Vec<TrialEvent> =
                Scheduler::run(Arc::clone(&scenario), &scheduler_config).collect();
            if let Some(bundle) = bundle.as_mut() {
                record_incidents(bundle, scenario.name(), &events)?;
            }

            let report = audit(scenario.as_ref(), &events);
            log_report(&report);
            if let Some(bundle) = bundle.as_mut() {
                bundle.scenario_end(&report)?;
            }
            on_report(&report);
            reports.push(report);
        }

        let verdict = self.global_verdict(&reports);
        let bundle = match bundle {
            Some(bundle) => {
                let status = if verdict.is_pass() {
                    RunStatus::Passed
                } else {
                    RunStatus::Failed
                };
                Some(bundle.finish(status)?)
            }
            None => None,
        };
        info!(
            verdict = %verdict,
            scenarios = reports.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "harness run end"
        );
        Ok(HarnessOutcome {
            reports,
            verdict,
            bundle,
        })
    }

    fn global_verdict(&self, reports: &[RunReport]) -> Verdict {
        let failed = reports.iter().any(|report| {
            let verdict = if self.config.strict_faults {
                report.strict_verdict()
            } else {
                report.verdict
            };
            !verdict.is_pass()
        });
        if failed { Verdict::Fail } else { Verdict::Pass }
    }
}

fn record_incidents(bundle: &mut RunBundle, scenario: &str, events: &[TrialEvent]) -> Result<()> {
    for event in events {
        match event {
            TrialEvent::Trial(_) => {}
            TrialEvent::Fault(fault) => bundle.record_fault(scenario, fault)?,
            TrialEvent::DeadlineExceeded(notice) => bundle.record_deadline(scenario, notice)?,
        }
    }
    Ok(())
}

fn log_report(report: &RunReport) {
    if !report.unknown_outcomes.is_empty() {
        warn!(
            scenario = %report.scenario,
            unknown = report.unknown_outcomes.len(),
            "outcomes missing from expectation table"
        );
    }
    if report.partial {
        warn!(scenario = %report.scenario, "scenario cut short by global deadline");
    }
    info!(
        scenario = %report.scenario,
        verdict = %report.verdict,
        trials = report.total_trials,
        outcomes = report.histogram.len(),
        faults = report.fault_count,
        "{}",
        report.triage_line()
    );
}

#[cfg(test)]
mod tests {
    use stressor_types::Expect;

    use super::*;
    use crate::log::validate_bundle;
    use crate::scenario::ScenarioDef;

    fn fixed(iterations: u64) -> HarnessConfig {
        HarnessConfig {
            forks: Some(1),
            iterations: Some(iterations),
            ..HarnessConfig::default()
        }
    }

    fn registry() -> ScenarioRegistry {
        ScenarioRegistry::new()
            .with(
                ScenarioDef::new("steady", || ())
                    .actor(|()| 1)
                    .expect(1, Expect::Acceptable, "always one"),
            )
            .with(
                ScenarioDef::new("broken", || ())
                    .actor(|()| 2)
                    .expect(1, Expect::Acceptable, "one is fine"),
            )
            .with(
                ScenarioDef::new("crashy", || ())
                    .actor(|()| panic!("scripted crash"))
                    .otherwise(Expect::Acceptable, "never produced"),
            )
    }

    #[test]
    fn failing_scenario_fails_the_run_but_not_its_siblings() {
        let mut seen = Vec::new();
        let outcome = Harness::new(registry(), fixed(20))
            .run_with(|report| seen.push(report.scenario.clone()))
            .expect("run");
        assert_eq!(seen, vec!["steady", "broken", "crashy"]);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.reports[0].passed());
        assert!(!outcome.reports[1].passed(), "case=unknown_outcome_fails");
        assert_eq!(outcome.reports[2].fault_count, 1, "case=fault_isolated");
        assert!(outcome.reports[2].passed());
    }

    #[test]
    fn strict_faults_turn_faults_into_failures() {
        let config = HarnessConfig {
            filter: Some("crashy".to_owned()),
            ..fixed(5)
        };
        let lenient = Harness::new(registry(), config.clone()).run().expect("run");
        assert!(lenient.passed());

        let strict = Harness::new(
            registry(),
            HarnessConfig {
                strict_faults: true,
                ..config
            },
        )
        .run()
        .expect("run");
        assert!(!strict.passed());
    }

    #[test]
    fn harness_exposes_the_config_it_runs_with() {
        let harness = Harness::new(registry(), fixed(3));
        assert_eq!(harness.config(), &fixed(3));
        let outcome = harness.run().expect("run");
        let trials: Vec<u64> = outcome.reports.iter().map(|r| r.total_trials).collect();
        assert_eq!(trials, vec![3, 3, 0], "case=iterations_from_config");
    }

    #[test]
    fn empty_selection_is_a_config_error() {
        let config = HarnessConfig {
            filter: Some("no-such-scenario".to_owned()),
            ..fixed(1)
        };
        let err = Harness::new(registry(), config).run().expect_err("empty");
        assert!(matches!(err, StressError::Config(_)));
    }

    #[test]
    fn registration_error_stops_before_execution() {
        let registry = registry().with(
            ScenarioDef::new("steady", || ())
                .actor(|()| 1)
                .expect(1, Expect::Acceptable, "dup"),
        );
        let err = Harness::new(registry, fixed(1)).run().expect_err("dup");
        assert!(err.is_registration());
    }

    #[test]
    fn bundle_is_written_and_valid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = Harness::new(registry(), fixed(3))
            .with_bundle_dir(dir.path())
            .with_suite("unit")
            .run()
            .expect("run");
        let root = outcome.bundle.expect("bundle root");
        validate_bundle(&root).expect("valid bundle");
        let reports = std::fs::read_to_string(root.join("report.jsonl")).expect("read");
        assert_eq!(reports.lines().count(), 3);
    }
}
