//! Outcome auditor: histogram + expectation table → [`RunReport`].
//!
//! Pure aggregation. The same events always produce an identical report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stressor_types::{
    Classification, DeadlineNotice, ExecutionFault, Expect, ExpectationTable, Outcome, TrialEvent,
    Verdict,
};

use crate::scenario::Scenario;

/// JSON schema version for report lines.
pub const REPORT_SCHEMA_V1: &str = "stressor.report.v1";

/// One distinct observed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramRow {
    pub outcome: Outcome,
    pub count: u64,
    /// `None` when the outcome is unknown to the table.
    pub expect: Option<Expect>,
    pub description: String,
}

impl HistogramRow {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.expect.is_none_or(Expect::is_failure)
    }
}

/// Audited result for one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    pub scenario: String,
    pub description: String,
    pub verdict: Verdict,
    /// Rows in ascending outcome order.
    pub histogram: Vec<HistogramRow>,
    pub total_trials: u64,
    pub fault_count: usize,
    pub faults: Vec<ExecutionFault>,
    pub unknown_outcomes: Vec<Outcome>,
    pub forbidden_observed: Vec<Outcome>,
    pub interesting_observed: bool,
    pub warnings: Vec<String>,
    /// The global deadline cut this scenario short.
    pub partial: bool,
    pub deadline: Option<DeadlineNotice>,
}

impl RunReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    #[must_use]
    pub fn has_faults(&self) -> bool {
        self.fault_count > 0
    }

    /// Verdict with faults counted as failures.
    #[must_use]
    pub fn strict_verdict(&self) -> Verdict {
        if self.has_faults() {
            Verdict::Fail
        } else {
            self.verdict
        }
    }

    /// One-line summary for logs and CI output.
    #[must_use]
    pub fn triage_line(&self) -> String {
        let partial = if self.partial { " PARTIAL" } else { "" };
        if self.passed() {
            format!(
                "PASS{partial}: {} {} trials, {} outcomes, {} faults, interesting={}",
                self.scenario,
                self.total_trials,
                self.histogram.len(),
                self.fault_count,
                self.interesting_observed,
            )
        } else {
            format!(
                "FAIL{partial}: {} {} trials, forbidden=[{}] unknown=[{}]",
                self.scenario,
                self.total_trials,
                join_outcomes(&self.forbidden_observed),
                join_outcomes(&self.unknown_outcomes),
            )
        }
    }
}

fn join_outcomes(outcomes: &[Outcome]) -> String {
    outcomes
        .iter()
        .map(|outcome| format!("({outcome})"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Audit the events one scenario produced.
#[must_use]
pub fn audit(scenario: &dyn Scenario, events: &[TrialEvent]) -> RunReport {
    audit_table(
        scenario.name(),
        scenario.description(),
        scenario.expectations(),
        events,
    )
}

/// [`audit`] against an explicit table.
#[must_use]
pub fn audit_table(
    name: &str,
    description: &str,
    table: &ExpectationTable,
    events: &[TrialEvent],
) -> RunReport {
    let mut counts: BTreeMap<&Outcome, u64> = BTreeMap::new();
    let mut faults = Vec::new();
    let mut deadline = None;
    for event in events {
        match event {
            TrialEvent::Trial(trial) => *counts.entry(&trial.outcome).or_default() += 1,
            TrialEvent::Fault(fault) => faults.push(fault.clone()),
            TrialEvent::DeadlineExceeded(notice) => {
                deadline.get_or_insert_with(|| notice.clone());
            }
        }
    }

    let mut histogram = Vec::with_capacity(counts.len());
    let mut unknown_outcomes = Vec::new();
    let mut forbidden_observed = Vec::new();
    let mut interesting_observed = false;
    for (outcome, count) in counts {
        let classification = table.classify(outcome);
        let (expect, description) = match classification {
            Classification::Declared(entry) | Classification::CatchAll(entry) => {
                (Some(entry.expect), entry.description.clone())
            }
            Classification::Unknown => (None, "outcome not in expectation table".to_owned()),
        };
        match expect {
            None => unknown_outcomes.push(outcome.clone()),
            Some(Expect::Forbidden) => forbidden_observed.push(outcome.clone()),
            Some(Expect::AcceptableInteresting) => interesting_observed = true,
            Some(Expect::Acceptable) => {}
        }
        histogram.push(HistogramRow {
            outcome: outcome.clone(),
            count,
            expect,
            description,
        });
    }

    let total_trials = histogram.iter().map(|row| row.count).sum();
    let verdict = if unknown_outcomes.is_empty() && forbidden_observed.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    let mut warnings = Vec::new();
    if total_trials == 0 {
        warnings.push("no trials completed".to_owned());
    }
    if !faults.is_empty() {
        warnings.push(format!("{} execution fault(s) recorded", faults.len()));
    }
    if let Some(notice) = &deadline {
        warnings.push(format!(
            "global deadline reached on fork {} after {} trial(s); results are partial",
            notice.fork, notice.completed_trials
        ));
    }
    if table.declares_interesting() && !interesting_observed {
        warnings.push("no ACCEPTABLE_INTERESTING outcome was observed".to_owned());
    }

    RunReport {
        schema_version: REPORT_SCHEMA_V1.to_owned(),
        scenario: name.to_owned(),
        description: description.to_owned(),
        verdict,
        histogram,
        total_trials,
        fault_count: faults.len(),
        faults,
        unknown_outcomes,
        forbidden_observed,
        interesting_observed,
        warnings,
        partial: deadline.is_some(),
        deadline,
    }
}
