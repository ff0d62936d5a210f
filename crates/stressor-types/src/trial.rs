use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Outcome;

/// One observation: the outcome of a single trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Fork that produced the trial (0-based).
    pub fork: u32,
    /// Trial index within the fork (0-based).
    pub iteration: u64,
    pub outcome: Outcome,
}

/// What crashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// An actor body panicked.
    ActorPanic { actor: usize },
    /// The state initializer panicked.
    ResetPanic,
    /// The outcome extractor panicked.
    ExtractPanic,
    /// The OS refused to start an actor thread.
    ThreadSpawn { actor: usize },
    /// The fork worker process could not be started.
    WorkerSpawn,
    /// The fork worker process ended abnormally. `code` is `None` when it was
    /// killed by a signal.
    WorkerExit { code: Option<i32> },
    /// The fork worker wrote something that is not a worker record.
    WorkerProtocol,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActorPanic { actor } => write!(f, "actor_panic(actor={actor})"),
            Self::ResetPanic => f.write_str("reset_panic"),
            Self::ExtractPanic => f.write_str("extract_panic"),
            Self::ThreadSpawn { actor } => write!(f, "thread_spawn(actor={actor})"),
            Self::WorkerSpawn => f.write_str("worker_spawn"),
            Self::WorkerExit { code: Some(code) } => write!(f, "worker_exit(code={code})"),
            Self::WorkerExit { code: None } => f.write_str("worker_exit(signal)"),
            Self::WorkerProtocol => f.write_str("worker_protocol"),
        }
    }
}

/// A trial or fork that crashed. Ends the fork's contribution only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFault {
    pub fork: u32,
    /// Trial index that was in flight when the fault happened.
    pub iteration: u64,
    pub kind: FaultKind,
    pub message: String,
}

/// Emitted once when the global deadline stops further trials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineNotice {
    /// Fork that observed the expired deadline.
    pub fork: u32,
    /// Trials that fork completed before stopping.
    pub completed_trials: u64,
}

/// Element of the scheduler's output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrialEvent {
    Trial(TrialResult),
    Fault(ExecutionFault),
    DeadlineExceeded(DeadlineNotice),
}

impl TrialEvent {
    #[must_use]
    pub fn as_trial(&self) -> Option<&TrialResult> {
        match self {
            Self::Trial(trial) => Some(trial),
            _ => None,
        }
    }

    #[must_use]
    pub fn fork(&self) -> u32 {
        match self {
            Self::Trial(trial) => trial.fork,
            Self::Fault(fault) => fault.fork,
            Self::DeadlineExceeded(notice) => notice.fork,
        }
    }
}

/// PASS/FAIL judgment for a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }

    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_event_wire_shape_is_tagged() {
        let event = TrialEvent::Fault(ExecutionFault {
            fork: 1,
            iteration: 7,
            kind: FaultKind::ActorPanic { actor: 0 },
            message: "boom".to_owned(),
        });
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "fault");
        assert_eq!(value["kind"]["kind"], "actor_panic");
        assert_eq!(value["kind"]["actor"], 0);
        assert_eq!(event.fork(), 1);
        assert!(event.as_trial().is_none());
    }

    #[test]
    fn trial_event_carries_outcome_as_text() {
        let event = TrialEvent::Trial(TrialResult {
            fork: 0,
            iteration: 3,
            outcome: Outcome::from([1, 0]),
        });
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "trial");
        assert_eq!(value["outcome"], "1, 0");
    }

    #[test]
    fn fault_kind_display_is_compact() {
        assert_eq!(
            FaultKind::WorkerExit { code: Some(101) }.to_string(),
            "worker_exit(code=101)"
        );
        assert_eq!(
            FaultKind::WorkerExit { code: None }.to_string(),
            "worker_exit(signal)"
        );
    }

    #[test]
    fn verdict_strings() {
        assert_eq!(Verdict::Pass.to_string(), "PASS");
        assert!(!Verdict::Fail.is_pass());
    }
}
