//! Execution scheduler: forks, trial loops, and the lazy event stream.
//!
//! ```text
//!  Scheduler::run(scenario, config) -> TrialStream
//!    for fork in 0..fork_count               (sequential)
//!      deadline check ───────────────────────► DeadlineExceeded, end
//!      InProcess  → ForkEvents (this process)
//!      Subprocess → RemoteFork (worker process, JSON lines on stdout)
//!        per trial: deadline check, TrialPlan, run_trial → Trial | Fault
//! ```
//!
//! A fault ends its fork only. The global deadline ends the whole stream
//! after exactly one notice.

use std::io::{BufRead, BufReader, Lines};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use stressor_types::{DeadlineNotice, ExecutionFault, FaultKind, TrialEvent, TrialResult};
use tracing::{debug, info, warn};

use crate::config::{Isolation, SchedulerConfig, WorkerCommand};
use crate::scenario::{Scenario, TrialPlan};
use crate::seed_taxonomy::ForkSeeds;
use crate::worker::{WorkerRecord, WorkerRequest, parse_record};

/// Entry point for executing one scenario.
pub struct Scheduler;

impl Scheduler {
    /// Lazily execute `scenario` under `config`. Nothing runs until the
    /// returned stream is polled.
    #[must_use]
    pub fn run(scenario: Arc<dyn Scenario>, config: &SchedulerConfig) -> TrialStream {
        TrialStream {
            scenario,
            config: config.clone(),
            next_fork: 0,
            current: None,
            finished: false,
        }
    }

    /// The trial loop of a single in-process fork. Fork workers use this
    /// directly; [`Scheduler::run`] wraps it for every fork.
    #[must_use]
    pub fn fork_events(
        scenario: Arc<dyn Scenario>,
        fork: u32,
        config: &SchedulerConfig,
    ) -> ForkEvents {
        let seeds = ForkSeeds::derive(config.seed, scenario.name(), fork);
        ForkEvents {
            scenario,
            fork,
            order_rng: StdRng::seed_from_u64(seeds.order),
            jitter_rng: StdRng::seed_from_u64(seeds.jitter),
            iterations: config.iterations_per_fork,
            budget: config.time_budget,
            deadline: config.deadline,
            max_spins: config.max_start_jitter_spins,
            started: Instant::now(),
            completed: 0,
            done: false,
        }
    }
}

fn deadline_expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| Instant::now() >= at)
}

// ---------------------------------------------------------------------------
// TrialStream
// ---------------------------------------------------------------------------

/// Finite, lazily produced sequence of [`TrialEvent`]s for one scenario.
pub struct TrialStream {
    scenario: Arc<dyn Scenario>,
    config: SchedulerConfig,
    next_fork: u32,
    current: Option<ForkRun>,
    finished: bool,
}

enum ForkRun {
    Local(Box<ForkEvents>),
    Remote(RemoteFork),
    /// A fork that failed to launch; yields its one fault.
    Failed(Option<TrialEvent>),
}

impl ForkRun {
    fn next_event(&mut self) -> Option<TrialEvent> {
        match self {
            Self::Local(fork) => fork.next(),
            Self::Remote(fork) => fork.next_event(),
            Self::Failed(event) => event.take(),
        }
    }
}

impl TrialStream {
    fn launch(&self, fork: u32) -> ForkRun {
        match &self.config.isolation {
            Isolation::InProcess => {
                let scenario = Arc::clone(&self.scenario);
                ForkRun::Local(Box::new(Scheduler::fork_events(scenario, fork, &self.config)))
            }
            Isolation::Subprocess(command) => {
                let request = WorkerRequest::for_fork(self.scenario.name(), fork, &self.config);
                match RemoteFork::spawn(command, &request) {
                    Ok(remote) => ForkRun::Remote(remote),
                    Err(err) => {
                        warn!(
                            scenario = self.scenario.name(),
                            fork,
                            error = %err,
                            "fork worker failed to start"
                        );
                        ForkRun::Failed(Some(TrialEvent::Fault(ExecutionFault {
                            fork,
                            iteration: 0,
                            kind: FaultKind::WorkerSpawn,
                            message: err.to_string(),
                        })))
                    }
                }
            }
        }
    }
}

impl Iterator for TrialStream {
    type Item = TrialEvent;

    fn next(&mut self) -> Option<TrialEvent> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(current) = self.current.as_mut() {
                match current.next_event() {
                    Some(event) => {
                        if matches!(event, TrialEvent::DeadlineExceeded(_)) {
                            self.finished = true;
                            self.current = None;
                        }
                        return Some(event);
                    }
                    None => {
                        debug!(
                            scenario = self.scenario.name(),
                            fork = self.next_fork.saturating_sub(1),
                            "fork complete"
                        );
                        self.current = None;
                    }
                }
            }

            if self.next_fork >= self.config.fork_count {
                self.finished = true;
                return None;
            }
            let fork = self.next_fork;
            if deadline_expired(self.config.deadline) {
                self.finished = true;
                return Some(TrialEvent::DeadlineExceeded(DeadlineNotice {
                    fork,
                    completed_trials: 0,
                }));
            }
            info!(
                scenario = self.scenario.name(),
                fork,
                forks = self.config.fork_count,
                subprocess = matches!(self.config.isolation, Isolation::Subprocess(_)),
                "fork start"
            );
            self.current = Some(self.launch(fork));
            self.next_fork += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// In-process fork
// ---------------------------------------------------------------------------

/// Trial loop of one fork running in this process.
pub struct ForkEvents {
    scenario: Arc<dyn Scenario>,
    fork: u32,
    order_rng: StdRng,
    jitter_rng: StdRng,
    iterations: Option<u64>,
    budget: Duration,
    deadline: Option<Instant>,
    max_spins: u32,
    started: Instant,
    completed: u64,
    done: bool,
}

impl ForkEvents {
    /// Trials completed so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn quota_reached(&self) -> bool {
        match self.iterations {
            Some(limit) => self.completed >= limit,
            None => self.started.elapsed() >= self.budget,
        }
    }
}

impl Iterator for ForkEvents {
    type Item = TrialEvent;

    fn next(&mut self) -> Option<TrialEvent> {
        if self.done {
            return None;
        }
        if self.quota_reached() {
            self.done = true;
            return None;
        }
        if deadline_expired(self.deadline) {
            self.done = true;
            warn!(
                scenario = self.scenario.name(),
                fork = self.fork,
                completed = self.completed,
                "global deadline reached"
            );
            return Some(TrialEvent::DeadlineExceeded(DeadlineNotice {
                fork: self.fork,
                completed_trials: self.completed,
            }));
        }

        let plan = TrialPlan::draw(
            &mut self.order_rng,
            &mut self.jitter_rng,
            self.scenario.actor_count(),
            self.max_spins,
        );
        let iteration = self.completed;
        match self.scenario.run_trial(&plan) {
            Ok(outcome) => {
                self.completed += 1;
                Some(TrialEvent::Trial(TrialResult {
                    fork: self.fork,
                    iteration,
                    outcome,
                }))
            }
            Err(fault) => {
                self.done = true;
                warn!(
                    scenario = self.scenario.name(),
                    fork = self.fork,
                    iteration,
                    kind = %fault.kind,
                    message = %fault.message,
                    "trial fault ends fork"
                );
                Some(TrialEvent::Fault(ExecutionFault {
                    fork: self.fork,
                    iteration,
                    kind: fault.kind,
                    message: fault.message,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subprocess fork
// ---------------------------------------------------------------------------

/// A fork running in a worker process, read back line by line.
struct RemoteFork {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    fork: u32,
    line_no: usize,
    completed: u64,
    /// A fault or deadline record was already forwarded.
    terminal_seen: bool,
    reaped: bool,
}

impl RemoteFork {
    fn spawn(command: &WorkerCommand, request: &WorkerRequest) -> std::io::Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .args(request.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout was not captured"))?;
        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            fork: request.fork,
            line_no: 0,
            completed: 0,
            terminal_seen: false,
            reaped: false,
        })
    }

    fn next_event(&mut self) -> Option<TrialEvent> {
        if self.reaped {
            return None;
        }
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    return self.abort(FaultKind::WorkerProtocol, format!("read error: {err}"));
                }
                None => return self.end_of_stream(),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = match parse_record(self.line_no, &line) {
                Ok(record) => record,
                Err(err) => return self.abort(FaultKind::WorkerProtocol, err.to_string()),
            };
            if let Some(fork) = record.fork().filter(|&fork| fork != self.fork) {
                return self.abort(
                    FaultKind::WorkerProtocol,
                    format!("record for fork {fork} on fork {} stream", self.fork),
                );
            }
            match record {
                WorkerRecord::Trial(trial) => {
                    self.completed += 1;
                    return Some(TrialEvent::Trial(trial));
                }
                WorkerRecord::Fault(fault) => {
                    self.terminal_seen = true;
                    return Some(TrialEvent::Fault(fault));
                }
                WorkerRecord::Deadline(notice) => {
                    self.terminal_seen = true;
                    return Some(TrialEvent::DeadlineExceeded(notice));
                }
                WorkerRecord::Done { trials } => {
                    if trials != self.completed {
                        return self.abort(
                            FaultKind::WorkerProtocol,
                            format!(
                                "worker reported {trials} trials but streamed {}",
                                self.completed
                            ),
                        );
                    }
                    return self.finish();
                }
            }
        }
    }

    /// `done` record received: reap and report a bad exit status.
    fn finish(&mut self) -> Option<TrialEvent> {
        match self.wait() {
            Ok(Some(0)) => None,
            Ok(code) => self.exit_fault(code, "worker exited abnormally after its done record"),
            Err(err) => self.exit_fault(None, &format!("cannot reap worker: {err}")),
        }
    }

    /// Stdout closed without a `done` record.
    fn end_of_stream(&mut self) -> Option<TrialEvent> {
        let code = self.wait().unwrap_or(None);
        if self.terminal_seen {
            warn!(fork = self.fork, ?code, "worker exited without done record after a fault");
            return None;
        }
        self.exit_fault(code, "worker stream ended without a done record")
    }

    fn exit_fault(&mut self, code: Option<i32>, message: &str) -> Option<TrialEvent> {
        if self.terminal_seen {
            return None;
        }
        self.terminal_seen = true;
        warn!(fork = self.fork, ?code, message, "fork worker failed");
        Some(TrialEvent::Fault(ExecutionFault {
            fork: self.fork,
            iteration: self.completed,
            kind: FaultKind::WorkerExit { code },
            message: message.to_owned(),
        }))
    }

    fn abort(&mut self, kind: FaultKind, message: String) -> Option<TrialEvent> {
        self.kill();
        if self.terminal_seen {
            return None;
        }
        self.terminal_seen = true;
        warn!(fork = self.fork, line = self.line_no, %message, "fork worker protocol violation");
        Some(TrialEvent::Fault(ExecutionFault {
            fork: self.fork,
            iteration: self.completed,
            kind,
            message,
        }))
    }

    /// Wait for exit; `Ok(None)` when the worker died from a signal.
    fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status.code())
    }

    fn kill(&mut self) {
        if self.reaped {
            return;
        }
        // Kill fails only if the child already exited; wait reaps either way.
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for RemoteFork {
    fn drop(&mut self) {
        if !self.reaped && !matches!(self.child.try_wait(), Ok(Some(_))) {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    use stressor_types::{Expect, Outcome};

    use super::*;
    use crate::scenario::ScenarioDef;

    fn constant(name: &str, value: i64) -> Arc<dyn Scenario> {
        Arc::new(
            ScenarioDef::new(name, || ())
                .actor(move |()| value)
                .expect(value, Expect::Acceptable, "the only value"),
        )
    }

    fn trials(events: &[TrialEvent]) -> usize {
        events.iter().filter(|e| e.as_trial().is_some()).count()
    }

    fn fault_kinds(events: &[TrialEvent]) -> Vec<FaultKind> {
        events
            .iter()
            .filter_map(|event| match event {
                TrialEvent::Fault(fault) => Some(fault.kind.clone()),
                _ => None,
            })
            .collect()
    }

    #[cfg(unix)]
    fn sh_worker(script: &str) -> Isolation {
        Isolation::Subprocess(WorkerCommand {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into()],
        })
    }

    #[test]
    fn explicit_iterations_per_fork() {
        let events: Vec<_> =
            Scheduler::run(constant("constant", 3), &SchedulerConfig::fixed(3, 25)).collect();
        assert_eq!(events.len(), 75);
        for fork in 0..3 {
            let iterations: Vec<u64> = events
                .iter()
                .filter_map(TrialEvent::as_trial)
                .filter(|t| t.fork == fork)
                .map(|t| t.iteration)
                .collect();
            assert_eq!(iterations, (0..25).collect::<Vec<_>>(), "case=fork={fork}");
        }
    }

    #[test]
    fn stream_is_lazy() {
        let runs = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&runs);
        let scenario: Arc<dyn Scenario> = Arc::new(
            ScenarioDef::new("counting", || ())
                .actor(move |()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    0
                })
                .expect(0, Expect::Acceptable, "zero"),
        );
        let mut stream = Scheduler::run(scenario, &SchedulerConfig::fixed(1, 100));
        assert_eq!(runs.load(Ordering::SeqCst), 0, "case=nothing_before_poll");
        let _ = stream.next();
        assert_eq!(runs.load(Ordering::SeqCst), 1, "case=one_trial_per_poll");
    }

    #[test]
    fn time_budget_bounds_each_fork() {
        let config = SchedulerConfig {
            fork_count: 2,
            time_budget: Duration::from_millis(30),
            ..SchedulerConfig::default()
        };
        let started = Instant::now();
        let events: Vec<_> = Scheduler::run(constant("timed", 1), &config).collect();
        assert!(trials(&events) >= 2, "case=at_least_one_trial_per_fork");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(
            events
                .iter()
                .all(|e| !matches!(e, TrialEvent::DeadlineExceeded(_))),
            "case=budget_end_is_not_a_deadline"
        );
    }

    #[test]
    fn fault_ends_only_its_fork() {
        let scenario: Arc<dyn Scenario> = Arc::new(
            ScenarioDef::new("always_panics", || ())
                .actor(|()| 0)
                .actor(|()| panic!("actor one always fails"))
                .otherwise(Expect::Acceptable, "never reached"),
        );
        let events: Vec<_> = Scheduler::run(scenario, &SchedulerConfig::fixed(3, 10)).collect();
        assert_eq!(events.len(), 3, "case=one_fault_per_fork");
        for (fork, event) in events.iter().enumerate() {
            match event {
                TrialEvent::Fault(fault) => {
                    assert_eq!(fault.fork as usize, fork);
                    assert_eq!(fault.iteration, 0);
                    assert_eq!(fault.kind, FaultKind::ActorPanic { actor: 1 });
                }
                other => panic!("expected fault, got {other:?}"),
            }
        }
    }

    #[test]
    fn expired_deadline_emits_one_notice_before_any_fork() {
        let config = SchedulerConfig::fixed(4, 10).with_deadline(Instant::now());
        let events: Vec<_> = Scheduler::run(constant("late", 0), &config).collect();
        assert_eq!(
            events,
            vec![TrialEvent::DeadlineExceeded(DeadlineNotice {
                fork: 0,
                completed_trials: 0,
            })]
        );
    }

    #[test]
    fn deadline_stops_after_the_in_flight_trial() {
        let scenario: Arc<dyn Scenario> = Arc::new(
            ScenarioDef::new("slow", || ())
                .actor(|()| {
                    thread::sleep(Duration::from_millis(200));
                    1
                })
                .expect(1, Expect::Acceptable, "slept"),
        );
        let deadline = Instant::now() + Duration::from_millis(50);
        let config = SchedulerConfig::fixed(2, 1_000).with_deadline(deadline);
        let events: Vec<_> = Scheduler::run(scenario, &config).collect();
        assert_eq!(trials(&events), 1, "case=in_flight_trial_completes");
        let notices: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, TrialEvent::DeadlineExceeded(_)))
            .collect();
        assert_eq!(notices.len(), 1, "case=exactly_one_notice");
        match events.last() {
            Some(TrialEvent::DeadlineExceeded(notice)) => assert_eq!(notice.completed_trials, 1),
            other => panic!("expected a trailing deadline notice, got {other:?}"),
        }
    }

    #[test]
    fn same_seed_draws_same_plans() {
        let scenario = constant("plans", 0);
        let config = SchedulerConfig::fixed(1, 5).with_seed(99);
        let mut first = Scheduler::fork_events(Arc::clone(&scenario), 0, &config);
        let a: Vec<_> = first.by_ref().collect();
        assert_eq!(first.completed(), 5);
        let b: Vec<_> = Scheduler::fork_events(scenario, 0, &config).collect();
        assert_eq!(a, b);
        let zero = Outcome::from(0);
        for event in &a {
            assert_eq!(event.as_trial().map(|t| &t.outcome), Some(&zero));
        }
    }

    #[test]
    fn unspawnable_worker_is_a_fault_per_fork() {
        let command = WorkerCommand {
            program: "/nonexistent/stressor-worker".into(),
            args: Vec::new(),
        };
        let config = SchedulerConfig::fixed(2, 5).with_isolation(Isolation::Subprocess(command));
        let events: Vec<_> = Scheduler::run(constant("remote", 0), &config).collect();
        assert_eq!(
            fault_kinds(&events),
            [FaultKind::WorkerSpawn, FaultKind::WorkerSpawn]
        );
        assert_eq!(events.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn worker_that_prints_garbage_is_a_protocol_fault() {
        let config = SchedulerConfig::fixed(1, 5).with_isolation(sh_worker("echo not-json"));
        let events: Vec<_> = Scheduler::run(constant("garbage", 0), &config).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(fault_kinds(&events), [FaultKind::WorkerProtocol]);
    }

    #[cfg(unix)]
    #[test]
    fn worker_exiting_without_done_is_an_exit_fault() {
        let config = SchedulerConfig::fixed(1, 5).with_isolation(sh_worker("exit 3"));
        let events: Vec<_> = Scheduler::run(constant("silent", 0), &config).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(
            fault_kinds(&events),
            [FaultKind::WorkerExit { code: Some(3) }]
        );
    }

    #[cfg(unix)]
    #[test]
    fn worker_deadline_record_ends_stream_without_waiting_for_exit() {
        let script = r#"echo '{"record":"trial","fork":0,"iteration":0,"outcome":"0"}'
echo '{"record":"deadline","fork":0,"completed_trials":1}'
sleep 5"#;
        let config = SchedulerConfig::fixed(2, 5).with_isolation(sh_worker(script));
        let started = Instant::now();
        let events: Vec<_> = Scheduler::run(constant("remote_deadline", 0), &config).collect();
        assert!(started.elapsed() < Duration::from_secs(3), "case=killed");
        assert_eq!(events.len(), 2, "case=no_second_fork");
        assert!(events[0].as_trial().is_some());
        assert_eq!(
            events[1],
            TrialEvent::DeadlineExceeded(DeadlineNotice {
                fork: 0,
                completed_trials: 1,
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn worker_fault_then_bad_exit_yields_one_fault() {
        let script = r#"echo '{"record":"fault","fork":0,"iteration":0,"kind":{"kind":"reset_panic"},"message":"boom"}'
exit 3"#;
        let config = SchedulerConfig::fixed(1, 5).with_isolation(sh_worker(script));
        let events: Vec<_> = Scheduler::run(constant("remote_fault", 0), &config).collect();
        assert_eq!(fault_kinds(&events), [FaultKind::ResetPanic]);
        assert_eq!(events.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn worker_done_count_must_match_streamed_trials() {
        let script = r#"echo '{"record":"done","trials":4}'"#;
        let config = SchedulerConfig::fixed(1, 5).with_isolation(sh_worker(script));
        let events: Vec<_> = Scheduler::run(constant("remote_count", 0), &config).collect();
        match events.as_slice() {
            [TrialEvent::Fault(fault)] => {
                assert_eq!(fault.kind, FaultKind::WorkerProtocol);
                assert_eq!(fault.message, "worker reported 4 trials but streamed 0");
            }
            other => panic!("expected one protocol fault, got {other:?}"),
        }
    }
}
