//! Scenario definition contract and single-trial execution.
//!
//! A scenario is a small concurrent program: a state initializer, N actor
//! bodies that race on that state, and an extractor that turns the finished
//! state plus the actors' return values into an [`Outcome`].
//!
//! ```text
//!  run_trial(plan)
//!    ├── init()                      fresh state, owned by this trial only
//!    ├── spawn actors in plan order  each spins on the StartGate
//!    │     └── gate opens → jitter spins → actor(&state)
//!    ├── join all actors
//!    └── extract(&state, results)    → Outcome
//! ```
//!
//! The harness adds no synchronization around the state. Whatever ordering
//! the actors observe is what the scenario supplies itself.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use rand::Rng;
use rand::seq::SliceRandom;
use stressor_types::{Expect, ExpectationTable, FaultKind, Outcome};

/// Spins between `yield_now` calls while waiting at the start gate.
const GATE_SPINS_PER_YIELD: u32 = 128;

/// Type-erased scenario as seen by the registry, scheduler and auditor.
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn actor_count(&self) -> usize;

    /// Declared arity of the outcome extractor.
    fn extract_arity(&self) -> usize;

    fn expectations(&self) -> &ExpectationTable;

    /// Execute one trial against freshly constructed state.
    fn run_trial(&self, plan: &TrialPlan) -> Result<Outcome, TrialFault>;
}

impl fmt::Debug for dyn Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name())
            .field("actors", &self.actor_count())
            .finish_non_exhaustive()
    }
}

/// Why a trial produced no outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialFault {
    pub kind: FaultKind,
    pub message: String,
}

impl TrialFault {
    fn from_panic(kind: FaultKind, payload: &(dyn Any + Send)) -> Self {
        Self {
            kind,
            message: panic_message(payload),
        }
    }
}

/// Per-trial launch plan drawn by the scheduler.
///
/// `spawn_order` permutes the order actor threads are created in and
/// `start_spins` delays each actor by a bounded spin after the gate opens.
/// Both only widen the set of interleavings sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPlan {
    spawn_order: Vec<usize>,
    start_spins: Vec<u32>,
}

impl TrialPlan {
    /// Actors spawned in declaration order with no start jitter.
    #[must_use]
    pub fn sequential(actors: usize) -> Self {
        Self {
            spawn_order: (0..actors).collect(),
            start_spins: vec![0; actors],
        }
    }

    pub fn draw(
        order_rng: &mut impl Rng,
        jitter_rng: &mut impl Rng,
        actors: usize,
        max_spins: u32,
    ) -> Self {
        let mut spawn_order: Vec<usize> = (0..actors).collect();
        spawn_order.shuffle(order_rng);
        let start_spins = (0..actors)
            .map(|_| {
                if max_spins == 0 {
                    0
                } else {
                    jitter_rng.gen_range(0..=max_spins)
                }
            })
            .collect();
        Self {
            spawn_order,
            start_spins,
        }
    }

    #[must_use]
    pub fn spawn_order(&self) -> &[usize] {
        &self.spawn_order
    }

    #[must_use]
    pub fn spins_for(&self, actor: usize) -> u32 {
        self.start_spins.get(actor).copied().unwrap_or(0)
    }
}

/// Spinning start rendezvous. Opens once every party has arrived; `abort`
/// releases waiters without opening so a failed spawn cannot strand them.
struct StartGate {
    parties: usize,
    arrived: AtomicUsize,
    aborted: AtomicBool,
}

impl StartGate {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            arrived: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    /// Returns `false` when the gate was aborted.
    fn wait(&self) -> bool {
        self.arrived.fetch_add(1, Ordering::AcqRel);
        let mut spins = 0_u32;
        loop {
            if self.aborted.load(Ordering::Acquire) {
                return false;
            }
            if self.arrived.load(Ordering::Acquire) >= self.parties {
                return true;
            }
            spins = spins.wrapping_add(1);
            if spins % GATE_SPINS_PER_YIELD == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

type InitFn<S> = Box<dyn Fn() -> S + Send + Sync>;
type ActorFn<S> = Box<dyn Fn(&S) -> i64 + Send + Sync>;
type ExtractFn<S> = Box<dyn Fn(&S, &[i64]) -> Outcome + Send + Sync>;

/// Builder-style scenario over a concrete state type `S`.
///
/// ```ignore
/// let scenario = ScenarioDef::new("visit_cas_race", DistSlots::new)
///     .actor(|s| s.try_visit())
///     .actor(|s| s.try_visit())
///     .expect([1, 0], Expect::Acceptable, "first actor won")
///     .expect([0, 1], Expect::Acceptable, "second actor won")
///     .otherwise(Expect::Forbidden, "zero or two winners");
/// ```
///
/// Without an explicit [`extract`](Self::extract) the outcome is the tuple of
/// actor return values in declaration order.
pub struct ScenarioDef<S> {
    name: String,
    description: String,
    init: InitFn<S>,
    actors: Vec<ActorFn<S>>,
    extract: Option<(usize, ExtractFn<S>)>,
    table: ExpectationTable,
}

impl<S: Sync + 'static> ScenarioDef<S> {
    pub fn new(name: impl Into<String>, init: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            init: Box::new(init),
            actors: Vec::new(),
            extract: None,
            table: ExpectationTable::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn actor(mut self, body: impl Fn(&S) -> i64 + Send + Sync + 'static) -> Self {
        self.actors.push(Box::new(body));
        self
    }

    /// Custom extractor receiving the final state and the `arity` actor
    /// results. Registration rejects an `arity` that differs from the actor
    /// count.
    pub fn extract(
        mut self,
        arity: usize,
        extractor: impl Fn(&S, &[i64]) -> Outcome + Send + Sync + 'static,
    ) -> Self {
        self.extract = Some((arity, Box::new(extractor)));
        self
    }

    pub fn expect(
        mut self,
        outcome: impl Into<Outcome>,
        expect: Expect,
        description: impl Into<String>,
    ) -> Self {
        self.table.insert(outcome.into(), expect, description);
        self
    }

    pub fn otherwise(mut self, expect: Expect, description: impl Into<String>) -> Self {
        self.table = self.table.otherwise(expect, description);
        self
    }

    pub fn expectations_table(mut self, table: ExpectationTable) -> Self {
        self.table = table;
        self
    }
}

impl<S: Sync + 'static> Scenario for ScenarioDef<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn actor_count(&self) -> usize {
        self.actors.len()
    }

    fn extract_arity(&self) -> usize {
        self.extract
            .as_ref()
            .map_or(self.actors.len(), |(arity, _)| *arity)
    }

    fn expectations(&self) -> &ExpectationTable {
        &self.table
    }

    fn run_trial(&self, plan: &TrialPlan) -> Result<Outcome, TrialFault> {
        let state = catch_unwind(AssertUnwindSafe(|| (self.init)()))
            .map_err(|payload| TrialFault::from_panic(FaultKind::ResetPanic, &*payload))?;

        let results = self.race_actors(&state, plan)?;

        match &self.extract {
            Some((_, extractor)) => catch_unwind(AssertUnwindSafe(|| extractor(&state, &results)))
                .map_err(|payload| TrialFault::from_panic(FaultKind::ExtractPanic, &*payload)),
            None => Ok(Outcome::new(results)),
        }
    }
}

impl<S: Sync + 'static> ScenarioDef<S> {
    /// Launch every actor against `state`, wait for all of them, and return
    /// their results in declaration order.
    fn race_actors(&self, state: &S, plan: &TrialPlan) -> Result<Vec<i64>, TrialFault> {
        let count = self.actors.len();
        let gate = StartGate::new(count);

        let joined: Vec<(usize, thread::Result<i64>)> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(count);
            for &idx in plan.spawn_order() {
                let actor = &self.actors[idx];
                let gate = &gate;
                let spins = plan.spins_for(idx);
                let spawned = thread::Builder::new()
                    .name(format!("{}-actor-{idx}", self.name))
                    .spawn_scoped(scope, move || {
                        if !gate.wait() {
                            return None;
                        }
                        for _ in 0..spins {
                            std::hint::spin_loop();
                        }
                        Some(actor(state))
                    });
                match spawned {
                    Ok(handle) => handles.push((idx, handle)),
                    Err(err) => {
                        gate.abort();
                        let mut joined = drain(handles);
                        joined.push((
                            idx,
                            Err(Box::new(SpawnFailure {
                                actor: idx,
                                detail: err.to_string(),
                            }) as Box<dyn Any + Send>),
                        ));
                        return joined;
                    }
                }
            }
            drain(handles)
        });

        let mut results = vec![0_i64; count];
        let mut first_fault: Option<TrialFault> = None;
        for (idx, joined) in joined {
            match joined {
                Ok(value) => results[idx] = value,
                Err(payload) => {
                    let fault = match payload.downcast_ref::<SpawnFailure>() {
                        Some(spawn) => TrialFault {
                            kind: FaultKind::ThreadSpawn { actor: spawn.actor },
                            message: spawn.detail.clone(),
                        },
                        None => {
                            TrialFault::from_panic(FaultKind::ActorPanic { actor: idx }, &*payload)
                        }
                    };
                    // A spawn failure explains every other missing result.
                    let is_spawn = matches!(fault.kind, FaultKind::ThreadSpawn { .. });
                    if first_fault.is_none() || is_spawn {
                        first_fault = Some(fault);
                    }
                }
            }
        }
        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(results),
        }
    }
}

struct SpawnFailure {
    actor: usize,
    detail: String,
}

/// Join handles, mapping an aborted actor (gate never opened) to a result of
/// zero; the spawn failure recorded alongside makes the trial fault anyway.
fn drain(
    handles: Vec<(usize, thread::ScopedJoinHandle<'_, Option<i64>>)>,
) -> Vec<(usize, thread::Result<i64>)> {
    handles
        .into_iter()
        .map(|(idx, handle)| (idx, handle.join().map(|value| value.unwrap_or(0))))
        .collect()
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
