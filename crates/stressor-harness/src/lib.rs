//! Concurrency stress-test harness.
//!
//! Scenarios are registered explicitly in a [`ScenarioRegistry`], executed
//! many times across isolated forks by the [`Scheduler`], and judged against
//! their expectation tables by the [`auditor`]. [`Harness`] ties the three
//! together for a whole invocation.

pub mod auditor;
pub mod config;
pub mod log;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod seed_taxonomy;
pub mod worker;

pub use auditor::{HistogramRow, REPORT_SCHEMA_V1, RunReport, audit, audit_table};
pub use config::{HarnessConfig, Isolation, SchedulerConfig, StressMode, WorkerCommand};
pub use registry::{ScenarioRegistry, select};
pub use report::ReportFormat;
pub use runner::{Harness, HarnessOutcome};
pub use scenario::{Scenario, ScenarioDef, TrialFault, TrialPlan};
pub use scheduler::{ForkEvents, Scheduler, TrialStream};
pub use worker::{WORKER_FLAG, WorkerRecord, WorkerRequest, run_fork_worker};
