//! Shared data model for the stressor harness.
//!
//! - [`Outcome`]: the comparable tuple extracted after a trial's actors finish.
//! - [`ExpectationTable`]: the scenario author's verdict for each outcome.
//! - [`TrialEvent`]: what the scheduler emits, one record per trial, fault or
//!   deadline notice. These records cross the fork process boundary, so every
//!   type here is serde-serializable.

pub mod expect;
pub mod outcome;
pub mod trial;

pub use expect::{Classification, Expect, Expectation, ExpectationTable};
pub use outcome::Outcome;
pub use trial::{DeadlineNotice, ExecutionFault, FaultKind, TrialEvent, TrialResult, Verdict};
