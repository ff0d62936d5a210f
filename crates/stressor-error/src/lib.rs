//! Error types for the stressor harness.
//!
//! Only conditions that stop the harness are errors. A crashed trial or
//! fork is recorded as an `ExecutionFault` record, and an unexpected outcome
//! is a verdict, so neither appears here.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, StressError>;

/// Malformed scenario descriptor found during discovery.
///
/// Any of these aborts the whole run before a single trial executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("duplicate scenario name: {name}")]
    DuplicateName { name: String },

    #[error("scenario {name} declares zero actors")]
    NoActors { name: String },

    #[error("scenario {name}: extractor arity {arity} does not match actor count {actors}")]
    ArityMismatch {
        name: String,
        actors: usize,
        arity: usize,
    },

    #[error("invalid scenario name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("scenario {name} has an empty expectation table and no catch-all")]
    EmptyExpectations { name: String },
}

impl RegistrationError {
    /// Name of the offending scenario.
    #[must_use]
    pub fn scenario(&self) -> &str {
        match self {
            Self::DuplicateName { name }
            | Self::NoActors { name }
            | Self::ArityMismatch { name, .. }
            | Self::InvalidName { name, .. }
            | Self::EmptyExpectations { name } => name,
        }
    }
}

/// Primary error type for the harness.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("cannot parse outcome {input:?}: {detail}")]
    OutcomeParse { input: String, detail: String },

    #[error("fork worker protocol violation at line {line}: {detail}")]
    WorkerProtocol { line: usize, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StressError {
    /// Build a [`StressError::Config`] from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Build a [`StressError::Internal`] from any displayable message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error was raised while validating scenario descriptors.
    #[must_use]
    pub const fn is_registration(&self) -> bool {
        matches!(self, Self::Registration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_error_converts_and_keeps_scenario_name() {
        let err: StressError = RegistrationError::ArityMismatch {
            name: "visit_cas_race".to_owned(),
            actors: 2,
            arity: 3,
        }
        .into();
        assert!(err.is_registration());
        let rendered = err.to_string();
        assert!(
            rendered.contains("visit_cas_race"),
            "case=rendered={rendered}"
        );
        assert!(rendered.contains("arity 3"), "case=rendered={rendered}");
    }

    #[test]
    fn scenario_accessor_covers_every_variant() {
        let cases = [
            RegistrationError::DuplicateName { name: "a".into() },
            RegistrationError::NoActors { name: "a".into() },
            RegistrationError::ArityMismatch {
                name: "a".into(),
                actors: 1,
                arity: 2,
            },
            RegistrationError::InvalidName {
                name: "a".into(),
                reason: "x",
            },
            RegistrationError::EmptyExpectations { name: "a".into() },
        ];
        for case in cases {
            assert_eq!(case.scenario(), "a", "case={case}");
        }
    }

    #[test]
    fn io_errors_are_not_registration_errors() {
        let err: StressError = std::io::Error::other("boom").into();
        assert!(!err.is_registration());
        assert!(err.to_string().contains("boom"));
    }
}
