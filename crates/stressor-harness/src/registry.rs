//! Explicit scenario registration table.
//!
//! Scenarios are registered by value at startup; nothing is scanned or
//! reflected over. [`ScenarioRegistry::discover`] validates the whole table
//! and is the only way the scheduler gets to see a scenario.

use std::collections::BTreeSet;
use std::sync::Arc;

use stressor_error::{RegistrationError, Result};
use tracing::{debug, error};

use crate::scenario::Scenario;

/// Ordered table of registered scenarios.
#[derive(Default)]
pub struct ScenarioRegistry {
    table: Vec<Arc<dyn Scenario>>,
}

impl ScenarioRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Scenario + 'static>(&mut self, scenario: S) -> &mut Self {
        self.table.push(Arc::new(scenario));
        self
    }

    /// Chaining form of [`register`](Self::register).
    #[must_use]
    pub fn with<S: Scenario + 'static>(mut self, scenario: S) -> Self {
        self.register(scenario);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Validate every registered descriptor and return them in registration
    /// order. Executes no scenario code.
    pub fn discover(&self) -> Result<Vec<Arc<dyn Scenario>>> {
        let mut seen = BTreeSet::new();
        for scenario in &self.table {
            if let Err(err) = validate(scenario.as_ref()) {
                error!(scenario = err.scenario(), error = %err, "scenario registration rejected");
                return Err(err.into());
            }
            if !seen.insert(scenario.name()) {
                let err = RegistrationError::DuplicateName {
                    name: scenario.name().to_owned(),
                };
                error!(scenario = err.scenario(), error = %err, "scenario registration rejected");
                return Err(err.into());
            }
        }
        debug!(count = self.table.len(), "scenario discovery complete");
        Ok(self.table.clone())
    }

    /// Discover, then look one scenario up by exact name.
    pub fn get(&self, name: &str) -> Result<Option<Arc<dyn Scenario>>> {
        Ok(self
            .discover()?
            .into_iter()
            .find(|scenario| scenario.name() == name))
    }
}

/// Scenarios whose name contains `filter`; all of them for `None`.
#[must_use]
pub fn select(scenarios: &[Arc<dyn Scenario>], filter: Option<&str>) -> Vec<Arc<dyn Scenario>> {
    scenarios
        .iter()
        .filter(|scenario| filter.is_none_or(|needle| scenario.name().contains(needle)))
        .cloned()
        .collect()
}

fn validate(scenario: &dyn Scenario) -> std::result::Result<(), RegistrationError> {
    let name = scenario.name();
    if name.is_empty() {
        return Err(RegistrationError::InvalidName {
            name: name.to_owned(),
            reason: "name must be non-empty",
        });
    }
    let path_safe = |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.');
    if !name.chars().all(path_safe) {
        return Err(RegistrationError::InvalidName {
            name: name.to_owned(),
            reason: "only [A-Za-z0-9_.-] is allowed",
        });
    }
    let actors = scenario.actor_count();
    if actors == 0 {
        return Err(RegistrationError::NoActors {
            name: name.to_owned(),
        });
    }
    let arity = scenario.extract_arity();
    if arity != actors {
        return Err(RegistrationError::ArityMismatch {
            name: name.to_owned(),
            actors,
            arity,
        });
    }
    if scenario.expectations().is_empty() {
        return Err(RegistrationError::EmptyExpectations {
            name: name.to_owned(),
        });
    }
    Ok(())
}
