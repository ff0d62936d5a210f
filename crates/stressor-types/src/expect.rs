use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Outcome;

/// Verdict tag a scenario author attaches to an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    /// Legitimate result under the memory model.
    Acceptable,
    /// Legitimate but rare; worth reporting when seen, and when never seen.
    AcceptableInteresting,
    /// Observing this outcome is a correctness bug.
    Forbidden,
}

impl Expect {
    pub const ALL: [Self; 3] = [
        Self::Acceptable,
        Self::AcceptableInteresting,
        Self::Forbidden,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acceptable => "ACCEPTABLE",
            Self::AcceptableInteresting => "ACCEPTABLE_INTERESTING",
            Self::Forbidden => "FORBIDDEN",
        }
    }

    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of an expectation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub expect: Expect,
    pub description: String,
}

/// How an observed outcome resolved against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    /// Listed explicitly.
    Declared(&'a Expectation),
    /// Matched only by the catch-all row.
    CatchAll(&'a Expectation),
    /// Neither listed nor covered by a catch-all.
    Unknown,
}

impl Classification<'_> {
    /// The verdict tag, or `None` for an unknown outcome.
    #[must_use]
    pub fn expect(&self) -> Option<Expect> {
        match self {
            Self::Declared(entry) | Self::CatchAll(entry) => Some(entry.expect),
            Self::Unknown => None,
        }
    }
}

/// Mapping from outcome tuple to [`Expect`], with an optional catch-all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationTable {
    entries: BTreeMap<Outcome, Expectation>,
    catch_all: Option<Expectation>,
}

impl ExpectationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the verdict for one outcome. A repeated outcome replaces the
    /// earlier row.
    #[must_use]
    pub fn with(
        mut self,
        outcome: impl Into<Outcome>,
        expect: Expect,
        description: impl Into<String>,
    ) -> Self {
        self.insert(outcome.into(), expect, description);
        self
    }

    /// Verdict applied to every outcome not listed explicitly.
    #[must_use]
    pub fn otherwise(mut self, expect: Expect, description: impl Into<String>) -> Self {
        self.catch_all = Some(Expectation {
            expect,
            description: description.into(),
        });
        self
    }

    pub fn insert(&mut self, outcome: Outcome, expect: Expect, description: impl Into<String>) {
        self.entries.insert(
            outcome,
            Expectation {
                expect,
                description: description.into(),
            },
        );
    }

    #[must_use]
    pub fn classify(&self, outcome: &Outcome) -> Classification<'_> {
        if let Some(entry) = self.entries.get(outcome) {
            return Classification::Declared(entry);
        }
        match &self.catch_all {
            Some(entry) => Classification::CatchAll(entry),
            None => Classification::Unknown,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Outcome, &Expectation)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn catch_all(&self) -> Option<&Expectation> {
        self.catch_all.as_ref()
    }

    /// True when no outcome could ever be classified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.catch_all.is_none()
    }

    /// Whether any row, the catch-all included, is tagged
    /// [`Expect::AcceptableInteresting`].
    #[must_use]
    pub fn declares_interesting(&self) -> bool {
        self.entries
            .values()
            .chain(self.catch_all.as_ref())
            .any(|entry| entry.expect == Expect::AcceptableInteresting)
    }
}
