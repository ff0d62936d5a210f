use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use stressor_error::StressError;

/// Result tuple observed after all actors of one trial completed.
///
/// Rendered as comma-separated values (`"1, 0"`), which is also the form used
/// in reports and in the fork worker protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Outcome(Vec<i64>);

impl Outcome {
    #[must_use]
    pub fn new(values: Vec<i64>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[i64] {
        &self.0
    }

    /// Number of values in the tuple.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl<const N: usize> From<[i64; N]> for Outcome {
    fn from(values: [i64; N]) -> Self {
        Self(values.to_vec())
    }
}

impl From<Vec<i64>> for Outcome {
    fn from(values: Vec<i64>) -> Self {
        Self(values)
    }
}

impl From<i64> for Outcome {
    fn from(value: i64) -> Self {
        Self(vec![value])
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl FromStr for Outcome {
    type Err = StressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        trimmed
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<i64>()
                    .map_err(|err| StressError::OutcomeParse {
                        input: input.to_owned(),
                        detail: format!("{:?}: {err}", part.trim()),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl From<Outcome> for String {
    fn from(outcome: Outcome) -> Self {
        outcome.to_string()
    }
}

impl TryFrom<String> for Outcome {
    type Error = StressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
