//! Harness configuration: run-mode presets, the TOML file layer, and the
//! resolved per-scenario [`SchedulerConfig`].
//!
//! Precedence is preset < file field < CLI flag. The CLI applies its flags
//! onto a [`HarnessConfig`] loaded from `--config` before resolving it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use stressor_error::{Result, StressError};

use crate::seed_taxonomy::DEFAULT_ROOT_SEED;

/// Default bound for the per-actor spin after the start gate opens.
pub const DEFAULT_MAX_START_JITTER_SPINS: u32 = 64;

/// Run-length presets, named after the JCStress modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressMode {
    Sanity,
    Quick,
    #[default]
    Default,
    Tough,
    Stress,
}

impl StressMode {
    pub const ALL: [Self; 5] = [
        Self::Sanity,
        Self::Quick,
        Self::Default,
        Self::Tough,
        Self::Stress,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sanity => "sanity",
            Self::Quick => "quick",
            Self::Default => "default",
            Self::Tough => "tough",
            Self::Stress => "stress",
        }
    }

    #[must_use]
    pub const fn forks(self) -> u32 {
        match self {
            Self::Sanity | Self::Quick => 1,
            Self::Default => 2,
            Self::Tough => 4,
            Self::Stress => 10,
        }
    }

    /// Per-fork time budget in milliseconds.
    #[must_use]
    pub const fn time_ms(self) -> u64 {
        match self {
            Self::Sanity => 20,
            Self::Quick => 100,
            Self::Default => 300,
            Self::Tough => 1_000,
            Self::Stress => 2_000,
        }
    }
}

impl fmt::Display for StressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StressMode {
    type Err = StressError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                StressError::config(format!(
                    "unknown mode {s:?} (expected sanity|quick|default|tough|stress)"
                ))
            })
    }
}

/// File-level configuration. Every field except `mode` and `strict_faults`
/// is optional and falls back to the mode preset or a built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub mode: StressMode,
    pub forks: Option<u32>,
    /// Per-fork time budget in milliseconds.
    pub time_ms: Option<u64>,
    /// Explicit trial count per fork; overrides the time budget.
    pub iterations: Option<u64>,
    /// Global wall-clock deadline for the whole invocation.
    pub deadline_ms: Option<u64>,
    pub seed: Option<u64>,
    pub max_start_jitter_spins: Option<u32>,
    /// Treat execution faults as failures.
    pub strict_faults: bool,
    pub filter: Option<String>,
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| StressError::config(format!("invalid harness config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            let path = path.display();
            StressError::config(format!("cannot read {path}: {err}"))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forks == Some(0) {
            return Err(StressError::config("forks must be at least 1"));
        }
        if self.iterations == Some(0) {
            return Err(StressError::config("iterations must be at least 1"));
        }
        if self.time_ms == Some(0) && self.iterations.is_none() {
            return Err(StressError::config("time_ms must be positive when iterations is unset"));
        }
        Ok(())
    }

    #[must_use]
    pub fn fork_count(&self) -> u32 {
        self.forks.unwrap_or_else(|| self.mode.forks())
    }

    #[must_use]
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_ms.unwrap_or_else(|| self.mode.time_ms()))
    }

    #[must_use]
    pub fn root_seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_ROOT_SEED)
    }

    /// Absolute deadline for an invocation that started at `started`.
    #[must_use]
    pub fn deadline_from(&self, started: Instant) -> Option<Instant> {
        self.deadline_ms.map(|ms| started + Duration::from_millis(ms))
    }

    /// Resolve into the scheduler's view. `deadline` is shared by every
    /// scenario of the invocation, so the caller computes it once.
    pub fn scheduler_config(
        &self,
        isolation: Isolation,
        deadline: Option<Instant>,
    ) -> Result<SchedulerConfig> {
        self.validate()?;
        Ok(SchedulerConfig {
            fork_count: self.fork_count(),
            iterations_per_fork: self.iterations,
            time_budget: self.time_budget(),
            deadline,
            isolation,
            seed: self.root_seed(),
            max_start_jitter_spins: self
                .max_start_jitter_spins
                .unwrap_or(DEFAULT_MAX_START_JITTER_SPINS),
        })
    }
}

/// Program and leading arguments used to re-launch the harness as a fork
/// worker. Worker flags are appended after `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Re-launch the running executable.
    pub fn current_exe() -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: Vec::new(),
        })
    }
}

/// Where a fork executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Isolation {
    /// Fresh actor threads inside the harness process.
    #[default]
    InProcess,
    /// A separate OS process per fork.
    Subprocess(WorkerCommand),
}

/// Resolved knobs for one [`crate::scheduler::Scheduler::run`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub fork_count: u32,
    pub iterations_per_fork: Option<u64>,
    /// Soft per-fork wall-time cap, used when `iterations_per_fork` is unset.
    pub time_budget: Duration,
    pub deadline: Option<Instant>,
    pub isolation: Isolation,
    pub seed: u64,
    pub max_start_jitter_spins: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fork_count: StressMode::Default.forks(),
            iterations_per_fork: None,
            time_budget: Duration::from_millis(StressMode::Default.time_ms()),
            deadline: None,
            isolation: Isolation::InProcess,
            seed: DEFAULT_ROOT_SEED,
            max_start_jitter_spins: DEFAULT_MAX_START_JITTER_SPINS,
        }
    }
}

impl SchedulerConfig {
    /// Fixed trial count per fork, no deadline, in-process.
    #[must_use]
    pub fn fixed(fork_count: u32, iterations: u64) -> Self {
        Self {
            fork_count,
            iterations_per_fork: Some(iterations),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_presets_match_jcstress_shapes() {
        let expected = [
            (StressMode::Sanity, 1, 20),
            (StressMode::Quick, 1, 100),
            (StressMode::Default, 2, 300),
            (StressMode::Tough, 4, 1_000),
            (StressMode::Stress, 10, 2_000),
        ];
        for (mode, forks, time_ms) in expected {
            assert_eq!(mode.forks(), forks, "case=mode={mode}");
            assert_eq!(mode.time_ms(), time_ms, "case=mode={mode}");
            assert_eq!(mode.as_str().parse::<StressMode>().expect("parse"), mode);
        }
        assert!("extreme".parse::<StressMode>().is_err());
    }

    #[test]
    fn empty_file_is_the_default_mode() {
        let config = HarnessConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.fork_count(), 2);
        assert_eq!(config.time_budget(), Duration::from_millis(300));
        assert_eq!(config.root_seed(), DEFAULT_ROOT_SEED);
    }

    #[test]
    fn explicit_fields_override_the_preset() {
        let config = HarnessConfig::from_toml_str(
            r#"
mode = "tough"
time_ms = 50
seed = 7
strict_faults = true
filter = "cas"
"#,
        )
        .expect("valid config");
        assert_eq!(config.fork_count(), 4, "case=fork_count_from_preset");
        assert_eq!(config.time_budget(), Duration::from_millis(50));
        assert_eq!(config.root_seed(), 7);
        assert!(config.strict_faults);
        assert_eq!(config.filter.as_deref(), Some("cas"));
    }

    #[test]
    fn unknown_keys_and_zero_counts_are_rejected() {
        for (case, text) in [
            ("unknown_key", "fork = 2"),
            ("zero_forks", "forks = 0"),
            ("zero_iterations", "iterations = 0"),
            ("zero_time_budget", "time_ms = 0"),
            ("bad_mode", "mode = \"loud\""),
        ] {
            let err = HarnessConfig::from_toml_str(text).expect_err(case);
            assert!(matches!(err, StressError::Config(_)), "case={case}");
        }
        HarnessConfig::from_toml_str("time_ms = 0\niterations = 10")
            .expect("iterations make a zero time budget irrelevant");
    }

    #[test]
    fn scheduler_config_resolution() {
        let config = HarnessConfig {
            iterations: Some(500),
            max_start_jitter_spins: Some(0),
            ..HarnessConfig::default()
        };
        let started = Instant::now();
        let deadline = HarnessConfig {
            deadline_ms: Some(250),
            ..config.clone()
        }
        .deadline_from(started);
        let resolved = config
            .scheduler_config(Isolation::InProcess, deadline)
            .expect("valid");
        assert_eq!(resolved.fork_count, 2);
        assert_eq!(resolved.iterations_per_fork, Some(500));
        assert_eq!(resolved.max_start_jitter_spins, 0);
        assert_eq!(
            resolved.deadline,
            Some(started + Duration::from_millis(250))
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stress.toml");
        std::fs::write(&path, "mode = \"quick\"\n").expect("write config");
        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.mode, StressMode::Quick);
        assert!(HarnessConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
