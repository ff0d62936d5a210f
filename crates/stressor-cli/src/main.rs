use std::env;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use stressor_error::StressError;
use stressor_harness::report::{self, ReportFormat};
use stressor_harness::{
    Harness, HarnessConfig, Isolation, StressMode, WORKER_FLAG, WorkerCommand, WorkerRequest,
    run_fork_worker,
};
use stressor_scenarios::builtin_registry;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Options from the command line. `None` leaves the config file or preset
/// value in place.
#[derive(Debug, Default, PartialEq, Eq)]
struct CliConfig {
    config_path: Option<PathBuf>,
    mode: Option<StressMode>,
    forks: Option<u32>,
    time_ms: Option<u64>,
    iterations: Option<u64>,
    deadline_ms: Option<u64>,
    seed: Option<u64>,
    filter: Option<String>,
    strict_faults: bool,
    format: ReportFormat,
    output: Option<PathBuf>,
    bundle_dir: Option<PathBuf>,
    in_process: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Help,
    List,
    Run(CliConfig),
}

fn print_help() {
    println!(
        "stressor: run concurrency stress scenarios and audit their outcomes

USAGE:
    stressor [OPTIONS]

OPTIONS:
    --list                    List registered scenarios and exit
    --filter <SUBSTR>         Only run scenarios whose name contains SUBSTR
    --mode <MODE>             sanity|quick|default|tough|stress (default: default)
    --forks <N>               Forks per scenario
    --time-ms <MS>            Per-fork time budget
    --iterations <N>          Fixed trial count per fork (overrides --time-ms)
    --deadline-ms <MS>        Global deadline for the whole invocation
    --seed <U64>              Root seed for start-order shuffling and jitter
    --config <PATH>           TOML harness configuration
    --format <FMT>            console|jsonl (default: console)
    --output <PATH>           Write the report to PATH instead of stdout
    --bundle-dir <DIR>        Write a run bundle under DIR
    --in-process              Run forks in this process instead of worker processes
    --strict-faults           Treat execution faults as failures
    -h, --help                Show this help

EXIT CODES:
    0  every scenario passed
    1  at least one scenario failed
    2  registration, configuration or usage error"
    );
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_value<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid value for {flag}: {raw:?}"))
}

fn parse_args(args: &[String]) -> Result<CliCommand, String> {
    let mut config = CliConfig::default();
    let mut list = false;

    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "--list" => list = true,
            "--filter" => config.filter = Some(take_value(args, &mut index, flag)?.to_owned()),
            "--mode" => {
                let raw = take_value(args, &mut index, flag)?;
                config.mode = Some(raw.parse().map_err(|err: StressError| err.to_string())?);
            }
            "--forks" => {
                config.forks = Some(parse_value(take_value(args, &mut index, flag)?, flag)?);
            }
            "--time-ms" => {
                config.time_ms = Some(parse_value(take_value(args, &mut index, flag)?, flag)?);
            }
            "--iterations" => {
                config.iterations = Some(parse_value(take_value(args, &mut index, flag)?, flag)?);
            }
            "--deadline-ms" => {
                config.deadline_ms = Some(parse_value(take_value(args, &mut index, flag)?, flag)?);
            }
            "--seed" => config.seed = Some(parse_value(take_value(args, &mut index, flag)?, flag)?),
            "--config" => {
                config.config_path = Some(PathBuf::from(take_value(args, &mut index, flag)?));
            }
            "--format" => {
                let raw = take_value(args, &mut index, flag)?;
                config.format = raw.parse().map_err(|err: StressError| err.to_string())?;
            }
            "--output" => config.output = Some(PathBuf::from(take_value(args, &mut index, flag)?)),
            "--bundle-dir" => {
                config.bundle_dir = Some(PathBuf::from(take_value(args, &mut index, flag)?));
            }
            "--in-process" => config.in_process = true,
            "--strict-faults" => config.strict_faults = true,
            "-h" | "--help" => return Ok(CliCommand::Help),
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }

    if list {
        return Ok(CliCommand::List);
    }
    Ok(CliCommand::Run(config))
}

/// File config with command-line overrides applied on top.
fn resolve_config(cli: &CliConfig) -> Result<HarnessConfig, StressError> {
    let mut config = match &cli.config_path {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    config.forks = cli.forks.or(config.forks);
    config.time_ms = cli.time_ms.or(config.time_ms);
    config.iterations = cli.iterations.or(config.iterations);
    config.deadline_ms = cli.deadline_ms.or(config.deadline_ms);
    config.seed = cli.seed.or(config.seed);
    config.filter = cli.filter.clone().or(config.filter);
    config.strict_faults |= cli.strict_faults;
    config.validate()?;
    Ok(config)
}

fn list_scenarios() -> Result<u8, StressError> {
    let scenarios = builtin_registry().discover()?;
    let width = scenarios.iter().map(|s| s.name().len()).max().unwrap_or(0);
    for scenario in scenarios {
        println!(
            "{:<width$}  actors={}  {}",
            scenario.name(),
            scenario.actor_count(),
            scenario.description()
        );
    }
    Ok(0)
}

fn run_suite(cli: &CliConfig) -> Result<u8, StressError> {
    let config = resolve_config(cli)?;
    let isolation = if cli.in_process {
        Isolation::InProcess
    } else {
        Isolation::Subprocess(WorkerCommand::current_exe()?)
    };

    let mut harness = Harness::new(builtin_registry(), config).with_isolation(isolation);
    if let Some(dir) = &cli.bundle_dir {
        harness = harness.with_bundle_dir(dir);
    }
    let outcome = harness.run()?;

    match &cli.output {
        Some(path) => {
            let mut file = BufWriter::new(std::fs::File::create(path)?);
            report::write_reports(cli.format, &outcome.reports, &mut file)?;
        }
        None => report::write_reports(cli.format, &outcome.reports, &mut io::stdout().lock())?,
    }
    if let Some(bundle) = &outcome.bundle {
        eprintln!("run bundle: {}", bundle.display());
    }
    Ok(outcome.exit_code())
}

fn run(args: &[String]) -> Result<u8, StressError> {
    let command = parse_args(args).map_err(StressError::config)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(0)
        }
        CliCommand::List => list_scenarios(),
        CliCommand::Run(cli) => run_suite(&cli),
    }
}

fn run_worker(args: &[String]) -> Result<u8, StressError> {
    let request = WorkerRequest::parse_args(args).map_err(StressError::config)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    run_fork_worker(&builtin_registry(), &request, &mut out)?;
    out.flush()?;
    Ok(0)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();

    let result = if args.first().map(String::as_str) == Some(WORKER_FLAG) {
        run_worker(&args)
    } else {
        run(&args)
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %err, "stressor failed");
            eprintln!("ERROR stressor: {err}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parses_run_options() {
        let command = parse_args(&args(&[
            "--filter",
            "cas",
            "--mode",
            "quick",
            "--forks",
            "3",
            "--iterations",
            "100",
            "--seed",
            "9",
            "--format",
            "jsonl",
            "--in-process",
            "--strict-faults",
        ]))
        .expect("parse");
        let CliCommand::Run(cli) = command else {
            panic!("expected run command");
        };
        assert_eq!(cli.filter.as_deref(), Some("cas"));
        assert_eq!(cli.mode, Some(StressMode::Quick));
        assert_eq!(cli.forks, Some(3));
        assert_eq!(cli.iterations, Some(100));
        assert_eq!(cli.seed, Some(9));
        assert_eq!(cli.format, ReportFormat::Jsonl);
        assert!(cli.in_process && cli.strict_faults);
    }

    #[test]
    fn list_and_help_short_circuit() {
        assert_eq!(
            parse_args(&args(&["--list"])).expect("parse"),
            CliCommand::List
        );
        assert_eq!(
            parse_args(&args(&["--forks", "2", "-h"])).expect("parse"),
            CliCommand::Help
        );
    }

    #[test]
    fn usage_errors() {
        for (case, raw) in [
            ("unknown_flag", vec!["--bogus"]),
            ("missing_value", vec!["--forks"]),
            ("bad_number", vec!["--forks", "two"]),
            ("bad_mode", vec!["--mode", "loud"]),
            ("bad_format", vec!["--format", "xml"]),
        ] {
            assert!(parse_args(&args(&raw)).is_err(), "case={case}");
        }
    }

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stress.toml");
        std::fs::write(&path, "mode = \"tough\"\nforks = 3\nseed = 1\n").expect("write");
        let cli = CliConfig {
            config_path: Some(path),
            forks: Some(1),
            strict_faults: true,
            ..CliConfig::default()
        };
        let config = resolve_config(&cli).expect("resolve");
        assert_eq!(config.mode, StressMode::Tough);
        assert_eq!(config.forks, Some(1), "case=flag_beats_file");
        assert_eq!(config.seed, Some(1), "case=file_kept_without_flag");
        assert!(config.strict_faults);

        let zero = CliConfig {
            forks: Some(0),
            ..CliConfig::default()
        };
        assert!(resolve_config(&zero).is_err());
    }
}
