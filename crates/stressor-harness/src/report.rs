//! Report rendering: console tables and JSONL artifacts.

use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;

use stressor_error::{Result, StressError};

use crate::auditor::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Console,
    Jsonl,
}

impl ReportFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Jsonl => "jsonl",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = StressError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "console" => Ok(Self::Console),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(StressError::config(format!(
                "unknown report format {other:?} (expected console|jsonl)"
            ))),
        }
    }
}

/// Render `reports` in `format`.
pub fn render(format: ReportFormat, reports: &[RunReport]) -> Result<String> {
    match format {
        ReportFormat::Console => Ok(render_console(reports)),
        ReportFormat::Jsonl => render_jsonl(reports),
    }
}

pub fn write_reports(
    format: ReportFormat,
    reports: &[RunReport],
    out: &mut impl Write,
) -> Result<()> {
    out.write_all(render(format, reports)?.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// One JSON object per line, fields in declaration order.
pub fn render_jsonl(reports: &[RunReport]) -> Result<String> {
    let mut text = String::new();
    for report in reports {
        text.push_str(&serde_json::to_string(report)?);
        text.push('\n');
    }
    Ok(text)
}

#[must_use]
pub fn render_console(reports: &[RunReport]) -> String {
    let mut text = String::new();
    for report in reports {
        render_scenario(&mut text, report);
    }

    let failed: Vec<&RunReport> = reports.iter().filter(|r| !r.passed()).collect();
    if !failed.is_empty() {
        text.push_str("FAILED SCENARIOS\n");
        for report in &failed {
            let _ = writeln!(text, "  {}", report.triage_line());
        }
        text.push('\n');
    }

    let partial = reports.iter().filter(|r| r.partial).count();
    let faults: usize = reports.iter().map(|r| r.fault_count).sum();
    let _ = writeln!(
        text,
        "{} scenario(s): {} passed, {} failed, {} fault(s){}",
        reports.len(),
        reports.len() - failed.len(),
        failed.len(),
        faults,
        if partial > 0 { ", PARTIAL" } else { "" },
    );
    text
}

fn render_scenario(text: &mut String, report: &RunReport) {
    let _ = writeln!(
        text,
        "[{}]{} {} ({} trials, {} faults)",
        report.verdict,
        if report.partial { " PARTIAL" } else { "" },
        report.scenario,
        report.total_trials,
        report.fault_count,
    );
    if !report.description.is_empty() {
        let _ = writeln!(text, "  {}", report.description);
    }

    let width = report
        .histogram
        .iter()
        .map(|row| row.outcome.to_string().len())
        .max()
        .unwrap_or(0)
        .max("Observed state".len());
    let _ = writeln!(
        text,
        "    {:<width$}  {:>12}  {:<22}  Interpretation",
        "Observed state", "Occurrences", "Expectation"
    );
    for row in &report.histogram {
        let expect = row.expect.map_or("UNKNOWN", |expect| expect.as_str());
        let _ = writeln!(
            text,
            "    {:<width$}  {:>12}  {:<22}  {}",
            row.outcome.to_string(),
            row.count,
            expect,
            row.description
        );
    }
    for fault in &report.faults {
        let _ = writeln!(
            text,
            "  fault: fork={} iteration={} {}: {}",
            fault.fork, fault.iteration, fault.kind, fault.message
        );
    }
    for warning in &report.warnings {
        let _ = writeln!(text, "  warning: {warning}");
    }
    text.push('\n');
}
