use crate::protocol::{CheckRecord, Report, Step};
use std::time::Duration;

/// Compact duration: milliseconds below one second, then seconds, then minutes
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// One line per check, e.g. `  #5 id user1: expected not found, observed user1 uid=1 gid=1`
pub fn format_check(check: &CheckRecord) -> String {
    if check.passed {
        format!("  #{} {}: {}", check.step, check.query, check.observed)
    } else {
        format!(
            "  #{} {}: expected {}, observed {}",
            check.step, check.query, check.expected, check.observed
        )
    }
}

/// Summary line of a finished scenario without the status column
pub fn format_report_line(report: &Report) -> String {
    format!(
        "{} ({} checks, {})",
        report.scenario,
        report.checks.len(),
        format_duration(report.duration)
    )
}

/// Numbered step list as shown by `show`
pub fn format_step_list(steps: &[Step]) -> Vec<String> {
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| format!("{:>3}. {}", index + 1, step))
        .collect()
}
