use crate::config::{HarnessConfig, TargetKind};
use crate::display::{ProgressBar, Terminal, format_check, format_report_line, format_step_list};
use crate::protocol::catalog;
use crate::protocol::{Outcome, Report, Runner, Scenario, Summary};
use crate::system::commands::LocalCommandExecutor;
use crate::system::filesystem::{FilesystemReader, RealFilesystemReader};
use crate::system::simulated::Fault;
use crate::system::{CommandExecutor, SimulatedHost, process};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

/// What `run` should do, as collected from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<String>,
    /// Built-in scenarios by name; empty runs the whole catalog
    pub scenarios: Vec<String>,
    /// Scenario files to run after the named ones
    pub files: Vec<String>,
    /// Answer every command from a simulated host
    pub demo: bool,
    /// Write all reports as TOML to this path
    pub report: Option<String>,
    /// Print passing checks too
    pub show_checks: bool,
    /// Misbehaviour of the simulated host, to see how failures are reported
    pub faults: Vec<Fault>,
}

#[derive(Serialize)]
struct ReportFile<'a> {
    summary: Summary,
    reports: &'a [Report],
}

fn load_config(path: Option<&str>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(&RealFilesystemReader, path)
            .with_context(|| format!("loading configuration {}", path)),
        None => Ok(HarnessConfig::default()),
    }
}

fn select_scenarios(options: &RunOptions) -> Result<Vec<Scenario>> {
    let mut scenarios = Vec::new();
    for name in &options.scenarios {
        match catalog::find(name) {
            Some(scenario) => scenarios.push(scenario),
            None => bail!("unknown scenario '{}' (see `memcache-verify list`)", name),
        }
    }
    for path in &options.files {
        if !RealFilesystemReader.exists(path) {
            bail!("scenario file {} does not exist", path);
        }
        let scenario = Scenario::load(&RealFilesystemReader, path)
            .with_context(|| format!("loading scenario file {}", path))?;
        scenarios.push(scenario);
    }
    if scenarios.is_empty() {
        scenarios = catalog::all();
    }
    Ok(scenarios)
}

/// Run the selected scenarios; `Ok(false)` when any of them did not pass
pub async fn run(options: RunOptions) -> Result<bool> {
    let mut config = load_config(options.config.as_deref())?;
    if options.demo {
        config.target.kind = TargetKind::Simulated;
    }
    if !options.faults.is_empty() && config.target.kind != TargetKind::Simulated {
        bail!("faults can only be injected into a simulated host (use --demo)");
    }
    let scenarios = select_scenarios(&options)?;
    let terminal = Terminal::new();

    info!(scenarios = scenarios.len(), target = ?config.target.kind, "starting verification");
    let reports = match config.target.kind {
        TargetKind::Local => {
            if !process::running_as_root() {
                warn!("not running as root; daemon control and cache removal will likely fail");
            }
            let executor = LocalCommandExecutor;
            run_all(&executor, &config, &scenarios, &terminal, options.show_checks).await
        }
        TargetKind::Ssh => {
            let executor = config.target.ssh_executor();
            run_all(&executor, &config, &scenarios, &terminal, options.show_checks).await
        }
        TargetKind::Simulated => {
            let paths = &config.paths;
            let host = SimulatedHost::with_paths(&paths.sssd_conf, &paths.memcache_dir);
            let host = options
                .faults
                .iter()
                .fold(host, |host, fault| host.with_fault(*fault));
            run_all(&host, &config, &scenarios, &terminal, options.show_checks).await
        }
    };

    let summary = Summary::from_reports(&reports);
    print_summary(&terminal, &summary);

    if let Some(path) = &options.report {
        let text = toml::to_string_pretty(&ReportFile {
            summary,
            reports: &reports,
        })
        .context("rendering report")?;
        std::fs::write(path, text).with_context(|| format!("writing report {}", path))?;
        info!(path = %path, "report written");
    }

    Ok(summary.all_passed())
}

async fn run_all<E: CommandExecutor>(
    executor: &E,
    config: &HarnessConfig,
    scenarios: &[Scenario],
    terminal: &Terminal,
    show_checks: bool,
) -> Vec<Report> {
    let runner = Runner::new(executor, config);
    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let report = runner.run(scenario).await;
        print_report(terminal, &report, show_checks);
        reports.push(report);
    }
    reports
}

fn print_report(terminal: &Terminal, report: &Report, show_checks: bool) {
    let status = terminal
        .outcome_style(&report.outcome)
        .apply_to(format!("[{:<5}]", report.outcome.to_string()));
    println!("{} {}", status, format_report_line(report));

    let dim = terminal.dim();
    if show_checks {
        for check in &report.checks {
            println!("{}", dim.apply_to(format_check(check)));
        }
    } else {
        for check in report.failed_checks() {
            println!("{}", format_check(check));
        }
    }
    if let Outcome::Errored(reason) = &report.outcome {
        println!("  {}", reason);
    }
    if let Some(warning) = &report.teardown_warning {
        println!("  {}", dim.apply_to(format!("teardown: {}", warning)));
    }
}

fn print_summary(terminal: &Terminal, summary: &Summary) {
    println!();
    println!("{:=^60}", " Summary ");
    println!(
        "{} passed, {} failed, {} errored, {} checks",
        summary.passed, summary.failed, summary.errored, summary.checks
    );
    let bar = ProgressBar::with_terminal(30, *terminal);
    println!("{}", bar.render(summary.pass_rate(), Some("Passed")));
}

/// Print the built-in catalog
pub fn list() {
    let scenarios = catalog::all();
    let width = scenarios.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for scenario in &scenarios {
        println!("{:<width$}  {}", scenario.name, scenario.description, width = width);
    }
}

/// Print one built-in scenario, as steps or as a TOML file to start from
pub fn show(name: &str, as_toml: bool) -> Result<()> {
    let Some(scenario) = catalog::find(name) else {
        bail!("unknown scenario '{}' (see `memcache-verify list`)", name);
    };
    if as_toml {
        print!("{}", scenario.to_toml()?);
        return Ok(());
    }

    println!("{}: {}", scenario.name, scenario.description);
    let cache = scenario.cache;
    println!(
        "cache: passwd={} group={} initgroups={} timeout={}s",
        cache.passwd_size, cache.group_size, cache.initgroups_size, cache.timeout
    );
    let directory = scenario.directory.materialize()?;
    for user in &directory.users {
        println!("user:  {} uid={} gid={}", user.name, user.uid, user.gid);
    }
    for group in &directory.groups {
        println!("group: {} gid={} members=[{}]", group.name, group.gid, group.members.join(","));
    }
    for line in format_step_list(&scenario.steps) {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_select_defaults_to_catalog() {
        let scenarios = select_scenarios(&RunOptions::default()).unwrap();
        assert_eq!(scenarios.len(), catalog::all().len());
    }

    #[test]
    fn test_select_by_name_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "name = \"from_file\"\n\n[[steps]]\naction = \"start\"\n").unwrap();
        let options = RunOptions {
            scenarios: vec!["memcache_getpwnam".to_string()],
            files: vec![file.path().to_str().unwrap().to_string()],
            ..RunOptions::default()
        };
        let names: Vec<String> = select_scenarios(&options)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["memcache_getpwnam", "from_file"]);
    }

    #[test]
    fn test_unknown_scenario() {
        let options = RunOptions {
            scenarios: vec!["nope".to_string()],
            ..RunOptions::default()
        };
        assert!(select_scenarios(&options).is_err());
        assert!(show("nope", false).is_err());
    }

    #[tokio::test]
    async fn test_demo_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.toml");
        let options = RunOptions {
            scenarios: vec!["memcache_invalidate_user_before_stop".to_string()],
            demo: true,
            report: Some(path.to_str().unwrap().to_string()),
            ..RunOptions::default()
        };
        assert!(run(options).await.unwrap());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("memcache_invalidate_user_before_stop"));
        assert!(text.contains("passed = 1"));
    }

    #[tokio::test]
    async fn test_faults_need_simulated_host() {
        let options = RunOptions {
            scenarios: vec!["memcache_getpwnam".to_string()],
            faults: vec![Fault::ForgetCacheOnStop],
            ..RunOptions::default()
        };
        assert!(run(options).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_fault_fails_run() {
        let options = RunOptions {
            scenarios: vec!["memcache_getpwnam".to_string()],
            demo: true,
            faults: vec![Fault::ForgetCacheOnStop],
            ..RunOptions::default()
        };
        assert!(!run(options).await.unwrap());
    }
}
