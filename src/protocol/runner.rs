//! Drives one scenario against a host and compares every observation with the model

use super::model::{CacheModel, GroupRecord, Query, UserRecord};
use super::report::{CheckRecord, Outcome, Report};
use super::scenario::{Scenario, Step};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::nss::{Auth, Daemon, LdapProvider, NameRules, SssdConfig, Sssctl, Tools};
use crate::system::CommandExecutor;
use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const NOT_FOUND: &str = "not found";

pub struct Runner<'a, E: CommandExecutor> {
    executor: &'a E,
    config: &'a HarnessConfig,
}

impl<'a, E: CommandExecutor> Runner<'a, E> {
    pub fn new(executor: &'a E, config: &'a HarnessConfig) -> Self {
        Self { executor, config }
    }

    /// Run `scenario` to completion; never fails, the outcome is in the report
    pub async fn run(&self, scenario: &Scenario) -> Report {
        let started = Instant::now();
        let mut report = Report::new(&scenario.name, &self.executor.describe());
        info!(scenario = %scenario.name, target = %report.target, "running scenario");

        let result = self.execute(scenario, &mut report).await;
        report.outcome = match result {
            Ok(()) => Outcome::Passed,
            Err(e) if e.is_assertion() => Outcome::Failed(e.to_string()),
            Err(e) => Outcome::Errored(e.to_string()),
        };

        if let Err(e) = self.teardown().await {
            warn!(scenario = %scenario.name, error = %e, "teardown failed");
            report.teardown_warning = Some(e.to_string());
        }
        report.duration = started.elapsed();

        info!(
            scenario = %scenario.name,
            outcome = %report.outcome,
            checks = report.checks.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "scenario finished"
        );
        report
    }

    fn daemon(&self) -> Daemon<'a, E> {
        Daemon::new(self.executor, &self.config.paths.sssd_conf, self.config.timeouts.daemon())
    }

    fn provider(&self) -> LdapProvider<'a, E> {
        LdapProvider::new(
            self.executor,
            self.config.ldap_connection(),
            self.config.timeouts.daemon(),
        )
    }

    /// Bring the host into a known state: daemon stopped, no cache files,
    /// directory holding exactly the scenario's entities
    async fn execute(&self, scenario: &Scenario, report: &mut Report) -> HarnessResult<()> {
        scenario.validate()?;
        let directory = scenario.directory.materialize()?;
        let command_timeout = self.config.timeouts.command();
        let sssctl = Sssctl::new(self.executor, &self.config.paths.memcache_dir, command_timeout);
        let daemon = self.daemon();
        let provider = self.provider();

        daemon.stop().await?;
        sssctl.remove_cache_files().await?;
        provider.clear().await?;
        provider.populate(&directory).await?;

        let sssd_config =
            scenario.sssd_config(&self.config.domain.name, &self.config.ldap_connection());
        daemon.apply_config(&sssd_config).await?;

        let rules = NameRules::new(
            &self.config.domain.name,
            scenario.domain.fully_qualified_names,
            scenario.domain.case_sensitive,
        );
        let mut session = Session {
            tools: Tools::new(self.executor, command_timeout),
            auth: Auth::new(self.executor, command_timeout),
            sssctl,
            daemon,
            model: CacheModel::new(directory, scenario.cache, rules)
                .with_grace(self.config.timeouts.expiry_grace()),
            epoch: Instant::now(),
            sssd_config,
            report,
        };

        for (index, step) in scenario.steps.iter().enumerate() {
            let number = index + 1;
            debug!(step = number, %step, "executing step");
            session.step(number, step).await?;
        }
        Ok(())
    }

    /// Leave the host as found: daemon stopped and directory emptied
    async fn teardown(&self) -> HarnessResult<()> {
        let stopped = self.daemon().stop().await;
        let cleared = self.provider().clear().await;
        stopped.and(cleared)
    }
}

/// Per-scenario state: the tools bound to the host plus the model they are checked against
struct Session<'a, 'r, E: CommandExecutor> {
    tools: Tools<'a, E>,
    auth: Auth<'a, E>,
    sssctl: Sssctl<'a, E>,
    daemon: Daemon<'a, E>,
    model: CacheModel,
    /// Zero of the model's clock
    epoch: Instant,
    sssd_config: SssdConfig,
    report: &'r mut Report,
}

impl<E: CommandExecutor> Session<'_, '_, E> {
    async fn step(&mut self, number: usize, step: &Step) -> HarnessResult<()> {
        self.tick();
        match step {
            Step::Start => {
                self.daemon.start().await?;
                if !self.daemon.is_active().await? {
                    return Err(HarnessError::daemon_error(
                        "start",
                        "service is not active after start",
                    ));
                }
                self.model.start();
            }
            Step::Stop => {
                self.daemon.stop().await?;
                self.model.stop();
            }
            Step::Restart => {
                self.daemon.restart().await?;
                self.model.stop();
                self.model.start();
            }
            Step::Invalidate { scope } => {
                self.sssctl.cache_expire(scope).await?;
                self.model.invalidate(scope);
            }
            Step::RemoveCacheFiles => {
                self.sssctl.remove_cache_files().await?;
                self.model.remove_cache_files();
            }
            Step::Wait { seconds } => {
                tokio::time::sleep(Duration::from_secs(*seconds)).await;
            }
            Step::Verify => {
                for query in self.model.verification_queries() {
                    match query {
                        Query::Id(key) => self.check_id(number, &key).await?,
                        Query::Passwd(key) => self.check_passwd(number, &key).await?,
                        Query::Group(key) => self.check_group(number, &key).await?,
                    }
                }
            }
            Step::LookupUser { key } => self.check_id(number, key).await?,
            Step::LookupGroup { key } => self.check_group(number, key).await?,
            Step::GetentPasswd { key } => self.check_passwd(number, key).await?,
            Step::CheckCacheFiles => {
                let expected = self.model.cache_files();
                let observed = self.sssctl.list_cache_files().await?;
                self.check(
                    number,
                    "ls cache directory",
                    format!("[{}]", expected.join(", ")),
                    format!("[{}]", observed.join(", ")),
                    expected == observed,
                )?;
            }
            Step::SshLogin { user, password } => {
                let expected = self.model.ssh_login(user, password);
                let observed = self.auth.ssh_password(user, password).await?;
                let query = format!("ssh {}@localhost", user);
                self.check_login(number, &query, expected, observed)?;
            }
            Step::Kinit { user, password } => {
                let expected = self.model.kinit(user, password);
                let observed = self.auth.kinit(user, password).await?;
                self.check_login(number, &format!("kinit {}", user), expected, observed)?;
            }
            Step::GenconfSection { section } => {
                let status = self.daemon.genconf_section(section).await?;
                self.check(
                    number,
                    &step.to_string(),
                    "exit 0".to_string(),
                    format!("exit {}", status),
                    status == 0,
                )?;
            }
            Step::CheckConfig { section, key, value } => {
                let dumped = SssdConfig::parse(&self.daemon.config_dumps().await?)?;
                let observed = dumped.get(section, key);
                self.check(
                    number,
                    &step.to_string(),
                    describe(value.as_deref()),
                    describe(observed),
                    observed == value.as_deref(),
                )?;
            }
            Step::SetOption { section, key, value } => {
                match value {
                    Some(value) => {
                        self.sssd_config.set(section, key, value);
                    }
                    None => {
                        self.sssd_config.remove(section, key);
                    }
                }
                self.daemon.apply_config(&self.sssd_config).await?;
            }
            Step::RemoveSection { section } => {
                if !self.sssd_config.remove_section(section) {
                    debug!(section = %section, "section was not configured");
                }
                self.daemon.apply_config(&self.sssd_config).await?;
            }
        }
        Ok(())
    }

    /// Bring the model's clock up to the time spent so far
    fn tick(&mut self) {
        self.model.advance_to(self.epoch.elapsed());
    }

    async fn check_id(&mut self, number: usize, key: &str) -> HarnessResult<()> {
        self.tick();
        let expected = self.model.id(key);
        let entry = self.tools.id(key).await?;
        let passed = expected.accepts(entry.as_ref(), |expected, entry| {
            expected.matches(&UserRecord::from(entry))
                && expected.groups.as_deref().is_none_or(|gids| entry.memberof(gids))
        });
        let observed = describe(entry.as_ref().map(UserRecord::from));
        self.check(number, &format!("id {}", key), expected.to_string(), observed, passed)
    }

    async fn check_passwd(&mut self, number: usize, key: &str) -> HarnessResult<()> {
        self.tick();
        let expected = self.model.getent_passwd(key);
        let observed = self.tools.getent_passwd(key).await?.as_ref().map(UserRecord::from);
        let passed = expected.accepts(observed.as_ref(), UserRecord::matches);
        let query = format!("getent passwd {}", key);
        self.check(number, &query, expected.to_string(), describe(observed), passed)
    }

    async fn check_group(&mut self, number: usize, key: &str) -> HarnessResult<()> {
        self.tick();
        let expected = self.model.getent_group(key);
        let observed = self.tools.getent_group(key).await?.as_ref().map(GroupRecord::from);
        let passed = expected.accepts(observed.as_ref(), GroupRecord::matches);
        let query = format!("getent group {}", key);
        self.check(number, &query, expected.to_string(), describe(observed), passed)
    }

    fn check_login(
        &mut self,
        number: usize,
        query: &str,
        expected: bool,
        observed: bool,
    ) -> HarnessResult<()> {
        let verdict = |accepted: bool| if accepted { "accepted" } else { "rejected" }.to_string();
        self.check(number, query, verdict(expected), verdict(observed), expected == observed)
    }

    /// Record a comparison; a mismatch ends the scenario
    fn check(
        &mut self,
        step: usize,
        query: &str,
        expected: String,
        observed: String,
        passed: bool,
    ) -> HarnessResult<()> {
        let record = CheckRecord {
            step,
            query: query.to_string(),
            expected,
            observed,
            passed,
        };
        if passed {
            debug!(step, query, result = %record.observed, "check passed");
            self.report.checks.push(record);
            Ok(())
        } else {
            warn!(
                step,
                query,
                expected = %record.expected,
                observed = %record.observed,
                "check failed"
            );
            let error =
                HarnessError::assertion_failed(step, query, &record.expected, &record.observed);
            self.report.checks.push(record);
            Err(error)
        }
    }
}

fn describe<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| NOT_FOUND.to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetKind;
    use crate::nss::{Directory, GroupSpec, InvalidationScope, UserSpec};
    use crate::protocol::scenario::CacheSettings;
    use crate::system::SimulatedHost;
    use crate::system::simulated::Fault;
    use pretty_assertions::assert_eq;

    fn config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.target.kind = TargetKind::Simulated;
        config
    }

    fn scenario() -> Scenario {
        Scenario::new("runner", "")
            .with_directory(
                Directory::new()
                    .user(UserSpec::new("user1").with_uid(10001))
                    .group(GroupSpec::new("group1").with_gid(20001).with_members(&["user1"])),
            )
            .steps([
                Step::Start,
                Step::LookupUser { key: "user1".to_string() },
                Step::Invalidate {
                    scope: InvalidationScope::User("user1".to_string()),
                },
                Step::Stop,
                Step::LookupUser { key: "user1".to_string() },
                Step::CheckCacheFiles,
            ])
    }

    #[tokio::test]
    async fn test_run_records_checks() {
        let host = SimulatedHost::new();
        let config = config();
        let report = Runner::new(&host, &config).run(&scenario()).await;

        assert_eq!(report.outcome, Outcome::Passed);
        assert_eq!(report.target, "simulated host");
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.checks[1].query, "id user1");
        assert_eq!(report.checks[1].expected, NOT_FOUND);
        assert!(report.teardown_warning.is_none());
    }

    #[tokio::test]
    async fn test_mismatch_fails_fast() {
        let host = SimulatedHost::new().with_fault(Fault::IgnoreInvalidation);
        let config = config();
        let report = Runner::new(&host, &config).run(&scenario()).await;

        assert!(matches!(report.outcome, Outcome::Failed(_)));
        // The cache files check after the failure never ran
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.failed_checks().map(|c| c.step).collect::<Vec<_>>(), vec![5]);
    }

    #[tokio::test]
    async fn test_invalid_directory_errors() {
        let host = SimulatedHost::new();
        let config = config();
        let scenario = Scenario::new("broken", "")
            .with_directory(
                Directory::new().group(GroupSpec::new("group1").with_members(&["ghost"])),
            )
            .step(Step::Start);
        let report = Runner::new(&host, &config).run(&scenario).await;
        assert!(matches!(report.outcome, Outcome::Errored(_)));
    }

    #[tokio::test]
    async fn test_cache_removal_while_running_is_rejected() {
        let host = SimulatedHost::new();
        let config = config();
        let scenario = Scenario::new("remove_running", "")
            .with_directory(scenario().directory)
            .steps([
                Step::Start,
                Step::RemoveCacheFiles,
                Step::LookupUser {
                    key: "user1".to_string(),
                },
            ]);
        let report = Runner::new(&host, &config).run(&scenario).await;

        assert!(matches!(
            report.outcome,
            Outcome::Errored(ref reason) if reason.contains("step 2")
        ));
        assert!(report.checks.is_empty());
    }

    #[tokio::test]
    async fn test_config_steps() {
        let host = SimulatedHost::new();
        let config = config();
        let scenario = Scenario::new("config", "").with_cache(CacheSettings::default()).steps([
            Step::SetOption {
                section: "pam".to_string(),
                key: "debug_level".to_string(),
                value: Some("9".to_string()),
            },
            Step::CheckConfig {
                section: "pam".to_string(),
                key: "debug_level".to_string(),
                value: Some("9".to_string()),
            },
            Step::SetOption {
                section: "pam".to_string(),
                key: "debug_level".to_string(),
                value: None,
            },
            Step::CheckConfig {
                section: "pam".to_string(),
                key: "debug_level".to_string(),
                value: None,
            },
            Step::GenconfSection {
                section: "xf31deyz".to_string(),
            },
        ]);
        let report = Runner::new(&host, &config).run(&scenario).await;
        assert_eq!(report.outcome, Outcome::Passed);
        assert_eq!(report.checks.len(), 3);
    }
}
