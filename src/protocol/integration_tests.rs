//! Every built-in scenario against the simulated host, healthy and faulty

use super::catalog;
use super::report::Outcome;
use super::runner::Runner;
use super::scenario::{CacheSettings, Scenario, Step};
use crate::config::{HarnessConfig, TargetKind};
use crate::error::HarnessResult;
use crate::nss::{Directory, UserSpec};
use crate::system::simulated::Fault;
use crate::system::{CommandExecutor, CommandOutput, SimulatedHost};
use async_trait::async_trait;
use std::time::Duration;

/// Simulated host whose daemon takes a while to stop
struct SlowStop {
    host: SimulatedHost,
    delay: Duration,
}

#[async_trait]
impl CommandExecutor for SlowStop {
    async fn execute(&self, command: &str, args: &[&str]) -> HarnessResult<CommandOutput> {
        if command == "systemctl" && args.first() == Some(&"stop") {
            tokio::time::sleep(self.delay).await;
        }
        self.host.execute(command, args).await
    }

    async fn execute_with_input(
        &self,
        command: &str,
        args: &[&str],
        input: &str,
    ) -> HarnessResult<CommandOutput> {
        self.host.execute_with_input(command, args, input).await
    }

    fn describe(&self) -> String {
        self.host.describe()
    }
}

fn config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.target.kind = TargetKind::Simulated;
    config
}

async fn outcome(host: &SimulatedHost, name: &str) -> Outcome {
    let scenario = catalog::find(name).unwrap();
    let config = config();
    Runner::new(host, &config).run(&scenario).await.outcome
}

#[tokio::test]
async fn test_catalog_passes_on_simulated_host() {
    let config = config();
    let host = SimulatedHost::new();
    for scenario in catalog::all() {
        let report = Runner::new(&host, &config).run(&scenario).await;
        assert_eq!(
            report.outcome,
            Outcome::Passed,
            "{} failed: {:?}",
            scenario.name,
            report.failed_checks().collect::<Vec<_>>()
        );
        assert!(!report.checks.is_empty(), "{} checked nothing", scenario.name);
        assert!(report.teardown_warning.is_none());
    }
}

#[tokio::test]
async fn test_ignored_invalidation_is_caught() {
    let host = SimulatedHost::new().with_fault(Fault::IgnoreInvalidation);
    for name in [
        "memcache_invalidate_user_before_stop",
        "memcache_invalidate_users_after_stop",
        "memcache_invalidate_group_before_stop",
        "memcache_invalidate_groups_after_stop",
        "memcache_invalidate_everything_before_stop",
    ] {
        assert!(matches!(outcome(&host, name).await, Outcome::Failed(_)), "{} passed", name);
    }
    // Scenarios without invalidation are unaffected
    assert_eq!(outcome(&host, "memcache_getpwnam").await, Outcome::Passed);
}

#[tokio::test]
async fn test_cache_lost_on_stop_is_caught() {
    let host = SimulatedHost::new().with_fault(Fault::ForgetCacheOnStop);
    for name in ["memcache_getpwnam", "memcache_getgrnam", "memcache_restart_recreates_cache"] {
        assert!(matches!(outcome(&host, name).await, Outcome::Failed(_)), "{} passed", name);
    }
    assert_eq!(outcome(&host, "memcache_disabled_cache").await, Outcome::Passed);
}

#[tokio::test]
async fn test_ignored_cache_sizes_are_caught() {
    let host = SimulatedHost::new().with_fault(Fault::IgnoreDisabledCategories);
    for name in [
        "memcache_disabled_passwd_getpwnam",
        "memcache_disabled_group",
        "memcache_disabled_cache",
    ] {
        assert!(matches!(outcome(&host, name).await, Outcome::Failed(_)), "{} passed", name);
    }
}

#[tokio::test]
async fn test_failure_names_the_step() {
    let host = SimulatedHost::new().with_fault(Fault::IgnoreInvalidation);
    let scenario = catalog::find("memcache_invalidate_user_before_stop").unwrap();
    let config = config();
    let report = Runner::new(&host, &config).run(&scenario).await;

    let failed: Vec<_> = report.failed_checks().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].query, "id user1");
    assert_eq!(failed[0].expected, "not found");
    assert!(failed[0].observed.starts_with("user1 uid=123456"));
    assert!(matches!(&report.outcome, Outcome::Failed(reason) if reason.contains("Step 5")));
}

#[tokio::test]
async fn test_slow_stop_near_expiry_is_not_asserted() {
    let host = SlowStop {
        host: SimulatedHost::new(),
        delay: Duration::from_millis(1200),
    };
    let lookup = Step::LookupUser {
        key: "user1".to_string(),
    };
    let scenario = Scenario::new("slow_stop", "")
        .with_cache(CacheSettings {
            timeout: 1,
            ..CacheSettings::default()
        })
        .with_directory(Directory::new().user(UserSpec::new("user1").with_uid(10001)))
        .steps([
            Step::Start,
            lookup.clone(),
            Step::Stop,
            lookup.clone(),
            Step::Wait { seconds: 2 },
            lookup,
        ]);
    let config = config();
    let report = Runner::new(&host, &config).run(&scenario).await;

    assert_eq!(report.outcome, Outcome::Passed, "{:?}", report.checks);
    assert_eq!(report.checks.len(), 3);
    // Expired on the host while the daemon was stopping
    assert!(report.checks[1].expected.ends_with("or not found"));
    assert_eq!(report.checks[1].observed, "not found");
    // Well past the timeout the miss is asserted again
    assert_eq!(report.checks[2].expected, "not found");

    let long_lived = catalog::find("memcache_getpwnam").unwrap();
    let report = Runner::new(&host, &config).run(&long_lived).await;
    assert_eq!(report.outcome, Outcome::Passed);
}
