//! Scenario definitions: directory, cache vector, domain options and steps

use crate::error::{HarnessError, HarnessResult};
use crate::nss::provider::Directory;
use crate::nss::{CacheCategory, InvalidationScope, LdapConnection, SssdConfig};
use crate::system::FilesystemReader;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest `wait` a scenario may ask for
const MAX_WAIT_SECS: u64 = 600;

/// Options the expectation model derives from the scenario itself
const MODELLED_OPTIONS: [&str; 7] = [
    "memcache_size_passwd",
    "memcache_size_group",
    "memcache_size_initgroups",
    "memcache_timeout",
    "use_fully_qualified_names",
    "case_sensitive",
    "domains",
];

/// Sizes of the three lookaside cache categories and their lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub passwd_size: u32,
    pub group_size: u32,
    pub initgroups_size: u32,
    /// `memcache_timeout` in seconds; 0 disables the lookaside cache
    pub timeout: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            passwd_size: 8,
            group_size: 6,
            initgroups_size: 10,
            timeout: 300,
        }
    }
}

impl CacheSettings {
    pub fn size(&self, category: CacheCategory) -> u32 {
        match category {
            CacheCategory::Passwd => self.passwd_size,
            CacheCategory::Group => self.group_size,
            CacheCategory::Initgroups => self.initgroups_size,
        }
    }

    /// Whether entries of `category` are kept at all
    pub fn enabled(&self, category: CacheCategory) -> bool {
        self.timeout > 0 && self.size(category) > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainOptions {
    pub fully_qualified_names: bool,
    pub case_sensitive: bool,
    pub cache_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_level: Option<u8>,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self {
            fully_qualified_names: false,
            case_sensitive: true,
            cache_credentials: false,
            debug_level: None,
        }
    }
}

/// One action of a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Start,
    Stop,
    Restart,
    Invalidate { scope: InvalidationScope },
    RemoveCacheFiles,
    Wait { seconds: u64 },
    /// Resolve every user and group by name and by id
    Verify,
    LookupUser { key: String },
    LookupGroup { key: String },
    GetentPasswd { key: String },
    CheckCacheFiles,
    SshLogin { user: String, password: String },
    Kinit { user: String, password: String },
    GenconfSection { section: String },
    /// `value = None` asserts the key is absent
    CheckConfig {
        section: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// Rewrite the daemon configuration; `value = None` removes the key
    SetOption {
        section: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    RemoveSection { section: String },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Start => write!(f, "start daemon"),
            Step::Stop => write!(f, "stop daemon"),
            Step::Restart => write!(f, "restart daemon"),
            Step::Invalidate { scope } => write!(f, "{}", scope),
            Step::RemoveCacheFiles => write!(f, "remove cache files"),
            Step::Wait { seconds } => write!(f, "wait {}s", seconds),
            Step::Verify => write!(f, "verify all entities"),
            Step::LookupUser { key } => write!(f, "id {}", key),
            Step::LookupGroup { key } => write!(f, "getent group {}", key),
            Step::GetentPasswd { key } => write!(f, "getent passwd {}", key),
            Step::CheckCacheFiles => write!(f, "check cache files"),
            Step::SshLogin { user, .. } => write!(f, "ssh login {}", user),
            Step::Kinit { user, .. } => write!(f, "kinit {}", user),
            Step::GenconfSection { section } => write!(f, "sssd --genconf-section={}", section),
            Step::CheckConfig { section, key, .. } => write!(f, "check [{}] {}", section, key),
            Step::SetOption {
                section,
                key,
                value: Some(value),
            } => write!(f, "set [{}] {} = {}", section, key, value),
            Step::SetOption { section, key, .. } => write!(f, "unset [{}] {}", section, key),
            Step::RemoveSection { section } => write!(f, "remove section [{}]", section),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub domain: DomainOptions,
    #[serde(default)]
    pub directory: Directory,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            cache: CacheSettings::default(),
            domain: DomainOptions::default(),
            directory: Directory::default(),
            steps: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_domain(mut self, domain: DomainOptions) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_directory(mut self, directory: Directory) -> Self {
        self.directory = directory;
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn from_toml(text: &str, location: &str) -> HarnessResult<Self> {
        let scenario: Scenario =
            toml::from_str(text).map_err(|e| HarnessError::config_error(location, e.message()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load<F: FilesystemReader>(reader: &F, path: &str) -> HarnessResult<Self> {
        Self::from_toml(&reader.read_to_string(path)?, path)
    }

    pub fn to_toml(&self) -> HarnessResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HarnessError::config_error(&self.name, &e.to_string()))
    }

    /// Reject scenarios that cannot run
    pub fn validate(&self) -> HarnessResult<()> {
        let location = format!("scenario '{}'", self.name);
        if self.name.is_empty() {
            return Err(HarnessError::config_error("scenario", "missing name"));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::config_error(&location, "no steps"));
        }
        if let Some(Step::Wait { seconds }) = self
            .steps
            .iter()
            .find(|s| matches!(s, Step::Wait { seconds } if *seconds > MAX_WAIT_SECS))
        {
            return Err(HarnessError::config_error(
                &location,
                &format!("wait of {}s exceeds {}s", seconds, MAX_WAIT_SECS),
            ));
        }
        let mut running = false;
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Start | Step::Restart => running = true,
                Step::Stop => running = false,
                Step::RemoveCacheFiles if running => {
                    let reason =
                        format!("step {} removes the cache files while the daemon runs", index + 1);
                    return Err(HarnessError::config_error(&location, &reason));
                }
                Step::SetOption { key, .. } if MODELLED_OPTIONS.contains(&key.as_str()) => {
                    return Err(HarnessError::config_error(
                        &location,
                        &format!("'{}' is set through the scenario's cache and domain tables", key),
                    ));
                }
                Step::RemoveSection { section }
                    if ["sssd", "nss"].contains(&section.as_str())
                        || section.starts_with("domain/") =>
                {
                    return Err(HarnessError::config_error(
                        &location,
                        &format!("section [{}] cannot be removed", section),
                    ));
                }
                _ => {}
            }
        }
        self.directory
            .materialize()
            .map_err(|e| HarnessError::config_error(&location, &e.to_string()))?;
        Ok(())
    }

    /// Daemon configuration for this scenario against `domain`
    pub fn sssd_config(&self, domain: &str, ldap: &LdapConnection) -> SssdConfig {
        let section = format!("domain/{}", domain);
        let mut config = SssdConfig::new();
        config
            .set("sssd", "services", "nss, pam")
            .set("sssd", "domains", domain)
            .set("nss", CacheCategory::Passwd.size_option(), self.cache.passwd_size)
            .set("nss", CacheCategory::Group.size_option(), self.cache.group_size)
            .set("nss", CacheCategory::Initgroups.size_option(), self.cache.initgroups_size)
            .set("nss", "memcache_timeout", self.cache.timeout)
            .set("pam", "offline_credentials_expiration", 0)
            .set(&section, "id_provider", "ldap")
            .set(&section, "auth_provider", "ldap")
            .set(&section, "ldap_uri", &ldap.uri)
            .set(&section, "ldap_search_base", &ldap.base_dn)
            .set(&section, "ldap_schema", "rfc2307")
            .set(&section, "ldap_tls_reqcert", "never")
            .set(&section, "use_fully_qualified_names", self.domain.fully_qualified_names)
            .set(&section, "case_sensitive", self.domain.case_sensitive)
            .set(&section, "cache_credentials", self.domain.cache_credentials);

        if let Some(level) = self.domain.debug_level {
            for name in ["sssd", "nss", "pam", section.as_str()] {
                config.set(name, "debug_level", level);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nss::{GroupSpec, UserSpec};
    use pretty_assertions::assert_eq;

    fn ldap() -> LdapConnection {
        LdapConnection {
            uri: "ldap://master.ldap.test".to_string(),
            base_dn: "dc=ldap,dc=test".to_string(),
            bind_dn: "cn=Directory Manager".to_string(),
            bind_password: "Secret123".to_string(),
        }
    }

    #[test]
    fn test_parse_scenario_toml() {
        let text = r#"
name = "invalidate_user"
description = "user invalidation before stop"

[cache]
passwd_size = 0

[[directory.users]]
name = "user1"
uid = 10001

[[directory.groups]]
name = "group1"
members = ["user1"]

[[steps]]
action = "start"

[[steps]]
action = "invalidate"
scope = { user = "user1" }

[[steps]]
action = "invalidate"
scope = "all_groups"

[[steps]]
action = "lookup_user"
key = "user1"

[[steps]]
action = "check_config"
section = "nss"
key = "debug_level"
"#;
        let scenario = Scenario::from_toml(text, "inline").unwrap();
        assert_eq!(scenario.cache.passwd_size, 0);
        assert_eq!(scenario.cache.group_size, 6);
        assert!(scenario.domain.case_sensitive);
        assert_eq!(
            scenario.steps,
            vec![
                Step::Start,
                Step::Invalidate {
                    scope: InvalidationScope::User("user1".to_string())
                },
                Step::Invalidate {
                    scope: InvalidationScope::AllGroups
                },
                Step::LookupUser {
                    key: "user1".to_string()
                },
                Step::CheckConfig {
                    section: "nss".to_string(),
                    key: "debug_level".to_string(),
                    value: None
                },
            ]
        );
    }

    #[test]
    fn test_toml_output_is_read_back() {
        let scenario = Scenario::new("sample", "")
            .with_directory(
                Directory::new()
                    .user(UserSpec::new("user1"))
                    .group(GroupSpec::new("group1").with_members(&["user1"])),
            )
            .steps([
                Step::Start,
                Step::Wait { seconds: 2 },
                Step::Invalidate {
                    scope: InvalidationScope::Everything,
                },
                Step::Verify,
            ]);
        let text = scenario.to_toml().unwrap();
        assert_eq!(Scenario::from_toml(&text, "inline").unwrap(), scenario);
    }

    #[test]
    fn test_validation() {
        assert!(Scenario::new("empty", "").validate().is_err());
        assert!(Scenario::new("long", "").step(Step::Wait { seconds: 3600 }).validate().is_err());

        let bad_directory = Scenario::new("bad", "")
            .with_directory(
                Directory::new().group(GroupSpec::new("group1").with_members(&["ghost"])),
            )
            .step(Step::Start);
        assert!(bad_directory.validate().is_err());

        let unknown_action = "name = \"x\"\nsteps = [{ action = \"dance\" }]\n";
        assert!(Scenario::from_toml(unknown_action, "inline").is_err());

        let modelled = Scenario::new("timeout", "").step(Step::SetOption {
            section: "nss".to_string(),
            key: "memcache_timeout".to_string(),
            value: Some("0".to_string()),
        });
        assert!(modelled.validate().is_err());
        assert!(Scenario::new("nss", "")
            .step(Step::RemoveSection {
                section: "nss".to_string()
            })
            .validate()
            .is_err());

        let debug = Scenario::new("debug", "").step(Step::SetOption {
            section: "pam".to_string(),
            key: "debug_level".to_string(),
            value: Some("1".to_string()),
        });
        assert!(debug.validate().is_ok());
        assert_eq!(debug.steps[0].to_string(), "set [pam] debug_level = 1");
    }

    #[test]
    fn test_cache_files_are_removed_only_while_stopped() {
        let lookup = Step::LookupUser {
            key: "user1".to_string(),
        };
        let while_running = Scenario::new("running", "").steps([
            Step::Start,
            Step::RemoveCacheFiles,
            lookup.clone(),
            Step::Stop,
            lookup.clone(),
        ]);
        let error = while_running.validate().unwrap_err();
        assert!(error.to_string().contains("step 2"));

        let after_restart = Scenario::new("restarted", "").steps([
            Step::Start,
            Step::Stop,
            Step::Restart,
            Step::RemoveCacheFiles,
        ]);
        assert!(after_restart.validate().is_err());

        let stopped = Scenario::new("stopped", "").steps([
            Step::RemoveCacheFiles,
            Step::Start,
            lookup.clone(),
            Step::Stop,
            Step::RemoveCacheFiles,
            lookup,
        ]);
        assert!(stopped.validate().is_ok());
    }

    #[test]
    fn test_sssd_config() {
        let scenario = Scenario::new("cfg", "")
            .with_cache(CacheSettings {
                passwd_size: 0,
                ..CacheSettings::default()
            })
            .with_domain(DomainOptions {
                fully_qualified_names: true,
                debug_level: Some(9),
                ..DomainOptions::default()
            });
        let config = scenario.sssd_config("test", &ldap());

        assert_eq!(config.get("sssd", "domains"), Some("test"));
        assert_eq!(config.get("nss", "memcache_size_passwd"), Some("0"));
        assert_eq!(config.get("nss", "memcache_timeout"), Some("300"));
        assert_eq!(config.get("domain/test", "use_fully_qualified_names"), Some("true"));
        assert_eq!(config.get("domain/test", "case_sensitive"), Some("true"));
        assert_eq!(config.get("pam", "debug_level"), Some("9"));
        assert_eq!(config.get("domain/test", "ldap_uri"), Some("ldap://master.ldap.test"));
    }

    #[test]
    fn test_cache_settings_enabled() {
        let settings = CacheSettings {
            group_size: 0,
            ..CacheSettings::default()
        };
        assert!(settings.enabled(CacheCategory::Passwd));
        assert!(!settings.enabled(CacheCategory::Group));

        let disabled = CacheSettings {
            timeout: 0,
            ..CacheSettings::default()
        };
        assert!(CacheCategory::ALL.iter().all(|c| !disabled.enabled(*c)));
    }
}
