//! Harness configuration: where the daemon runs and how to reach its directory

use crate::error::{HarnessError, HarnessResult};
use crate::nss::LdapConnection;
use crate::nss::daemon::SSSD_CONF;
use crate::nss::sssctl::MEMCACHE_DIR;
use crate::system::FilesystemReader;
use crate::system::commands::SshCommandExecutor;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Commands run on this machine
    #[default]
    Local,
    /// Commands run on a remote client through `ssh`
    Ssh,
    /// Commands are answered by an in-memory host
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    pub kind: TargetKind,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: TargetKind::Local,
            host: "localhost".to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }
}

impl TargetConfig {
    pub fn ssh_executor(&self) -> SshCommandExecutor {
        SshCommandExecutor::new(&self.host, &self.user)
            .with_port(self.port)
            .with_identity_file(self.identity_file.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ldap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainConfig {
    /// Domain name as used in `sssd.conf` and fully-qualified names
    pub name: String,
    pub provider: ProviderKind,
    pub ldap_uri: String,
    pub base_dn: String,
    pub bind_dn: String,
    pub bind_password: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "test".to_string(),
            provider: ProviderKind::Ldap,
            ldap_uri: "ldap://master.ldap.test".to_string(),
            base_dn: "dc=ldap,dc=test".to_string(),
            bind_dn: "cn=Directory Manager".to_string(),
            bind_password: "Secret123".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Limit for a single lookup or administrative command
    pub command_secs: u64,
    /// Limit for daemon start/stop and directory population
    pub daemon_secs: u64,
    /// Entries this close to their expiry are not asserted either way
    pub expiry_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 30,
            daemon_secs: 60,
            expiry_grace_secs: 1,
        }
    }
}

impl TimeoutConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn daemon(&self) -> Duration {
        Duration::from_secs(self.daemon_secs)
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::from_secs(self.expiry_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    pub sssd_conf: String,
    pub memcache_dir: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            sssd_conf: SSSD_CONF.to_string(),
            memcache_dir: MEMCACHE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub target: TargetConfig,
    pub domain: DomainConfig,
    pub timeouts: TimeoutConfig,
    pub paths: PathConfig,
}

impl HarnessConfig {
    /// Parse and validate configuration text; `location` names it in errors
    pub fn from_toml(text: &str, location: &str) -> HarnessResult<Self> {
        let config: HarnessConfig =
            toml::from_str(text).map_err(|e| HarnessError::config_error(location, e.message()))?;
        config.validate(location)?;
        Ok(config)
    }

    pub fn load<F: FilesystemReader>(reader: &F, path: &str) -> HarnessResult<Self> {
        let text = reader.read_to_string(path)?;
        Self::from_toml(&text, path)
    }

    pub fn ldap_connection(&self) -> LdapConnection {
        LdapConnection {
            uri: self.domain.ldap_uri.clone(),
            base_dn: self.domain.base_dn.clone(),
            bind_dn: self.domain.bind_dn.clone(),
            bind_password: self.domain.bind_password.clone(),
        }
    }

    fn validate(&self, location: &str) -> HarnessResult<()> {
        let fail = |reason: &str| Err(HarnessError::config_error(location, reason));

        let domain = &self.domain.name;
        let valid = |c: char| c.is_ascii_alphanumeric() || ".-_".contains(c);
        if domain.is_empty() || !domain.chars().all(valid) {
            return fail(&format!("invalid domain name '{}'", domain));
        }
        if self.timeouts.command_secs == 0 || self.timeouts.daemon_secs == 0 {
            return fail("timeouts must be at least one second");
        }
        if self.target.kind == TargetKind::Ssh && self.target.host.is_empty() {
            return fail("ssh target needs a host");
        }
        if !self.paths.sssd_conf.starts_with('/') || !self.paths.memcache_dir.starts_with('/') {
            return fail("paths must be absolute");
        }
        Ok(())
    }
}
