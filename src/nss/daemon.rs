use crate::error::{HarnessError, HarnessResult};
use crate::system::{CommandExecutor, process};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Default location of the daemon configuration
pub const SSSD_CONF: &str = "/etc/sssd/sssd.conf";

/// `sssd.conf` as ordered sections of ordered key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SssdConfig {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl SssdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` in `section`, creating the section when missing
    pub fn set(&mut self, section: &str, key: &str, value: impl ToString) -> &mut Self {
        let value = value.to_string();
        let index = match self.sections.iter().position(|(name, _)| name == section) {
            Some(index) => index,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[index].1;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn section(&self, section: &str) -> Option<&[(String, String)]> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, entries)| entries.as_slice())
    }

    pub fn remove(&mut self, section: &str, key: &str) -> bool {
        let Some((_, entries)) = self.sections.iter_mut().find(|(name, _)| name == section) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
    }

    pub fn remove_section(&mut self, section: &str) -> bool {
        let before = self.sections.len();
        self.sections.retain(|(name, _)| name != section);
        self.sections.len() != before
    }

    /// Parse INI text, either rendered by this type or written by hand
    pub fn parse(text: &str) -> HarnessResult<Self> {
        let mut config = SssdConfig::new();
        let mut current: Option<String> = None;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                if config.section(&name).is_none() {
                    config.sections.push((name.clone(), Vec::new()));
                }
                current = Some(name);
                continue;
            }
            let error = |reason: &str| {
                let reason = format!("line {}: {}", number + 1, reason);
                HarnessError::parse_error("sssd.conf", raw, &reason)
            };
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| error("expected key = value"))?;
            let section = current
                .as_deref()
                .ok_or_else(|| error("option outside of a section"))?;
            config.set(section, key.trim(), value.trim());
        }

        Ok(config)
    }
}

impl fmt::Display for SssdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, entries)) in self.sections.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", name)?;
            for (key, value) in entries {
                writeln!(f, "{} = {}", key, value)?;
            }
        }
        Ok(())
    }
}

/// Lifecycle control of the identity daemon on the host under test
pub struct Daemon<'a, E: CommandExecutor> {
    executor: &'a E,
    service: String,
    config_path: String,
    timeout: Duration,
}

impl<'a, E: CommandExecutor> Daemon<'a, E> {
    pub fn new(executor: &'a E, config_path: &str, timeout: Duration) -> Self {
        Self {
            executor,
            service: "sssd".to_string(),
            config_path: config_path.to_string(),
            timeout,
        }
    }

    /// Write `config` to the host; takes effect on the next start
    pub async fn apply_config(&self, config: &SssdConfig) -> HarnessResult<()> {
        let rendered = config.to_string();
        debug!(path = %self.config_path, "writing daemon configuration:\n{}", rendered);

        let tee_args = [self.config_path.as_str()];
        tokio::time::timeout(
            self.timeout,
            self.executor.execute_with_input("tee", &tee_args, &rendered),
        )
        .await
        .map_err(|_| HarnessError::timeout_error("writing daemon configuration", self.timeout))??
            .into_checked("tee", &tee_args)
            .map_err(|e| HarnessError::daemon_error("configure", &e.to_string()))?;

        let chmod_args = ["600", self.config_path.as_str()];
        self.executor
            .execute_with_timeout("chmod", &chmod_args, self.timeout)
            .await?
            .into_checked("chmod", &chmod_args)
            .map_err(|e| HarnessError::daemon_error("configure", &e.to_string()))?;
        Ok(())
    }

    pub async fn start(&self) -> HarnessResult<()> {
        info!(service = %self.service, "starting daemon");
        self.systemctl("start").await
    }

    /// Stop the daemon; on a local target also wait for the process to go away
    pub async fn stop(&self) -> HarnessResult<()> {
        info!(service = %self.service, "stopping daemon");
        self.systemctl("stop").await?;
        if self.executor.is_local() {
            process::wait_for_exit(&self.service, self.timeout).await?;
        }
        Ok(())
    }

    pub async fn restart(&self) -> HarnessResult<()> {
        info!(service = %self.service, "restarting daemon");
        self.systemctl("restart").await
    }

    pub async fn is_active(&self) -> HarnessResult<bool> {
        let args = ["is-active", "--quiet", self.service.as_str()];
        let output = self
            .executor
            .execute_with_timeout("systemctl", &args, self.timeout)
            .await?;
        Ok(output.success())
    }

    /// Configuration currently on the host
    pub async fn config_dumps(&self) -> HarnessResult<String> {
        let args = [self.config_path.as_str()];
        self.executor
            .execute_with_timeout("cat", &args, self.timeout)
            .await?
            .into_checked("cat", &args)
    }

    /// Run `sssd --genconf-section=SECTION` and return its exit status
    pub async fn genconf_section(&self, section: &str) -> HarnessResult<i32> {
        let flag = format!("--genconf-section={}", section);
        let output = self
            .executor
            .execute_with_timeout(&self.service, &[flag.as_str()], self.timeout)
            .await?;
        Ok(output.status)
    }

    async fn systemctl(&self, action: &str) -> HarnessResult<()> {
        let args = [action, self.service.as_str()];
        let output = self
            .executor
            .execute_with_timeout("systemctl", &args, self.timeout)
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(HarnessError::daemon_error(
                action,
                &format!("systemctl exited with {}: {}", output.status, output.stderr.trim()),
            ))
        }
    }
}
