use super::types::CacheCategory;
use crate::error::HarnessResult;
use crate::system::CommandExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Default location of the daemon's memory cache files
pub const MEMCACHE_DIR: &str = "/var/lib/sss/mc";

/// What `sssctl cache-expire` invalidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    User(String),
    Group(String),
    AllUsers,
    AllGroups,
    Everything,
}

impl InvalidationScope {
    /// Arguments following `sssctl cache-expire`
    pub fn args(&self) -> Vec<&str> {
        match self {
            InvalidationScope::User(name) => vec!["-u", name.as_str()],
            InvalidationScope::Group(name) => vec!["-g", name.as_str()],
            InvalidationScope::AllUsers => vec!["-U"],
            InvalidationScope::AllGroups => vec!["-G"],
            InvalidationScope::Everything => vec!["-E"],
        }
    }

    /// Parse `cache-expire` arguments back into a scope
    pub fn from_args(args: &[&str]) -> Option<Self> {
        match args {
            ["-u", name] => Some(InvalidationScope::User(name.to_string())),
            ["-g", name] => Some(InvalidationScope::Group(name.to_string())),
            ["-U"] => Some(InvalidationScope::AllUsers),
            ["-G"] => Some(InvalidationScope::AllGroups),
            ["-E"] => Some(InvalidationScope::Everything),
            _ => None,
        }
    }
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sssctl cache-expire {}", self.args().join(" "))
    }
}

/// Cache administration on the host under test
pub struct Sssctl<'a, E: CommandExecutor> {
    executor: &'a E,
    memcache_dir: String,
    timeout: Duration,
}

impl<'a, E: CommandExecutor> Sssctl<'a, E> {
    pub fn new(executor: &'a E, memcache_dir: &str, timeout: Duration) -> Self {
        Self {
            executor,
            memcache_dir: memcache_dir.to_string(),
            timeout,
        }
    }

    /// Run `sssctl cache-expire` for `scope`
    pub async fn cache_expire(&self, scope: &InvalidationScope) -> HarnessResult<()> {
        let mut args = vec!["cache-expire"];
        args.extend(scope.args());
        info!(%scope, "invalidating cache");
        self.executor
            .execute_with_timeout("sssctl", &args, self.timeout)
            .await?
            .into_checked("sssctl", &args)?;
        Ok(())
    }

    /// Names of the memory cache files present on the host
    pub async fn list_cache_files(&self) -> HarnessResult<Vec<String>> {
        let args = ["-1", self.memcache_dir.as_str()];
        let output = self
            .executor
            .execute_with_timeout("ls", &args, self.timeout)
            .await?;
        // ls exits with 2 when the directory itself is missing
        if output.status == 2 {
            return Ok(Vec::new());
        }
        let stdout = output.into_checked("ls", &args)?;
        let mut files: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        files.sort();
        Ok(files)
    }

    /// Delete the memory cache files without telling the daemon
    pub async fn remove_cache_files(&self) -> HarnessResult<()> {
        let paths: Vec<String> = CacheCategory::ALL
            .iter()
            .map(|c| format!("{}/{}", self.memcache_dir, c.file_name()))
            .collect();
        let mut args = vec!["-f"];
        args.extend(paths.iter().map(String::as_str));
        info!(dir = %self.memcache_dir, "removing memory cache files");
        self.executor
            .execute_with_timeout("rm", &args, self.timeout)
            .await?
            .into_checked("rm", &args)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_args() {
        assert_eq!(InvalidationScope::User("user1".into()).args(), vec!["-u", "user1"]);
        assert_eq!(InvalidationScope::Group("group1".into()).args(), vec!["-g", "group1"]);
        assert_eq!(InvalidationScope::AllUsers.args(), vec!["-U"]);
        assert_eq!(InvalidationScope::AllGroups.args(), vec!["-G"]);
        assert_eq!(InvalidationScope::Everything.args(), vec!["-E"]);
    }

    #[test]
    fn test_scope_from_args() {
        assert_eq!(
            InvalidationScope::from_args(&["-u", "user1"]),
            Some(InvalidationScope::User("user1".into()))
        );
        assert_eq!(InvalidationScope::from_args(&["-E"]), Some(InvalidationScope::Everything));
        assert_eq!(InvalidationScope::from_args(&["-x"]), None);
        assert_eq!(InvalidationScope::from_args(&["-u"]), None);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(
            InvalidationScope::User("user1".into()).to_string(),
            "sssctl cache-expire -u user1"
        );
    }

    #[test]
    fn test_scope_toml_forms() {
        #[derive(Deserialize)]
        struct Holder {
            scopes: Vec<InvalidationScope>,
        }
        let holder: Holder =
            toml::from_str(r#"scopes = [{ user = "user1" }, "all_groups", "everything"]"#).unwrap();
        assert_eq!(
            holder.scopes,
            vec![
                InvalidationScope::User("user1".into()),
                InvalidationScope::AllGroups,
                InvalidationScope::Everything,
            ]
        );
    }
}
