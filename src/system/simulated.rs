//! Scripted client host for demo mode and tests.
//!
//! Interprets the command surface the harness drives (NSS tools, `sssctl`,
//! `systemctl`, the LDAP client tools, `sshpass` and `kinit`) against an
//! in-memory directory and a lookaside cache built on [`Cache`].

use super::cache::Cache;
use super::commands::{CommandExecutor, CommandOutput, redacted_args};
use crate::error::HarnessResult;
use crate::nss::daemon::{SSSD_CONF, SssdConfig};
use crate::nss::provider::{DirectoryGroup, DirectoryUser};
use crate::nss::sssctl::MEMCACHE_DIR;
use crate::nss::{CacheCategory, InvalidationScope, LookupKey, NameRules, ResolvedDirectory};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Misbehaviour a simulated host can be told to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Fault {
    /// `sssctl cache-expire` succeeds without touching the lookaside cache
    IgnoreInvalidation,
    /// The lookaside cache is emptied when the daemon stops
    ForgetCacheOnStop,
    /// Categories configured with size 0 keep caching
    IgnoreDisabledCategories,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Provenance {
    Direct,
    Member(String),
}

#[derive(Debug, Clone)]
struct CachedUser {
    user: DirectoryUser,
    display: String,
    aliases: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct CachedGroup {
    group: DirectoryGroup,
    display: String,
    members: Vec<String>,
    aliases: BTreeSet<String>,
    provenance: BTreeSet<Provenance>,
}

/// Daemon options read from `sssd.conf` at start
#[derive(Debug, Clone, PartialEq, Eq)]
struct DaemonSettings {
    rules: NameRules,
    passwd_size: u64,
    group_size: u64,
    initgroups_size: u64,
    timeout: Duration,
}

impl DaemonSettings {
    fn from_config(config: &SssdConfig) -> Self {
        let domain = config
            .get("sssd", "domains")
            .and_then(|d| d.split(',').next())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let section = format!("domain/{}", domain);
        let flag = |key: &str, default: bool| {
            config
                .get(&section, key)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| {
            config
                .get("nss", key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            rules: NameRules::new(
                &domain,
                flag("use_fully_qualified_names", false),
                flag("case_sensitive", true),
            ),
            passwd_size: number(CacheCategory::Passwd.size_option(), 8),
            group_size: number(CacheCategory::Group.size_option(), 6),
            initgroups_size: number(CacheCategory::Initgroups.size_option(), 10),
            timeout: Duration::from_secs(number("memcache_timeout", 300)),
        }
    }

    fn size(&self, category: CacheCategory) -> u64 {
        match category {
            CacheCategory::Passwd => self.passwd_size,
            CacheCategory::Group => self.group_size,
            CacheCategory::Initgroups => self.initgroups_size,
        }
    }

    /// Categories the daemon keeps a cache file for
    fn cache_files(&self) -> Vec<CacheCategory> {
        if self.timeout.is_zero() {
            return Vec::new();
        }
        CacheCategory::ALL
            .into_iter()
            .filter(|c| self.size(*c) > 0)
            .collect()
    }
}

struct Memcache {
    settings: DaemonSettings,
    passwd: Cache<CachedUser>,
    group: Cache<CachedGroup>,
    initgroups: Cache<Vec<u32>>,
    files: Vec<CacheCategory>,
}

impl Memcache {
    fn new(settings: DaemonSettings, keep_disabled: bool) -> Self {
        let capacity = |category| {
            if settings.size(category) == 0 && !keep_disabled {
                0
            } else {
                usize::MAX
            }
        };
        Self {
            passwd: Cache::with_capacity(settings.timeout, capacity(CacheCategory::Passwd)),
            group: Cache::with_capacity(settings.timeout, capacity(CacheCategory::Group)),
            initgroups: Cache::with_capacity(settings.timeout, capacity(CacheCategory::Initgroups)),
            files: settings.cache_files(),
            settings,
        }
    }

    fn user(&self, key: &LookupKey) -> Option<&CachedUser> {
        self.passwd.iter().map(|(_, cached)| cached).find(|cached| match key {
            LookupKey::Name(name) => cached.aliases.contains(name),
            LookupKey::Id(uid) => cached.user.uid == *uid,
        })
    }

    fn group(&self, key: &LookupKey) -> Option<&CachedGroup> {
        self.group.iter().map(|(_, cached)| cached).find(|cached| match key {
            LookupKey::Name(name) => cached.aliases.contains(name),
            LookupKey::Id(gid) => cached.group.gid == *gid,
        })
    }

    fn store_user(&mut self, user: &DirectoryUser, display: String, alias: Option<&str>) {
        let mut aliases = self
            .passwd
            .get(&user.name)
            .map(|cached| cached.aliases.clone())
            .unwrap_or_default();
        aliases.insert(display.clone());
        aliases.extend(alias.map(str::to_string));
        self.passwd.insert(
            user.name.clone(),
            CachedUser {
                user: user.clone(),
                display,
                aliases,
            },
        );
    }

    fn store_group(
        &mut self,
        group: &DirectoryGroup,
        rules: &NameRules,
        alias: Option<&str>,
        source: Provenance,
    ) {
        if !self.group.is_enabled() {
            return;
        }
        let (mut aliases, mut provenance) = self
            .group
            .get(&group.name)
            .map(|cached| (cached.aliases.clone(), cached.provenance.clone()))
            .unwrap_or_default();
        let display = rules.display(&group.name);
        aliases.insert(display.clone());
        aliases.extend(alias.map(str::to_string));
        provenance.insert(source);
        self.group.insert(
            group.name.clone(),
            CachedGroup {
                group: group.clone(),
                display,
                members: group.members.iter().map(|m| rules.display(m)).collect(),
                aliases,
                provenance,
            },
        );
    }

    fn forget_user(&mut self, name: &str) {
        self.passwd.remove(name);
        self.initgroups.remove(name);
        let source = Provenance::Member(name.to_string());
        self.group.retain(|_, cached| {
            cached.provenance.remove(&source);
            !cached.provenance.is_empty()
        });
    }

    fn invalidate(&mut self, scope: &InvalidationScope) {
        let rules = self.settings.rules.clone();
        match scope {
            InvalidationScope::User(name) => {
                if let Some(name) = rules.canonical(name) {
                    self.forget_user(&name);
                }
            }
            InvalidationScope::Group(name) => {
                if let Some(name) = rules.canonical(name) {
                    self.group.remove(&name);
                }
            }
            InvalidationScope::AllUsers => {
                self.passwd.clear();
                self.initgroups.clear();
                self.group.retain(|_, cached| {
                    cached.provenance.retain(|p| *p == Provenance::Direct);
                    !cached.provenance.is_empty()
                });
            }
            InvalidationScope::AllGroups => self.group.clear(),
            InvalidationScope::Everything => self.clear(),
        }
    }

    fn remove_file(&mut self, category: CacheCategory) {
        match category {
            CacheCategory::Passwd => self.passwd.clear(),
            CacheCategory::Group => self.group.clear(),
            CacheCategory::Initgroups => self.initgroups.clear(),
        }
        self.files.retain(|c| *c != category);
    }

    fn clear(&mut self) {
        self.passwd.clear();
        self.group.clear();
        self.initgroups.clear();
    }
}

#[derive(Default)]
struct HostState {
    directory: ResolvedDirectory,
    config: Option<String>,
    running: bool,
    memcache: Option<Memcache>,
    faults: HashSet<Fault>,
}

impl HostState {
    fn rules(&self) -> NameRules {
        self.memcache
            .as_ref()
            .map(|m| m.settings.rules.clone())
            .unwrap_or_default()
    }

    fn find_user(&self, rules: &NameRules, key: &LookupKey) -> Option<DirectoryUser> {
        match key {
            LookupKey::Id(uid) => self.directory.user_by_uid(*uid),
            LookupKey::Name(name) => rules.canonical(name).and_then(|n| self.directory.user(&n)),
        }
        .cloned()
    }

    fn find_group(&self, rules: &NameRules, key: &LookupKey) -> Option<DirectoryGroup> {
        match key {
            LookupKey::Id(gid) => self.directory.group_by_gid(*gid),
            LookupKey::Name(name) => rules.canonical(name).and_then(|n| self.directory.group(&n)),
        }
        .cloned()
    }

    /// Display name of a gid as `id` would print it, if it resolves
    fn group_name(&self, rules: &NameRules, gid: u32) -> Option<String> {
        if self.running {
            self.directory.group_by_gid(gid).map(|g| rules.display(&g.name))
        } else {
            self.memcache
                .as_ref()
                .and_then(|m| m.group(&LookupKey::Id(gid)))
                .map(|g| g.display.clone())
        }
    }

    fn id(&mut self, key: &str) -> CommandOutput {
        let rules = self.rules();
        let key = LookupKey::parse(key);
        let resolved = if self.running {
            self.find_user(&rules, &key).map(|user| {
                let membership = self.directory.membership(&user);
                let groups: Vec<DirectoryGroup> =
                    self.directory.groups_of(&user).cloned().collect();
                if let Some(memcache) = self.memcache.as_mut() {
                    memcache.store_user(&user, rules.display(&user.name), name_alias(&key));
                    memcache.initgroups.insert(user.name.clone(), membership.clone());
                    for group in &groups {
                        let source = Provenance::Member(user.name.clone());
                        memcache.store_group(group, &rules, None, source);
                    }
                }
                (rules.display(&user.name), user, membership)
            })
        } else {
            self.memcache.as_ref().and_then(|memcache| {
                let cached = memcache.user(&key)?;
                let membership = memcache
                    .initgroups
                    .get(&cached.user.name)
                    .cloned()
                    .unwrap_or_else(|| vec![cached.user.gid]);
                Some((cached.display.clone(), cached.user.clone(), membership))
            })
        };

        let Some((display, user, membership)) = resolved else {
            return CommandOutput::new(1, "", format!("id: '{}': no such user\n", key));
        };
        let describe = |gid: u32| match self.group_name(&rules, gid) {
            Some(name) => format!("{}({})", gid, name),
            None => gid.to_string(),
        };
        let groups: Vec<String> = std::iter::once(user.gid)
            .chain(membership.into_iter().filter(|gid| *gid != user.gid))
            .map(&describe)
            .collect();
        CommandOutput::new(
            0,
            format!(
                "uid={}({}) gid={} groups={}\n",
                user.uid,
                display,
                describe(user.gid),
                groups.join(",")
            ),
            "",
        )
    }

    fn getent_passwd(&mut self, key: &str) -> CommandOutput {
        let rules = self.rules();
        let key = LookupKey::parse(key);
        let resolved = if self.running {
            self.find_user(&rules, &key).map(|user| {
                let display = rules.display(&user.name);
                if let Some(memcache) = self.memcache.as_mut() {
                    memcache.store_user(&user, display.clone(), name_alias(&key));
                }
                (display, user)
            })
        } else {
            self.memcache
                .as_ref()
                .and_then(|m| m.user(&key))
                .map(|cached| (cached.display.clone(), cached.user.clone()))
        };

        match resolved {
            Some((display, user)) => CommandOutput::new(
                0,
                format!(
                    "{display}:*:{}:{}:{display}:/home/{}:/bin/bash\n",
                    user.uid, user.gid, user.name
                ),
                "",
            ),
            None => CommandOutput::new(2, "", ""),
        }
    }

    fn getent_group(&mut self, key: &str) -> CommandOutput {
        let rules = self.rules();
        let key = LookupKey::parse(key);
        let resolved = if self.running {
            self.find_group(&rules, &key).map(|group| {
                if let Some(memcache) = self.memcache.as_mut() {
                    memcache.store_group(&group, &rules, name_alias(&key), Provenance::Direct);
                }
                let members: Vec<String> = group.members.iter().map(|m| rules.display(m)).collect();
                (rules.display(&group.name), group.gid, members)
            })
        } else {
            self.memcache
                .as_ref()
                .and_then(|m| m.group(&key))
                .map(|cached| (cached.display.clone(), cached.group.gid, cached.members.clone()))
        };

        match resolved {
            Some((display, gid, members)) => {
                CommandOutput::new(0, format!("{}:*:{}:{}\n", display, gid, members.join(",")), "")
            }
            None => CommandOutput::new(2, "", ""),
        }
    }

    fn start(&mut self) -> CommandOutput {
        if self.running {
            return CommandOutput::new(0, "", "");
        }
        let config = match self.config.as_deref().map(SssdConfig::parse) {
            Some(Ok(config)) => config,
            Some(Err(e)) => return CommandOutput::new(1, "", format!("sssd: {}\n", e)),
            None => return CommandOutput::new(1, "", "sssd: configuration file missing\n"),
        };
        let settings = DaemonSettings::from_config(&config);
        let keep_disabled = self.faults.contains(&Fault::IgnoreDisabledCategories);

        // Every start begins with new, empty cache files
        self.memcache = Some(Memcache::new(settings, keep_disabled));
        self.running = true;
        debug!("simulated daemon started");
        CommandOutput::new(0, "", "")
    }

    fn stop(&mut self) -> CommandOutput {
        self.running = false;
        if self.faults.contains(&Fault::ForgetCacheOnStop) {
            if let Some(memcache) = self.memcache.as_mut() {
                memcache.clear();
            }
        }
        match self.memcache.as_ref() {
            Some(memcache) => debug!(
                passwd = memcache.passwd.len(),
                group = memcache.group.len(),
                initgroups = memcache.initgroups.len(),
                "simulated daemon stopped"
            ),
            None => debug!("simulated daemon stopped"),
        }
        CommandOutput::new(0, "", "")
    }

    fn cache_expire(&mut self, args: &[&str]) -> CommandOutput {
        let Some(scope) = InvalidationScope::from_args(args) else {
            return CommandOutput::new(1, "", format!("sssctl: invalid arguments {:?}\n", args));
        };
        if self.faults.contains(&Fault::IgnoreInvalidation) {
            return CommandOutput::new(0, "", "");
        }
        if let Some(memcache) = self.memcache.as_mut() {
            memcache.invalidate(&scope);
        }
        CommandOutput::new(0, "", "")
    }

    fn ldapadd(&mut self, ldif: &str) -> CommandOutput {
        let added = match ResolvedDirectory::from_ldif(ldif) {
            Ok(added) => added,
            Err(e) => return CommandOutput::new(21, "", format!("ldapadd: {}\n", e)),
        };
        let mut existed = false;
        for user in added.users {
            if self.directory.user(&user.name).is_some() {
                existed = true;
            } else {
                self.directory.users.push(user);
            }
        }
        for group in added.groups {
            if self.directory.group(&group.name).is_some() {
                existed = true;
            } else {
                self.directory.groups.push(group);
            }
        }
        CommandOutput::new(if existed { 68 } else { 0 }, "", "")
    }

    fn ssh_login(&mut self, user: &str, password: &str) -> CommandOutput {
        if !self.running {
            return CommandOutput::new(5, "", "");
        }
        let rules = self.rules();
        let key = LookupKey::Name(user.to_string());
        let Some(found) = self.find_user(&rules, &key) else {
            return CommandOutput::new(5, "", "");
        };
        let accepted = found.password == password;
        let membership = self.directory.membership(&found);
        if let Some(memcache) = self.memcache.as_mut() {
            memcache.store_user(&found, rules.display(&found.name), Some(user));
            if accepted {
                memcache.initgroups.insert(found.name.clone(), membership);
            }
        }
        CommandOutput::new(if accepted { 0 } else { 5 }, "", "")
    }

    fn kinit(&self, user: &str, password: &str) -> CommandOutput {
        let rules = self.rules();
        let accepted = self.running
            && self
                .find_user(&rules, &LookupKey::Name(user.to_string()))
                .is_some_and(|found| found.password == password);
        if accepted {
            CommandOutput::new(0, "", "")
        } else {
            let message = "kinit: Password incorrect while getting initial credentials\n";
            CommandOutput::new(1, "", message)
        }
    }
}

fn name_alias(key: &LookupKey) -> Option<&str> {
    match key {
        LookupKey::Name(name) => Some(name.as_str()),
        LookupKey::Id(_) => None,
    }
}

/// In-memory client host with the identity daemon's command surface
pub struct SimulatedHost {
    state: Mutex<HostState>,
    sssd_conf: String,
    memcache_dir: String,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::with_paths(SSSD_CONF, MEMCACHE_DIR)
    }

    pub fn with_paths(sssd_conf: &str, memcache_dir: &str) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            sssd_conf: sssd_conf.to_string(),
            memcache_dir: memcache_dir.to_string(),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .faults
            .insert(fault);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_file(&self, path: &str) -> Option<CacheCategory> {
        let name = path.strip_prefix(self.memcache_dir.as_str())?.strip_prefix('/')?;
        CacheCategory::ALL.into_iter().find(|c| c.file_name() == name)
    }

    fn dispatch(&self, command: &str, args: &[&str], input: Option<&str>) -> CommandOutput {
        let mut state = self.lock();
        let input = input.unwrap_or_default();

        match (command, args) {
            ("id", [key]) => state.id(key),
            ("getent", ["passwd", key]) => state.getent_passwd(key),
            ("getent", ["group", key]) => state.getent_group(key),
            ("sssctl", ["cache-expire", scope @ ..]) => state.cache_expire(scope),
            ("ls", ["-1", dir]) if *dir == self.memcache_dir => {
                let mut listing = String::new();
                if let Some(memcache) = state.memcache.as_ref() {
                    let mut files = memcache.files.clone();
                    files.sort();
                    for file in files {
                        let _ = writeln!(listing, "{}", file.file_name());
                    }
                }
                CommandOutput::new(0, listing, "")
            }
            ("ls", ["-1", dir]) => CommandOutput::new(
                2,
                "",
                format!("ls: cannot access '{}': No such file or directory\n", dir),
            ),
            ("rm", ["-f", paths @ ..]) => {
                for category in paths.iter().filter_map(|p| self.cache_file(p)) {
                    if let Some(memcache) = state.memcache.as_mut() {
                        memcache.remove_file(category);
                    }
                }
                CommandOutput::new(0, "", "")
            }
            ("systemctl", ["is-active", "--quiet", "sssd"]) => {
                CommandOutput::new(if state.running { 0 } else { 3 }, "", "")
            }
            ("systemctl", ["start", "sssd"]) => state.start(),
            ("systemctl", ["stop", "sssd"]) => state.stop(),
            ("systemctl", ["restart", "sssd"]) => {
                state.stop();
                state.start()
            }
            ("tee", [path]) if *path == self.sssd_conf => {
                state.config = Some(input.to_string());
                CommandOutput::new(0, input, "")
            }
            ("chmod", [_, path]) | ("cat", [path])
                if *path != self.sssd_conf || state.config.is_none() =>
            {
                let message = format!("{}: {}: No such file or directory\n", command, path);
                CommandOutput::new(1, "", message)
            }
            ("chmod", [_, _]) => CommandOutput::new(0, "", ""),
            ("cat", [_]) => CommandOutput::new(0, state.config.clone().unwrap_or_default(), ""),
            ("sssd", [flag]) if flag.starts_with("--genconf-section=") => {
                match state.config.as_deref().map(SssdConfig::parse) {
                    Some(Ok(_)) => CommandOutput::new(0, "", ""),
                    _ => CommandOutput::new(1, "", "sssd: cannot read configuration\n"),
                }
            }
            ("ldapadd", _) => state.ldapadd(input),
            ("ldapdelete", _) => {
                let empty = state.directory.users.is_empty() && state.directory.groups.is_empty();
                state.directory = ResolvedDirectory::default();
                CommandOutput::new(if empty { 32 } else { 0 }, "", "")
            }
            ("sshpass", ["-p", password, "ssh", rest @ ..]) => {
                match rest.iter().position(|a| *a == "-l").and_then(|i| rest.get(i + 1)) {
                    Some(user) => state.ssh_login(user, password),
                    None => CommandOutput::new(255, "", "ssh: no login name\n"),
                }
            }
            ("kinit", [user]) => state.kinit(user, input.trim_end_matches('\n')),
            _ => CommandOutput::new(127, "", format!("{}: command not found\n", command)),
        }
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for SimulatedHost {
    async fn execute(&self, command: &str, args: &[&str]) -> HarnessResult<CommandOutput> {
        debug!(command, args = ?redacted_args(command, args), "simulated exec");
        Ok(self.dispatch(command, args, None))
    }

    async fn execute_with_input(
        &self,
        command: &str,
        args: &[&str],
        input: &str,
    ) -> HarnessResult<CommandOutput> {
        let shown = redacted_args(command, args);
        debug!(command, args = ?shown, input_len = input.len(), "simulated exec with input");
        Ok(self.dispatch(command, args, Some(input)))
    }

    fn describe(&self) -> String {
        "simulated host".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nss::{
        Auth, Daemon, Directory, GroupSpec, LdapConnection, LdapProvider, Sssctl, Tools, UserSpec,
    };
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn connection() -> LdapConnection {
        LdapConnection {
            uri: "ldap://master.ldap.test".to_string(),
            base_dn: "dc=ldap,dc=test".to_string(),
            bind_dn: "cn=Directory Manager".to_string(),
            bind_password: "Secret123".to_string(),
        }
    }

    fn config(timeout: u32, passwd_size: u32, fully_qualified: bool) -> SssdConfig {
        let mut config = SssdConfig::new();
        config
            .set("sssd", "services", "nss, pam")
            .set("sssd", "domains", "test")
            .set("nss", "memcache_timeout", timeout)
            .set("nss", "memcache_size_passwd", passwd_size)
            .set("domain/test", "id_provider", "ldap")
            .set("domain/test", "use_fully_qualified_names", fully_qualified);
        config
    }

    async fn provisioned(host: &SimulatedHost, config: &SssdConfig) {
        let directory = Directory::new()
            .user(UserSpec::new("user1").with_uid(10001).with_gid(19001))
            .user(UserSpec::new("user2").with_uid(10002).with_gid(19002))
            .group(GroupSpec::new("group1").with_gid(20001).with_members(&["user1"]))
            .group(GroupSpec::new("group2").with_gid(20002).with_members(&["user1", "user2"]))
            .materialize()
            .unwrap();
        LdapProvider::new(host, connection(), TIMEOUT)
            .populate(&directory)
            .await
            .unwrap();
        let daemon = Daemon::new(host, SSSD_CONF, TIMEOUT);
        daemon.apply_config(config).await.unwrap();
        daemon.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookups_while_running() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, false)).await;
        let tools = Tools::new(&host, TIMEOUT);

        let entry = tools.id("user1").await.unwrap().unwrap();
        assert_eq!(entry.user.name.as_deref(), Some("user1"));
        assert_eq!(entry.gids(), vec![19001, 20001, 20002]);
        assert!(entry.memberof(&["group1", "group2"]));

        let passwd = tools.getent_passwd(10002u32).await.unwrap().unwrap();
        assert_eq!(passwd.name, "user2");
        assert_eq!(passwd.home, "/home/user2");

        let group = tools.getent_group("group2").await.unwrap().unwrap();
        assert_eq!(group.members, vec!["user1", "user2"]);

        assert!(tools.id("ghost").await.unwrap().is_none());
        assert!(tools.getent_group(99999u32).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_serves_lookups_after_stop() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, false)).await;
        let tools = Tools::new(&host, TIMEOUT);
        tools.id("user1").await.unwrap();

        Daemon::new(&host, SSSD_CONF, TIMEOUT).stop().await.unwrap();

        let entry = tools.id(10001u32).await.unwrap().unwrap();
        assert_eq!(entry.gids(), vec![19001, 20001, 20002]);
        assert!(tools.getent_group("group2").await.unwrap().is_some());
        // Never looked up while running
        assert!(tools.id("user2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_recreates_cache() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, false)).await;
        let tools = Tools::new(&host, TIMEOUT);
        let daemon = Daemon::new(&host, SSSD_CONF, TIMEOUT);
        tools.id("user1").await.unwrap();

        daemon.restart().await.unwrap();
        tools.id("user2").await.unwrap();
        daemon.stop().await.unwrap();

        assert!(tools.id("user1").await.unwrap().is_none());
        assert!(tools.id("user2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disabled_passwd_cache() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 0, false)).await;
        let tools = Tools::new(&host, TIMEOUT);
        tools.id("user1").await.unwrap();
        Daemon::new(&host, SSSD_CONF, TIMEOUT).stop().await.unwrap();

        assert!(tools.id("user1").await.unwrap().is_none());
        assert!(tools.getent_group(20001u32).await.unwrap().is_some());

        let files = Sssctl::new(&host, MEMCACHE_DIR, TIMEOUT).list_cache_files().await.unwrap();
        assert_eq!(files, vec!["group", "initgroups"]);
    }

    #[tokio::test]
    async fn test_user_invalidation_drops_member_groups() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, false)).await;
        let tools = Tools::new(&host, TIMEOUT);
        let sssctl = Sssctl::new(&host, MEMCACHE_DIR, TIMEOUT);
        tools.id("user1").await.unwrap();
        tools.getent_group("group2").await.unwrap();

        sssctl
            .cache_expire(&InvalidationScope::User("user1".to_string()))
            .await
            .unwrap();
        Daemon::new(&host, SSSD_CONF, TIMEOUT).stop().await.unwrap();

        assert!(tools.id("user1").await.unwrap().is_none());
        assert!(tools.getent_group("group1").await.unwrap().is_none());
        // Also fetched directly, so it stays
        assert!(tools.getent_group("group2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ignored_invalidation_fault() {
        let host = SimulatedHost::new().with_fault(Fault::IgnoreInvalidation);
        provisioned(&host, &config(300, 8, false)).await;
        let tools = Tools::new(&host, TIMEOUT);
        tools.id("user1").await.unwrap();

        Sssctl::new(&host, MEMCACHE_DIR, TIMEOUT)
            .cache_expire(&InvalidationScope::Everything)
            .await
            .unwrap();
        Daemon::new(&host, SSSD_CONF, TIMEOUT).stop().await.unwrap();
        assert!(tools.id("user1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fully_qualified_names() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, true)).await;
        let tools = Tools::new(&host, TIMEOUT);

        assert!(tools.id("user1").await.unwrap().is_none());
        let entry = tools.id("user1@test").await.unwrap().unwrap();
        assert_eq!(entry.user.name.as_deref(), Some("user1@test"));
        assert!(entry.memberof(&["group1@test"]));
    }

    #[tokio::test]
    async fn test_removed_cache_files_and_zero_timeout() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(0, 8, false)).await;
        let tools = Tools::new(&host, TIMEOUT);
        let sssctl = Sssctl::new(&host, MEMCACHE_DIR, TIMEOUT);
        tools.id("user1").await.unwrap();
        assert!(sssctl.list_cache_files().await.unwrap().is_empty());

        Daemon::new(&host, SSSD_CONF, TIMEOUT).stop().await.unwrap();
        assert!(tools.id("user1").await.unwrap().is_none());
        sssctl.remove_cache_files().await.unwrap();
    }

    #[tokio::test]
    async fn test_daemon_control_and_config_dump() {
        let host = SimulatedHost::new();
        let daemon = Daemon::new(&host, SSSD_CONF, TIMEOUT);
        assert!(daemon.start().await.is_err());

        daemon.apply_config(&config(300, 8, false)).await.unwrap();
        assert_eq!(daemon.genconf_section("new_section").await.unwrap(), 0);
        daemon.restart().await.unwrap();
        assert!(daemon.is_active().await.unwrap());
        assert!(daemon.config_dumps().await.unwrap().contains("memcache_timeout = 300"));

        daemon.stop().await.unwrap();
        assert!(!daemon.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn test_authentication() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, false)).await;
        let auth = Auth::new(&host, TIMEOUT);

        assert!(auth.ssh_password("user1", "Secret123").await.unwrap());
        assert!(!auth.ssh_password("user1", "wrong").await.unwrap());
        assert!(!auth.ssh_password("ghost", "Secret123").await.unwrap());
        assert!(auth.kinit("user2", "Secret123").await.unwrap());
        assert!(!auth.kinit("user2", "nope").await.unwrap());

        // sshd keeps answering; PAM cannot reach the stopped daemon
        Daemon::new(&host, SSSD_CONF, TIMEOUT).stop().await.unwrap();
        assert!(!auth.ssh_password("user1", "Secret123").await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_clear() {
        let host = SimulatedHost::new();
        provisioned(&host, &config(300, 8, false)).await;
        let provider = LdapProvider::new(&host, connection(), TIMEOUT);
        provider.clear().await.unwrap();
        // Already empty
        provider.clear().await.unwrap();
        assert!(Tools::new(&host, TIMEOUT).id("user1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let host = SimulatedHost::new();
        let output = host.execute("reboot", &[]).await.unwrap();
        assert_eq!(output.status, 127);
    }
}
