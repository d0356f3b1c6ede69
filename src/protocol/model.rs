//! Expected behaviour of the daemon and its lookaside cache.
//!
//! The model tracks what the lookaside cache holds after each step and
//! answers, for every query, what `id`, `getent` and the login tools must
//! report. While the daemon runs, queries resolve against the directory and
//! fill the cache as a side effect. Once stopped, only fresh cache entries
//! answer.
//!
//! Entry ages follow the time the scenario has been running. An entry whose
//! age is within the grace band around its timeout may or may not have
//! expired on the host, so lookups served by it are not asserted.

use super::scenario::CacheSettings;
use crate::nss::provider::{DirectoryGroup, DirectoryUser};
use crate::nss::{
    CacheCategory, GroupEntry, IdEntry, InvalidationScope, LookupKey, NameRules, PasswdEntry,
    ResolvedDirectory,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Default width of the band around an entry's expiry in which it is not asserted
pub const EXPIRY_GRACE: Duration = Duration::from_secs(1);

/// What a lookup must report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected<T> {
    Found(T),
    NotFound,
    /// Answered by an entry that may already have expired on the host
    Either(T),
}

impl<T> Expected<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Expected::Found(value) => Some(value),
            Expected::NotFound | Expected::Either(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Expected::Found(_))
    }

    /// Whether `observed` satisfies this expectation under `matches`
    pub fn accepts<O>(&self, observed: Option<&O>, matches: impl Fn(&T, &O) -> bool) -> bool {
        match (self, observed) {
            (Expected::Found(expected) | Expected::Either(expected), Some(observed)) => {
                matches(expected, observed)
            }
            (Expected::NotFound | Expected::Either(_), None) => true,
            (Expected::Found(_), None) | (Expected::NotFound, Some(_)) => false,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Expected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Found(value) => write!(f, "{}", value),
            Expected::NotFound => write!(f, "not found"),
            Expected::Either(value) => write!(f, "{} or not found", value),
        }
    }
}

/// Identity fields of a user as a lookup reports them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    /// Sorted gids including the primary one; `None` when not asserted
    pub groups: Option<Vec<u32>>,
}

impl UserRecord {
    /// Whether `observed` satisfies this expectation
    pub fn matches(&self, observed: &UserRecord) -> bool {
        self.name == observed.name
            && self.uid == observed.uid
            && self.gid == observed.gid
            && match (&self.groups, &observed.groups) {
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

impl From<&IdEntry> for UserRecord {
    fn from(entry: &IdEntry) -> Self {
        Self {
            name: entry.user.name.clone().unwrap_or_default(),
            uid: entry.user.id,
            gid: entry.group.id,
            groups: Some(entry.gids()),
        }
    }
}

impl From<&PasswdEntry> for UserRecord {
    fn from(entry: &PasswdEntry) -> Self {
        Self {
            name: entry.name.clone(),
            uid: entry.uid,
            gid: entry.gid,
            groups: None,
        }
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} uid={} gid={}", self.name, self.uid, self.gid)?;
        if let Some(groups) = &self.groups {
            let groups: Vec<String> = groups.iter().map(u32::to_string).collect();
            write!(f, " groups=[{}]", groups.join(","))?;
        }
        Ok(())
    }
}

/// Group fields as `getent group` reports them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl GroupRecord {
    /// Member order is not part of the contract
    pub fn matches(&self, observed: &GroupRecord) -> bool {
        let sorted = |members: &[String]| {
            let mut members = members.to_vec();
            members.sort();
            members
        };
        self.name == observed.name
            && self.gid == observed.gid
            && sorted(&self.members) == sorted(&observed.members)
    }
}

impl From<&GroupEntry> for GroupRecord {
    fn from(entry: &GroupEntry) -> Self {
        Self {
            name: entry.name.clone(),
            gid: entry.gid,
            members: entry.members.clone(),
        }
    }
}

impl fmt::Display for GroupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} gid={} members=[{}]", self.name, self.gid, self.members.join(","))
    }
}

/// Why a group entry sits in the lookaside cache
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Provenance {
    /// Fetched by `getent group`
    Direct,
    /// Fetched while `id` resolved this user's groups
    Member(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    /// Within the grace band around the timeout
    Doubtful,
    Expired,
}

#[derive(Debug, Clone)]
struct Stored {
    aliases: BTreeSet<String>,
    stored_at: Duration,
    provenance: BTreeSet<Provenance>,
    /// Aliases and provenance may include some the host already dropped
    doubtful: bool,
}

/// Lookaside cache state and resolution rules for one scenario
#[derive(Debug, Clone)]
pub struct CacheModel {
    directory: ResolvedDirectory,
    settings: CacheSettings,
    rules: NameRules,
    grace: Duration,
    running: bool,
    files_present: bool,
    /// Time since the scenario began
    clock: Duration,
    passwd: BTreeMap<String, Stored>,
    initgroups: BTreeMap<String, Duration>,
    groups: BTreeMap<String, Stored>,
}

impl CacheModel {
    pub fn new(directory: ResolvedDirectory, settings: CacheSettings, rules: NameRules) -> Self {
        Self {
            directory,
            settings,
            rules,
            grace: EXPIRY_GRACE,
            running: false,
            files_present: false,
            clock: Duration::ZERO,
            passwd: BTreeMap::new(),
            initgroups: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The daemon creates new, empty cache files whenever it starts
    pub fn start(&mut self) {
        self.clear();
        self.running = true;
        self.files_present = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Move the clock to `elapsed`; it never goes backwards
    pub fn advance_to(&mut self, elapsed: Duration) {
        self.clock = self.clock.max(elapsed);
    }

    pub fn remove_cache_files(&mut self) {
        self.clear();
        self.files_present = false;
    }

    pub fn invalidate(&mut self, scope: &InvalidationScope) {
        match scope {
            InvalidationScope::User(name) => {
                if let Some(name) = self.rules.canonical(name) {
                    self.forget_user(&name);
                }
            }
            InvalidationScope::Group(name) => {
                if let Some(name) = self.rules.canonical(name) {
                    self.groups.remove(&name);
                }
            }
            InvalidationScope::AllUsers => {
                self.passwd.clear();
                self.initgroups.clear();
                self.groups.retain(|_, stored| {
                    stored.provenance.retain(|p| *p == Provenance::Direct);
                    !stored.provenance.is_empty()
                });
            }
            InvalidationScope::AllGroups => self.groups.clear(),
            InvalidationScope::Everything => self.clear(),
        }
    }

    /// Cache file names `ls` must show, sorted
    pub fn cache_files(&self) -> Vec<String> {
        if !self.files_present {
            return Vec::new();
        }
        let mut files: Vec<String> = CacheCategory::ALL
            .iter()
            .filter(|c| self.settings.enabled(**c))
            .map(|c| c.file_name().to_string())
            .collect();
        files.sort();
        files
    }

    /// Expected result of `id KEY`
    pub fn id(&mut self, key: &str) -> Expected<UserRecord> {
        let key = LookupKey::parse(key);
        if self.running {
            let Some(user) = self.resolve_user(&key) else {
                return Expected::NotFound;
            };
            let groups = self.directory.membership(&user);
            let group_names: Vec<String> =
                self.directory.groups_of(&user).map(|g| g.name.clone()).collect();

            self.store_user(&user, &key);
            if self.settings.enabled(CacheCategory::Initgroups) {
                self.initgroups.insert(user.name.clone(), self.clock);
            }
            for group in group_names {
                self.store_group(&group, None, Provenance::Member(user.name.clone()));
            }
            Expected::Found(self.record(&user, Some(groups)))
        } else {
            let Some((user, certain)) = self.cached_user(&key) else {
                return Expected::NotFound;
            };
            let groups = self
                .initgroups
                .get(&user.name)
                .filter(|stored_at| self.freshness(**stored_at) == Freshness::Fresh)
                .map(|_| self.directory.membership(&user));
            expected(self.record(&user, groups), certain)
        }
    }

    /// Expected result of `getent passwd KEY`
    pub fn getent_passwd(&mut self, key: &str) -> Expected<UserRecord> {
        let key = LookupKey::parse(key);
        if self.running {
            let Some(user) = self.resolve_user(&key) else {
                return Expected::NotFound;
            };
            self.store_user(&user, &key);
            Expected::Found(self.record(&user, None))
        } else {
            match self.cached_user(&key) {
                Some((user, certain)) => expected(self.record(&user, None), certain),
                None => Expected::NotFound,
            }
        }
    }

    /// Expected result of `getent group KEY`
    pub fn getent_group(&mut self, key: &str) -> Expected<GroupRecord> {
        let key = LookupKey::parse(key);
        let (group, certain) = if self.running {
            let Some(group) = self.resolve_group(&key) else {
                return Expected::NotFound;
            };
            let alias = match &key {
                LookupKey::Name(name) => Some(name.as_str()),
                LookupKey::Id(_) => None,
            };
            self.store_group(&group.name, alias, Provenance::Direct);
            (group, true)
        } else {
            match self.cached_group(&key) {
                Some(cached) => cached,
                None => return Expected::NotFound,
            }
        };
        let record = GroupRecord {
            name: self.rules.display(&group.name),
            gid: group.gid,
            members: group.members.iter().map(|m| self.rules.display(m)).collect(),
        };
        expected(record, certain)
    }

    /// Expected outcome of a password login over SSH.
    ///
    /// The login looks the user up, so a resolvable user lands in the
    /// passwd cache; only an accepted login also stores its groups.
    pub fn ssh_login(&mut self, user: &str, password: &str) -> bool {
        if !self.running {
            return false;
        }
        let key = LookupKey::Name(user.to_string());
        let Some(found) = self.resolve_user(&key) else {
            return false;
        };
        self.store_user(&found, &key);
        let accepted = found.password == password;
        if accepted && self.settings.enabled(CacheCategory::Initgroups) {
            self.initgroups.insert(found.name.clone(), self.clock);
        }
        accepted
    }

    pub fn kinit(&self, user: &str, password: &str) -> bool {
        self.running
            && self
                .resolve_user(&LookupKey::Name(user.to_string()))
                .is_some_and(|found| found.password == password)
    }

    /// Queries that cover every entity by name and by id
    pub fn verification_queries(&self) -> Vec<Query> {
        let mut queries = Vec::new();
        for user in &self.directory.users {
            let name = self.rules.display(&user.name);
            let uid = user.uid.to_string();
            queries.push(Query::Id(name.clone()));
            queries.push(Query::Id(uid.clone()));
            queries.push(Query::Passwd(name));
            queries.push(Query::Passwd(uid));
        }
        for group in &self.directory.groups {
            queries.push(Query::Group(self.rules.display(&group.name)));
            queries.push(Query::Group(group.gid.to_string()));
        }
        queries
    }

    fn clear(&mut self) {
        self.passwd.clear();
        self.initgroups.clear();
        self.groups.clear();
    }

    fn record(&self, user: &DirectoryUser, groups: Option<Vec<u32>>) -> UserRecord {
        UserRecord {
            name: self.rules.display(&user.name),
            uid: user.uid,
            gid: user.gid,
            groups,
        }
    }

    fn freshness(&self, stored_at: Duration) -> Freshness {
        let timeout = Duration::from_secs(u64::from(self.settings.timeout));
        let age = self.clock.saturating_sub(stored_at);
        if age + self.grace < timeout {
            Freshness::Fresh
        } else if age >= timeout + self.grace {
            Freshness::Expired
        } else {
            Freshness::Doubtful
        }
    }

    /// Whether a hit on `stored` is certain on the host
    fn certain(&self, stored: &Stored) -> bool {
        !stored.doubtful && self.freshness(stored.stored_at) == Freshness::Fresh
    }

    fn resolve_user(&self, key: &LookupKey) -> Option<DirectoryUser> {
        match key {
            LookupKey::Id(uid) => self.directory.user_by_uid(*uid),
            LookupKey::Name(name) => {
                self.rules.canonical(name).and_then(|n| self.directory.user(&n))
            }
        }
        .cloned()
    }

    fn resolve_group(&self, key: &LookupKey) -> Option<DirectoryGroup> {
        match key {
            LookupKey::Id(gid) => self.directory.group_by_gid(*gid),
            LookupKey::Name(name) => {
                self.rules.canonical(name).and_then(|n| self.directory.group(&n))
            }
        }
        .cloned()
    }

    fn cached_user(&self, key: &LookupKey) -> Option<(DirectoryUser, bool)> {
        let (name, stored) = self
            .passwd
            .iter()
            .filter(|(_, stored)| self.freshness(stored.stored_at) != Freshness::Expired)
            .find(|(name, stored)| match key {
                LookupKey::Name(query) => stored.aliases.contains(query),
                LookupKey::Id(uid) => self.directory.user(name).is_some_and(|u| u.uid == *uid),
            })?;
        let user = self.directory.user(name)?.clone();
        Some((user, self.certain(stored)))
    }

    fn cached_group(&self, key: &LookupKey) -> Option<(DirectoryGroup, bool)> {
        let (name, stored) = self
            .groups
            .iter()
            .filter(|(_, stored)| self.freshness(stored.stored_at) != Freshness::Expired)
            .find(|(name, stored)| match key {
                LookupKey::Name(query) => stored.aliases.contains(query),
                LookupKey::Id(gid) => self.directory.group(name).is_some_and(|g| g.gid == *gid),
            })?;
        let group = self.directory.group(name)?.clone();
        Some((group, self.certain(stored)))
    }

    /// Carry over aliases and provenance of an entry that has not expired
    fn refreshed(&self, existing: Option<&Stored>) -> Stored {
        let fresh = Stored {
            aliases: BTreeSet::new(),
            stored_at: self.clock,
            provenance: BTreeSet::new(),
            doubtful: false,
        };
        let Some(existing) = existing else {
            return fresh;
        };
        match self.freshness(existing.stored_at) {
            Freshness::Expired => fresh,
            freshness => Stored {
                stored_at: self.clock,
                doubtful: existing.doubtful || freshness == Freshness::Doubtful,
                ..existing.clone()
            },
        }
    }

    fn store_user(&mut self, user: &DirectoryUser, key: &LookupKey) {
        if !self.settings.enabled(CacheCategory::Passwd) {
            return;
        }
        let mut stored = self.refreshed(self.passwd.get(&user.name));
        stored.aliases.insert(self.rules.display(&user.name));
        if let LookupKey::Name(query) = key {
            stored.aliases.insert(query.clone());
        }
        self.passwd.insert(user.name.clone(), stored);
    }

    fn store_group(&mut self, name: &str, alias: Option<&str>, source: Provenance) {
        if !self.settings.enabled(CacheCategory::Group) {
            return;
        }
        let mut stored = self.refreshed(self.groups.get(name));
        stored.aliases.insert(self.rules.display(name));
        stored.aliases.extend(alias.map(str::to_string));
        stored.provenance.insert(source);
        self.groups.insert(name.to_string(), stored);
    }

    fn forget_user(&mut self, name: &str) {
        self.passwd.remove(name);
        self.initgroups.remove(name);
        let source = Provenance::Member(name.to_string());
        self.groups.retain(|_, stored| {
            stored.provenance.remove(&source);
            !stored.provenance.is_empty()
        });
    }
}

fn expected<T>(value: T, certain: bool) -> Expected<T> {
    if certain { Expected::Found(value) } else { Expected::Either(value) }
}

/// A single lookup issued by a `verify` step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Id(String),
    Passwd(String),
    Group(String),
}
