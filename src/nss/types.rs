use serde::{Deserialize, Serialize};
use std::fmt;

/// Key used to look up a user or group: a name or a numeric id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Name(String),
    Id(u32),
}

impl LookupKey {
    /// Interpret a string the way `id` and `getent` do: all digits means an id
    pub fn parse(key: &str) -> Self {
        match key.parse::<u32>() {
            Ok(id) if !key.starts_with('+') => LookupKey::Id(id),
            _ => LookupKey::Name(key.to_string()),
        }
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Name(name) => write!(f, "{}", name),
            LookupKey::Id(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for LookupKey {
    fn from(key: &str) -> Self {
        LookupKey::parse(key)
    }
}

impl From<u32> for LookupKey {
    fn from(id: u32) -> Self {
        LookupKey::Id(id)
    }
}

/// A numeric id with the name `id` printed next to it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub id: u32,
    pub name: Option<String>,
}

impl NameId {
    pub fn new(id: u32, name: Option<&str>) -> Self {
        Self {
            id,
            name: name.map(str::to_string),
        }
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}({})", self.id, name),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Group reference accepted by [`IdEntry::memberof`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    Name(String),
    Id(u32),
}

impl From<&str> for GroupRef {
    fn from(name: &str) -> Self {
        GroupRef::Name(name.to_string())
    }
}

impl From<u32> for GroupRef {
    fn from(gid: u32) -> Self {
        GroupRef::Id(gid)
    }
}

/// Parsed output of `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdEntry {
    pub user: NameId,
    pub group: NameId,
    pub groups: Vec<NameId>,
}

impl IdEntry {
    /// True if the user is a member of every listed group
    pub fn memberof<G: Into<GroupRef> + Clone>(&self, groups: &[G]) -> bool {
        groups.iter().cloned().map(Into::into).all(|group| {
            self.groups.iter().any(|member| match &group {
                GroupRef::Id(gid) => member.id == *gid,
                GroupRef::Name(name) => member.name.as_deref() == Some(name.as_str()),
            })
        })
    }

    /// Sorted, deduplicated gids of all groups including the primary one
    pub fn gids(&self) -> Vec<u32> {
        let mut gids: Vec<u32> = self
            .groups
            .iter()
            .map(|g| g.id)
            .chain(std::iter::once(self.group.id))
            .collect();
        gids.sort_unstable();
        gids.dedup();
        gids
    }
}

/// One line of `getent passwd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

/// One line of `getent group`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub password: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// The three independently sized lookaside cache categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    Passwd,
    Group,
    Initgroups,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [
        CacheCategory::Passwd,
        CacheCategory::Group,
        CacheCategory::Initgroups,
    ];

    /// `[nss]` option holding this category's size
    pub fn size_option(&self) -> &'static str {
        match self {
            CacheCategory::Passwd => "memcache_size_passwd",
            CacheCategory::Group => "memcache_size_group",
            CacheCategory::Initgroups => "memcache_size_initgroups",
        }
    }

    /// Name of the cache file the daemon keeps for this category
    pub fn file_name(&self) -> &'static str {
        match self {
            CacheCategory::Passwd => "passwd",
            CacheCategory::Group => "group",
            CacheCategory::Initgroups => "initgroups",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}
