//! Backing directory: users, groups and memberships the daemon serves

use crate::error::{HarnessError, HarnessResult};
use crate::system::CommandExecutor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{info, warn};

const FIRST_UID: u32 = 10001;
const FIRST_GID: u32 = 20001;
pub const DEFAULT_PASSWORD: &str = "Secret123";

/// LDAP result code for "entry already exists"
const LDAP_ALREADY_EXISTS: i32 = 68;
/// LDAP result code for "no such object"
const LDAP_NO_SUCH_OBJECT: i32 = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Primary gid; defaults to the uid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl UserSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

impl GroupSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    pub fn with_members(mut self, members: &[&str]) -> Self {
        self.members = members.iter().map(|m| m.to_string()).collect();
        self
    }
}

/// Directory content as declared by a scenario; ids may be left out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: UserSpec) -> Self {
        self.users.push(user);
        self
    }

    pub fn group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }

    /// Validate names and memberships and assign every missing id
    pub fn materialize(&self) -> HarnessResult<ResolvedDirectory> {
        let mut names = HashSet::new();
        for name in self.users.iter().map(|u| &u.name) {
            validate_name(name)?;
            if !names.insert(name.as_str()) {
                let reason = format!("duplicate user '{}'", name);
                return Err(HarnessError::config_error("directory", &reason));
            }
        }
        let mut group_names = HashSet::new();
        for group in &self.groups {
            validate_name(&group.name)?;
            if !group_names.insert(group.name.as_str()) {
                return Err(HarnessError::config_error(
                    "directory",
                    &format!("duplicate group '{}'", group.name),
                ));
            }
            if let Some(member) = group.members.iter().find(|m| !names.contains(m.as_str())) {
                return Err(HarnessError::config_error(
                    "directory",
                    &format!("group '{}' lists unknown member '{}'", group.name, member),
                ));
            }
        }

        let mut used_uids: HashSet<u32> = HashSet::new();
        for uid in self.users.iter().filter_map(|u| u.uid) {
            if !used_uids.insert(uid) {
                let reason = format!("duplicate uid {}", uid);
                return Err(HarnessError::config_error("directory", &reason));
            }
        }
        let mut next_uid = FIRST_UID;
        let users: Vec<DirectoryUser> = self
            .users
            .iter()
            .map(|spec| {
                let uid = spec.uid.unwrap_or_else(|| {
                    while used_uids.contains(&next_uid) {
                        next_uid += 1;
                    }
                    used_uids.insert(next_uid);
                    next_uid
                });
                DirectoryUser {
                    name: spec.name.clone(),
                    uid,
                    gid: spec.gid.unwrap_or(uid),
                    password: spec.password.clone().unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
                }
            })
            .collect();

        let mut used_gids: HashSet<u32> = HashSet::new();
        for gid in self.groups.iter().filter_map(|g| g.gid) {
            if !used_gids.insert(gid) {
                let reason = format!("duplicate gid {}", gid);
                return Err(HarnessError::config_error("directory", &reason));
            }
        }
        // Auto-assigned gids must not turn into somebody's primary group
        let reserved: HashSet<u32> = users.iter().map(|u| u.gid).collect();
        let mut next_gid = FIRST_GID;
        let groups = self
            .groups
            .iter()
            .map(|spec| {
                let gid = spec.gid.unwrap_or_else(|| {
                    while used_gids.contains(&next_gid) || reserved.contains(&next_gid) {
                        next_gid += 1;
                    }
                    used_gids.insert(next_gid);
                    next_gid
                });
                DirectoryGroup {
                    name: spec.name.clone(),
                    gid,
                    members: spec.members.clone(),
                }
            })
            .collect();

        Ok(ResolvedDirectory { users, groups })
    }
}

fn validate_name(name: &str) -> HarnessResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !name.chars().any(|c| c.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(HarnessError::config_error(
            "directory",
            &format!("invalid name '{}': use lowercase letters, digits, '.', '_' or '-'", name),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Directory with every id assigned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDirectory {
    pub users: Vec<DirectoryUser>,
    pub groups: Vec<DirectoryGroup>,
}

impl ResolvedDirectory {
    pub fn user(&self, name: &str) -> Option<&DirectoryUser> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<&DirectoryUser> {
        self.users.iter().find(|u| u.uid == uid)
    }

    pub fn group(&self, name: &str) -> Option<&DirectoryGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn group_by_gid(&self, gid: u32) -> Option<&DirectoryGroup> {
        self.groups.iter().find(|g| g.gid == gid)
    }

    /// Group objects the user belongs to, as primary group or as member
    pub fn groups_of<'a>(
        &'a self,
        user: &'a DirectoryUser,
    ) -> impl Iterator<Item = &'a DirectoryGroup> {
        self.groups
            .iter()
            .filter(move |g| g.gid == user.gid || g.members.iter().any(|m| *m == user.name))
    }

    /// Sorted gids `id` reports for the user: primary gid plus supplementary groups
    pub fn membership(&self, user: &DirectoryUser) -> Vec<u32> {
        let mut gids: Vec<u32> = self
            .groups_of(user)
            .map(|g| g.gid)
            .chain(std::iter::once(user.gid))
            .collect();
        gids.sort_unstable();
        gids.dedup();
        gids
    }

    /// Render the directory as LDIF below `base_dn`
    pub fn to_ldif(&self, base_dn: &str) -> String {
        let mut ldif = String::new();
        for ou in ["users", "groups"] {
            let _ = writeln!(
                ldif,
                "dn: ou={ou},{base_dn}\nobjectClass: top\n\
                 objectClass: organizationalUnit\nou: {ou}\n"
            );
        }
        for user in &self.users {
            let _ = writeln!(
                ldif,
                "dn: uid={name},ou=users,{base_dn}\nobjectClass: top\n\
                 objectClass: account\nobjectClass: posixAccount\n\
                 cn: {name}\nuid: {name}\nuidNumber: {uid}\ngidNumber: {gid}\n\
                 homeDirectory: /home/{name}\n\
                 loginShell: /bin/bash\nuserPassword: {password}\n",
                name = user.name,
                uid = user.uid,
                gid = user.gid,
                password = user.password,
            );
        }
        for group in &self.groups {
            let _ = write!(
                ldif,
                "dn: cn={name},ou=groups,{base_dn}\nobjectClass: top\n\
                 objectClass: posixGroup\ncn: {name}\ngidNumber: {gid}\n",
                name = group.name,
                gid = group.gid,
            );
            for member in &group.members {
                let _ = writeln!(ldif, "memberUid: {}", member);
            }
            ldif.push('\n');
        }
        ldif
    }

    /// Build a directory from `posixAccount`/`posixGroup` LDIF records
    pub fn from_ldif(ldif: &str) -> HarnessResult<Self> {
        let mut directory = ResolvedDirectory::default();

        for text in ldif.split("\n\n").map(str::trim).filter(|r| !r.is_empty()) {
            let record = LdifRecord::parse(text)?;
            let classes = record.values("objectClass");

            if classes.iter().any(|c| c.eq_ignore_ascii_case("posixAccount")) {
                directory.users.push(DirectoryUser {
                    name: record.single("uid")?.to_string(),
                    uid: record.number("uidNumber")?,
                    gid: record.number("gidNumber")?,
                    password: record
                        .values("userPassword")
                        .first()
                        .map(|p| p.to_string())
                        .unwrap_or_default(),
                });
            } else if classes.iter().any(|c| c.eq_ignore_ascii_case("posixGroup")) {
                directory.groups.push(DirectoryGroup {
                    name: record.single("cn")?.to_string(),
                    gid: record.number("gidNumber")?,
                    members: record.values("memberUid").into_iter().map(str::to_string).collect(),
                });
            }
        }

        Ok(directory)
    }
}

/// One LDIF entry as attribute/value pairs
struct LdifRecord<'a> {
    text: &'a str,
    attrs: Vec<(&'a str, &'a str)>,
}

impl<'a> LdifRecord<'a> {
    fn parse(text: &'a str) -> HarnessResult<Self> {
        let attrs = text
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| {
                l.split_once(':')
                    .map(|(k, v)| (k.trim(), v.trim()))
                    .ok_or_else(|| {
                        HarnessError::parse_error("LDIF", l, "expected attribute: value")
                    })
            })
            .collect::<HarnessResult<Vec<_>>>()?;
        Ok(Self { text, attrs })
    }

    fn values(&self, name: &str) -> Vec<&'a str> {
        self.attrs
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
            .collect()
    }

    fn single(&self, name: &str) -> HarnessResult<&'a str> {
        self.values(name)
            .first()
            .copied()
            .ok_or_else(|| {
                HarnessError::parse_error("LDIF", self.text, &format!("missing {}", name))
            })
    }

    fn number(&self, name: &str) -> HarnessResult<u32> {
        let raw = self.single(name)?;
        raw.parse()
            .map_err(|_| HarnessError::parse_error("LDIF", raw, &format!("invalid {}", name)))
    }
}

/// Connection parameters of the LDAP server backing the domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapConnection {
    pub uri: String,
    pub base_dn: String,
    pub bind_dn: String,
    pub bind_password: String,
}

/// Populates and clears the LDAP directory with the OpenLDAP client tools
pub struct LdapProvider<'a, E: CommandExecutor> {
    executor: &'a E,
    connection: LdapConnection,
    timeout: Duration,
}

impl<'a, E: CommandExecutor> LdapProvider<'a, E> {
    pub fn new(executor: &'a E, connection: LdapConnection, timeout: Duration) -> Self {
        Self {
            executor,
            connection,
            timeout,
        }
    }

    fn auth_args(&self) -> Vec<&str> {
        vec![
            "-x",
            "-H",
            self.connection.uri.as_str(),
            "-D",
            self.connection.bind_dn.as_str(),
            "-w",
            self.connection.bind_password.as_str(),
        ]
    }

    pub async fn populate(&self, directory: &ResolvedDirectory) -> HarnessResult<()> {
        let ldif = directory.to_ldif(&self.connection.base_dn);
        let mut args = vec!["-c"];
        args.extend(self.auth_args());
        info!(
            users = directory.users.len(),
            groups = directory.groups.len(),
            "populating directory"
        );

        let add = self.executor.execute_with_input("ldapadd", &args, &ldif);
        let output = tokio::time::timeout(self.timeout, add)
            .await
            .map_err(|_| HarnessError::timeout_error("ldapadd", self.timeout))??;
        match output.status {
            0 => Ok(()),
            // Leftover OUs from an earlier run
            LDAP_ALREADY_EXISTS => {
                warn!("some directory entries already existed");
                Ok(())
            }
            status => Err(HarnessError::provider_error(
                "populate",
                &format!("ldapadd exited with {}: {}", status, output.stderr.trim()),
            )),
        }
    }

    /// Remove every entry created by [`LdapProvider::populate`]
    pub async fn clear(&self) -> HarnessResult<()> {
        let users_ou = format!("ou=users,{}", self.connection.base_dn);
        let groups_ou = format!("ou=groups,{}", self.connection.base_dn);
        let mut args = vec!["-r"];
        args.extend(self.auth_args());
        args.push(users_ou.as_str());
        args.push(groups_ou.as_str());

        let output = self
            .executor
            .execute_with_timeout("ldapdelete", &args, self.timeout)
            .await?;
        match output.status {
            0 | LDAP_NO_SUCH_OBJECT => Ok(()),
            status => Err(HarnessError::provider_error(
                "clear",
                &format!("ldapdelete exited with {}: {}", status, output.stderr.trim()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Directory {
        Directory::new()
            .user(UserSpec::new("user1").with_uid(123456).with_gid(110011))
            .user(UserSpec::new("user2"))
            .user(UserSpec::new("user3").with_uid(10001))
            .group(GroupSpec::new("group1").with_gid(101010).with_members(&["user1"]))
            .group(GroupSpec::new("group2").with_members(&["user1", "user2"]))
    }

    #[test]
    fn test_materialize_assigns_free_ids() {
        let directory = sample().materialize().unwrap();

        assert_eq!(directory.user("user1").unwrap().gid, 110011);
        // 10001 is taken explicitly by user3
        assert_eq!(directory.user("user2").unwrap().uid, 10002);
        assert_eq!(directory.user("user2").unwrap().gid, 10002);
        assert_eq!(directory.group("group2").unwrap().gid, FIRST_GID);
        assert_eq!(directory.user("user2").unwrap().password, DEFAULT_PASSWORD);
    }

    #[test]
    fn test_materialize_skips_primary_gids() {
        let directory = Directory::new()
            .user(UserSpec::new("user1").with_uid(1).with_gid(FIRST_GID))
            .group(GroupSpec::new("group1"))
            .materialize()
            .unwrap();
        assert_eq!(directory.group("group1").unwrap().gid, FIRST_GID + 1);
    }

    #[test]
    fn test_materialize_rejects_bad_input() {
        let duplicate = Directory::new()
            .user(UserSpec::new("user1"))
            .user(UserSpec::new("user1"));
        assert!(duplicate.materialize().is_err());

        let unknown_member =
            Directory::new().group(GroupSpec::new("group1").with_members(&["ghost"]));
        assert!(unknown_member.materialize().is_err());

        let duplicate_uid = Directory::new()
            .user(UserSpec::new("user1").with_uid(5))
            .user(UserSpec::new("user2").with_uid(5));
        assert!(duplicate_uid.materialize().is_err());

        let upper = Directory::new().user(UserSpec::new("User1"));
        assert!(upper.materialize().is_err());
    }

    #[test]
    fn test_membership_includes_primary_gid() {
        let directory = sample().materialize().unwrap();
        let user1 = directory.user("user1").unwrap();
        assert_eq!(directory.membership(user1), vec![20001, 101010, 110011]);

        let user3 = directory.user("user3").unwrap();
        assert_eq!(directory.membership(user3), vec![10001]);
    }

    #[test]
    fn test_ldif_contains_posix_entries() {
        let ldif = sample().materialize().unwrap().to_ldif("dc=test");
        assert!(ldif.contains("dn: uid=user1,ou=users,dc=test"));
        assert!(ldif.contains("uidNumber: 123456"));
        assert!(ldif.contains("dn: cn=group2,ou=groups,dc=test"));
        assert!(ldif.contains("memberUid: user2"));
    }

    #[test]
    fn test_ldif_is_read_back() {
        let directory = sample().materialize().unwrap();
        let parsed = ResolvedDirectory::from_ldif(&directory.to_ldif("dc=test")).unwrap();
        assert_eq!(parsed, directory);
    }

    #[test]
    fn test_from_ldif_rejects_missing_numbers() {
        let ldif = "dn: uid=x,ou=users,dc=test\nobjectClass: posixAccount\nuid: x\n";
        assert!(ResolvedDirectory::from_ldif(ldif).is_err());
    }
}
