//! Built-in scenarios covering the lookaside cache lifecycle, lookups,
//! authentication and configuration handling.

use super::scenario::{CacheSettings, DomainOptions, Scenario, Step};
use crate::nss::{Directory, GroupSpec, InvalidationScope, UserSpec};

fn id(key: impl ToString) -> Step {
    Step::LookupUser { key: key.to_string() }
}

fn group(key: impl ToString) -> Step {
    Step::LookupGroup { key: key.to_string() }
}

fn passwd(key: impl ToString) -> Step {
    Step::GetentPasswd { key: key.to_string() }
}

fn expire(scope: InvalidationScope) -> Step {
    Step::Invalidate { scope }
}

fn expire_user(name: &str) -> Step {
    expire(InvalidationScope::User(name.to_string()))
}

fn user(name: &str, uid: u32, gid: u32) -> UserSpec {
    UserSpec::new(name).with_uid(uid).with_gid(gid)
}

fn check_option(section: &str, key: &str, value: Option<&str>) -> Step {
    Step::CheckConfig {
        section: section.to_string(),
        key: key.to_string(),
        value: value.map(str::to_string),
    }
}

fn set_option(section: &str, key: &str, value: &str) -> Step {
    Step::SetOption {
        section: section.to_string(),
        key: key.to_string(),
        value: Some(value.to_string()),
    }
}

fn three_users() -> Directory {
    Directory::new()
        .user(UserSpec::new("user1").with_uid(10001))
        .user(UserSpec::new("user2").with_uid(10002))
        .user(UserSpec::new("user3").with_uid(10003))
}

fn three_groups() -> Directory {
    Directory::new()
        .group(GroupSpec::new("group1").with_gid(10001))
        .group(GroupSpec::new("group2").with_gid(10002))
        .group(GroupSpec::new("group3").with_gid(10003))
}

/// Two users sharing group2; user1 alone in group1
fn shared_membership() -> Directory {
    Directory::new()
        .user(user("user1", 123456, 110011))
        .user(user("user2", 220022, 222222))
        .group(GroupSpec::new("group1").with_gid(101010).with_members(&["user1"]))
        .group(GroupSpec::new("group2").with_gid(202020).with_members(&["user1", "user2"]))
}

fn nested_membership() -> Directory {
    three_users()
        .group(GroupSpec::new("group1").with_gid(1001).with_members(&["user1"]))
        .group(GroupSpec::new("group2").with_gid(1002).with_members(&["user1", "user2"]))
        .group(GroupSpec::new("group3").with_gid(1003).with_members(&["user1", "user2", "user3"]))
}

fn cache(passwd: u32, group: u32, initgroups: u32) -> CacheSettings {
    CacheSettings {
        passwd_size: passwd,
        group_size: group,
        initgroups_size: initgroups,
        ..CacheSettings::default()
    }
}

fn lookups_after_stop(keys: &[&str], lookup: fn(&str) -> Step) -> Vec<Step> {
    let mut steps = vec![Step::Start];
    steps.extend(keys.iter().map(|k| lookup(k)));
    steps.push(Step::Stop);
    steps.extend(keys.iter().map(|k| lookup(k)));
    steps
}

fn getpwnam() -> Scenario {
    Scenario::new("memcache_getpwnam", "users resolve from the lookaside cache after stop")
        .with_directory(three_users())
        .steps(lookups_after_stop(&["user1", "user2", "user3"], |k| id(k)))
        .steps([id(10001), id(10002), id(10003), passwd("user2")])
}

fn getgrnam() -> Scenario {
    Scenario::new("memcache_getgrnam", "groups resolve from the lookaside cache after stop")
        .with_directory(three_groups())
        .steps(lookups_after_stop(&["group1", "group2", "group3"], |k| group(k)))
        .steps([group(10001), group(10002), group(10003)])
}

fn disabled_passwd_getgrnam() -> Scenario {
    Scenario::new(
        "memcache_disabled_passwd_getgrnam",
        "a disabled passwd cache leaves groups cached",
    )
        .with_cache(cache(0, 6, 10))
        .with_directory(three_groups())
        .steps(lookups_after_stop(&["group1", "group2", "group3"], |k| group(k)))
        .steps([group(10001), group(10003), Step::CheckCacheFiles])
}

fn disabled_passwd_getpwnam() -> Scenario {
    Scenario::new(
        "memcache_disabled_passwd_getpwnam",
        "users are not cached with a disabled passwd cache",
    )
        .with_cache(cache(0, 6, 10))
        .with_directory(three_users())
        .steps(lookups_after_stop(&["user1", "user2", "user3"], |k| id(k)))
        .steps([id(10001), id(10002), id(10003), Step::CheckCacheFiles])
}

fn disabled_initgroups_getgrnam() -> Scenario {
    Scenario::new(
        "memcache_disabled_initgroups_getgrnam",
        "a disabled initgroups cache leaves groups cached",
    )
        .with_cache(cache(8, 6, 0))
        .with_directory(three_groups())
        .steps(lookups_after_stop(&["group1", "group2", "group3"], |k| group(k)))
        .steps([group(10002), Step::CheckCacheFiles])
}

fn disabled_initgroups_getpwnam() -> Scenario {
    Scenario::new(
        "memcache_disabled_initgroups_getpwnam",
        "a disabled initgroups cache leaves users cached",
    )
        .with_cache(cache(8, 6, 0))
        .with_directory(three_users())
        .steps(lookups_after_stop(&["user1", "user2", "user3"], |k| id(k)))
        .steps([id(10001), id(10002), id(10003), passwd("user1"), passwd(10003)])
}

fn disabled_group() -> Scenario {
    Scenario::new("memcache_disabled_group", "groups are not cached with a disabled group cache")
        .with_cache(cache(8, 0, 10))
        .with_directory(
            three_users()
                .group(GroupSpec::new("group1").with_gid(1111).with_members(&["user1"]))
                .group(
                    GroupSpec::new("group2")
                        .with_gid(2222)
                        .with_members(&["user1", "user2", "user3"]),
                ),
        )
        .steps([
            Step::Start,
            id("user1"),
            id("user2"),
            id("user3"),
            group("group1"),
            group("group2"),
            Step::Stop,
            id("user1"),
            id("user2"),
            id(10003),
            group("group1"),
            group(1111),
            group("group2"),
            group(2222),
            Step::CheckCacheFiles,
        ])
}

fn disabled_cache() -> Scenario {
    Scenario::new(
        "memcache_disabled_cache",
        "nothing resolves after stop with every category disabled",
    )
        .with_cache(cache(0, 0, 0))
        .with_directory(
            three_users()
                .group(GroupSpec::new("group1").with_gid(1111).with_members(&["user1"]))
                .group(
                    GroupSpec::new("group2")
                        .with_gid(2222)
                        .with_members(&["user1", "user2", "user3"]),
                ),
        )
        .steps([Step::Start, Step::Verify, Step::Stop, Step::Verify, Step::CheckCacheFiles])
}

fn membership_by_group_name() -> Scenario {
    Scenario::new("memcache_membership_by_group_name", "cached initgroups keep memberships by name")
        .with_directory(nested_membership())
        .steps(lookups_after_stop(&["user1", "user2", "user3"], |k| id(k)))
        .steps([group("group1"), group("group3")])
}

fn membership_by_group_id() -> Scenario {
    Scenario::new("memcache_membership_by_group_id", "cached initgroups keep memberships by id")
        .with_directory(nested_membership())
        .steps(lookups_after_stop(&["10001", "10002", "10003"], |k| id(k)))
        .steps([group(1001), group(1002), group(1003)])
}

fn user_gids() -> Scenario {
    Scenario::new("memcache_user_gids", "primary and supplementary gids survive stop")
        .with_directory(
            Directory::new()
                .user(user("user1", 2001, 101))
                .user(user("user2", 2002, 102))
                .user(user("user3", 2003, 103))
                .group(GroupSpec::new("group1").with_gid(1001).with_members(&["user1", "user2"]))
                .group(GroupSpec::new("group2").with_gid(1002).with_members(&["user2", "user3"])),
        )
        .steps(lookups_after_stop(&["user1", "user2", "user3"], |k| id(k)))
        .steps([id(2001), id(2002), id(2003)])
}

fn fully_qualified_names() -> Scenario {
    Scenario::new(
        "memcache_fully_qualified_names",
        "only qualified names resolve, before and after stop",
    )
        .with_domain(DomainOptions {
            fully_qualified_names: true,
            ..DomainOptions::default()
        })
        .with_directory(
            three_users()
                .group(GroupSpec::new("group1").with_gid(1001).with_members(&["user1", "user2"])),
        )
        .steps([
            Step::Start,
            id("user1"),
            id("user1@test"),
            id("user2@test"),
            id("user3@test"),
            group("group1@test"),
            Step::Stop,
            id("user1"),
            id("user1@test"),
            id("user2@test"),
            id(10003),
            group("group1@test"),
            group("group1"),
        ])
}

fn case_insensitive() -> Scenario {
    Scenario::new(
        "memcache_case_insensitive",
        "spellings of a case-insensitive name share one entry",
    )
        .with_domain(DomainOptions {
            case_sensitive: false,
            ..DomainOptions::default()
        })
        .with_directory(
            Directory::new()
                .user(user("user1", 10001, 2001))
                .group(GroupSpec::new("group1").with_gid(1001).with_members(&["user1"])),
        )
        .steps([
            Step::Start,
            id("uSer1"),
            id("useR1"),
            id("uSER1"),
            group("GROUP1"),
            Step::Stop,
            id("uSER1"),
            id(10001),
            id("USER1"),
            group("GROUP1"),
            group(1001),
        ])
}

fn fq_case_insensitive() -> Scenario {
    Scenario::new(
        "memcache_fq_names_case_insensitive",
        "qualified names in any case resolve after stop",
    )
        .with_domain(DomainOptions {
            fully_qualified_names: true,
            case_sensitive: false,
            ..DomainOptions::default()
        })
        .with_directory(
            Directory::new()
                .user(user("user1", 10001, 10100))
                .user(user("user2", 10002, 10200))
                .user(user("user3", 10003, 10300))
                .group(GroupSpec::new("group1").with_gid(20001).with_members(&["user1"]))
                .group(GroupSpec::new("group2").with_gid(20002).with_members(&["user2"]))
                .group(GroupSpec::new("group3").with_gid(20003).with_members(&["user3"])),
        )
        .steps([
            Step::Start,
            id("User1@TesT"),
            id("uSer2@TeSt"),
            id("USER3@TEST"),
            group("GrOuP1@tEsT"),
            Step::Stop,
            id("User1@TesT"),
            id("uSer2@TeSt"),
            id("USER3@TEST"),
            id("user1"),
            group("GrOuP1@tEsT"),
            group(20001),
        ])
}

fn invalidation_of_gids_after_initgroups() -> Scenario {
    Scenario::new(
        "memcache_invalidation_of_gids_after_initgroups",
        "groups fetched directly stay cached next to initgroups",
    )
    .with_directory(
        Directory::new()
            .user(user("user1", 10001, 1234))
            .user(user("user2", 10002, 102))
            .group(GroupSpec::new("group1").with_gid(12345).with_members(&["user1"]))
            .group(GroupSpec::new("group2").with_gid(1002).with_members(&["user2"])),
    )
    .steps([
        Step::Start,
        id("user1"),
        id(10001),
        group("group1"),
        group("group2"),
        Step::Stop,
        id("user1"),
        id(10001),
        group("group2"),
        group(1002),
        group(1234),
        group(12345),
        group("group1"),
    ])
}

fn initgroups_without_change_in_membership() -> Scenario {
    let round = || [id("user1"), id(10001), group("group1"), group(12345)];
    Scenario::new(
        "memcache_initgroups_without_change_in_membership",
        "full invalidation while running does not change memberships",
    )
    .with_directory(
        Directory::new()
            .user(user("user1", 10001, 111))
            .group(GroupSpec::new("group1").with_gid(12345).with_members(&["user1"])),
    )
    .step(Step::Start)
    .steps(round())
    .step(expire(InvalidationScope::Everything))
    .steps(round())
    .step(Step::Stop)
    .steps(round())
}

/// Lookups that must all miss once user1 (and possibly user2) are invalidated
fn users_gone(both: bool) -> Vec<Step> {
    let mut steps = vec![
        id("user1"),
        id(123456),
        group("group1"),
        group(110011),
        group("group2"),
        group(202020),
    ];
    if both {
        steps.extend([id("user2"), id(220022), group(222222)]);
    }
    steps
}

fn invalidate_user(before_stop: bool) -> Scenario {
    let (name, order) = if before_stop {
        ("memcache_invalidate_user_before_stop", [expire_user("user1"), Step::Stop])
    } else {
        ("memcache_invalidate_user_after_stop", [Step::Stop, expire_user("user1")])
    };
    Scenario::new(name, "an invalidated user and its groups miss after stop")
        .with_directory(shared_membership())
        .steps([Step::Start, id("user1")])
        .steps(order)
        .steps(users_gone(false))
}

fn invalidate_users(before_stop: bool) -> Scenario {
    let expire_all = || expire(InvalidationScope::AllUsers);
    let (name, order) = if before_stop {
        ("memcache_invalidate_users_before_stop", [expire_all(), Step::Stop])
    } else {
        ("memcache_invalidate_users_after_stop", [Step::Stop, expire_all()])
    };
    Scenario::new(name, "invalidated users and their groups miss after stop")
        .with_directory(shared_membership())
        .steps([Step::Start, id("user1"), id("user2")])
        .steps(order)
        .steps(users_gone(true))
}

fn invalidate_group(before_stop: bool) -> Scenario {
    let expire_group = || expire(InvalidationScope::Group("group1".to_string()));
    let (name, order) = if before_stop {
        ("memcache_invalidate_group_before_stop", [expire_group(), Step::Stop])
    } else {
        ("memcache_invalidate_group_after_stop", [Step::Stop, expire_group()])
    };
    Scenario::new(name, "an invalidated group misses after stop")
        .with_directory(Directory::new().group(GroupSpec::new("group1").with_gid(101010)))
        .steps([Step::Start, group("group1")])
        .steps(order)
        .steps([group("group1"), group(101010)])
}

fn invalidate_groups(before_stop: bool) -> Scenario {
    let expire_all = || expire(InvalidationScope::AllGroups);
    let (name, order) = if before_stop {
        ("memcache_invalidate_groups_before_stop", [expire_all(), Step::Stop])
    } else {
        ("memcache_invalidate_groups_after_stop", [Step::Stop, expire_all()])
    };
    Scenario::new(name, "invalidated groups miss after stop")
        .with_directory(
            Directory::new()
                .group(GroupSpec::new("group1").with_gid(101010))
                .group(GroupSpec::new("group2").with_gid(202020)),
        )
        .steps([Step::Start, group("group1"), group("group2")])
        .steps(order)
        .steps([group("group1"), group(101010), group("group2"), group(202020)])
}

fn invalidate_everything(before_stop: bool) -> Scenario {
    let expire_all = || expire(InvalidationScope::Everything);
    let (name, order) = if before_stop {
        ("memcache_invalidate_everything_before_stop", [expire_all(), Step::Stop])
    } else {
        ("memcache_invalidate_everything_after_stop", [Step::Stop, expire_all()])
    };
    Scenario::new(name, "nothing resolves after invalidating every category")
        .with_directory(shared_membership())
        .steps([Step::Start, id("user1"), id("user2"), group("group1"), group("group2")])
        .steps(order)
        .steps(users_gone(true))
}

fn single_user_and_group() -> Directory {
    Directory::new()
        .user(UserSpec::new("user1").with_uid(123456))
        .group(GroupSpec::new("group1").with_gid(10001))
}

fn memcache_timeout_zero() -> Scenario {
    Scenario::new(
        "memcache_timeout_zero",
        "no cache files and no cached entries with a zero timeout",
    )
        .with_cache(CacheSettings {
            timeout: 0,
            ..CacheSettings::default()
        })
        .with_directory(single_user_and_group())
        .steps([
            Step::Start,
            Step::CheckCacheFiles,
            id("user1"),
            group("group1"),
            Step::Stop,
            id("user1"),
            id(123456),
            group("group1"),
            group(10001),
        ])
}

fn memcache_timeout_expiry() -> Scenario {
    Scenario::new(
        "memcache_timeout_expiry",
        "entries stop answering once memcache_timeout has passed",
    )
        .with_cache(CacheSettings {
            timeout: 3,
            ..CacheSettings::default()
        })
        .with_directory(single_user_and_group())
        .steps([
            Step::Start,
            id("user1"),
            group("group1"),
            Step::Stop,
            id("user1"),
            Step::Wait { seconds: 5 },
            id("user1"),
            id(123456),
            group("group1"),
        ])
}

fn removed_cache_without_invalidation() -> Scenario {
    Scenario::new(
        "memcache_removed_cache_without_invalidation",
        "deleting the cache files while stopped drops every entry",
    )
    .with_directory(single_user_and_group())
    .steps([
        Step::Start,
        id("user1"),
        group("group1"),
        Step::Stop,
        Step::RemoveCacheFiles,
        id("user1"),
        id(123456),
        group("group1"),
        group(10001),
        Step::CheckCacheFiles,
    ])
}

fn restart_recreates_cache() -> Scenario {
    Scenario::new(
        "memcache_restart_recreates_cache",
        "a restarted daemon starts from empty cache files and fills them again",
    )
    .with_directory(shared_membership())
    .steps([
        Step::Start,
        id("user1"),
        Step::Restart,
        Step::CheckCacheFiles,
        Step::Stop,
        id("user1"),
        group("group2"),
        Step::Start,
        id("user2"),
        Step::Stop,
        id("user2"),
        group("group2"),
        id("user1"),
    ])
}

fn id_lookups() -> Scenario {
    Scenario::new("id_lookups", "every user and group resolves by name and id")
        .with_directory(
            three_users()
                .group(GroupSpec::new("group1").with_gid(20001).with_members(&["user1"]))
                .group(GroupSpec::new("group2").with_gid(20002).with_members(&["user1", "user2"]))
                .group(
                    GroupSpec::new("group3")
                        .with_gid(20003)
                        .with_members(&["user1", "user2", "user3"]),
                ),
        )
        .steps([Step::Start, Step::Verify, id("missing"), group("missing"), passwd(99999)])
}

fn id_case_insensitive() -> Scenario {
    Scenario::new("id_case_insensitive", "names in any case resolve to the stored spelling")
        .with_domain(DomainOptions {
            case_sensitive: false,
            ..DomainOptions::default()
        })
        .with_directory(
            Directory::new()
                .user(user("user1", 10001, 101))
                .user(user("user2", 10002, 102))
                .group(GroupSpec::new("group1").with_gid(1001).with_members(&["user1"]))
                .group(GroupSpec::new("group2").with_gid(1002).with_members(&["user1", "user2"])),
        )
        .steps([
            Step::Start,
            id("USER1"),
            id("uSeR2"),
            passwd("User1"),
            group("GROUP1"),
            group("gRoUp2"),
        ])
}

fn id_fq_case_insensitive() -> Scenario {
    Scenario::new("id_fq_case_insensitive", "qualified names in any case resolve")
        .with_domain(DomainOptions {
            fully_qualified_names: true,
            case_sensitive: false,
            ..DomainOptions::default()
        })
        .with_directory(
            Directory::new()
                .user(user("user1", 10001, 101))
                .user(user("user2", 10002, 102))
                .group(GroupSpec::new("group1").with_gid(1001).with_members(&["user1", "user2"])),
        )
        .steps([
            Step::Start,
            id("USER1@TEST"),
            id("user2@Test"),
            id("user2"),
            passwd("uSer1@tEsT"),
            group("Group1@TEST"),
        ])
}

fn ssh_password_login() -> Scenario {
    Scenario::new("ssh_password_login", "password logins succeed only with the right password")
        .with_directory(
            Directory::new().user(UserSpec::new("user1").with_uid(10001).with_password("123456")),
        )
        .steps([
            Step::Start,
            Step::SshLogin {
                user: "user1".to_string(),
                password: "123456".to_string(),
            },
            Step::SshLogin {
                user: "user1".to_string(),
                password: "bad_password".to_string(),
            },
            Step::SshLogin {
                user: "missing".to_string(),
                password: "123456".to_string(),
            },
            Step::Stop,
            id("user1"),
        ])
}

fn kinit() -> Scenario {
    Scenario::new("kinit", "a ticket is granted only for the right password")
        .with_domain(DomainOptions {
            cache_credentials: true,
            ..DomainOptions::default()
        })
        .with_directory(
            Directory::new()
                .user(UserSpec::new("user1").with_uid(10001).with_password("Secret123")),
        )
        .steps([
            Step::Start,
            Step::Kinit {
                user: "user1".to_string(),
                password: "Secret123".to_string(),
            },
            Step::Kinit {
                user: "user1".to_string(),
                password: "bad_password".to_string(),
            },
        ])
}

fn config_debug_level() -> Scenario {
    Scenario::new("config_debug_level", "changed debug levels are written to the configuration")
        .with_domain(DomainOptions {
            debug_level: Some(9),
            ..DomainOptions::default()
        })
        .steps([
            Step::Start,
            check_option("pam", "debug_level", Some("9")),
            check_option("nss", "debug_level", Some("9")),
            set_option("pam", "debug_level", "1"),
            set_option("nss", "debug_level", "1"),
            Step::Restart,
            check_option("pam", "debug_level", Some("1")),
            check_option("nss", "debug_level", Some("1")),
        ])
}

fn config_new_section() -> Scenario {
    Scenario::new("config_new_section", "sections are added and removed")
        .steps([
            Step::Start,
            set_option("new_section", "key", "value"),
            Step::Restart,
            check_option("new_section", "key", Some("value")),
            Step::RemoveSection {
                section: "new_section".to_string(),
            },
            Step::Restart,
            check_option("new_section", "key", None),
            Step::GenconfSection {
                section: "xf31deyz".to_string(),
            },
        ])
}

/// Every built-in scenario, in catalog order
pub fn all() -> Vec<Scenario> {
    vec![
        getpwnam(),
        getgrnam(),
        disabled_passwd_getgrnam(),
        disabled_passwd_getpwnam(),
        disabled_initgroups_getgrnam(),
        disabled_initgroups_getpwnam(),
        disabled_group(),
        disabled_cache(),
        membership_by_group_name(),
        membership_by_group_id(),
        user_gids(),
        fully_qualified_names(),
        case_insensitive(),
        fq_case_insensitive(),
        invalidation_of_gids_after_initgroups(),
        initgroups_without_change_in_membership(),
        invalidate_user(true),
        invalidate_user(false),
        invalidate_users(true),
        invalidate_users(false),
        invalidate_group(true),
        invalidate_group(false),
        invalidate_groups(true),
        invalidate_groups(false),
        invalidate_everything(true),
        invalidate_everything(false),
        memcache_timeout_zero(),
        memcache_timeout_expiry(),
        removed_cache_without_invalidation(),
        restart_recreates_cache(),
        id_lookups(),
        id_case_insensitive(),
        id_fq_case_insensitive(),
        ssh_password_login(),
        kinit(),
        config_debug_level(),
        config_new_section(),
    ]
}

pub fn find(name: &str) -> Option<Scenario> {
    all().into_iter().find(|s| s.name == name)
}
