//! Typed access to the identity daemon's command line surface

pub mod auth;
pub mod daemon;
pub mod names;
pub mod parse;
pub mod provider;
pub mod sssctl;
pub mod tools;
pub mod types;

// Re-export commonly used items
pub use auth::Auth;
pub use daemon::{Daemon, SssdConfig};
pub use names::NameRules;
pub use provider::{Directory, GroupSpec, LdapConnection, LdapProvider, ResolvedDirectory, UserSpec};
pub use sssctl::{InvalidationScope, Sssctl};
pub use tools::Tools;
pub use types::{CacheCategory, GroupEntry, IdEntry, LookupKey, PasswdEntry};
