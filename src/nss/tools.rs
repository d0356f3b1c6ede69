use super::parse::{parse_group_line, parse_id_output, parse_passwd_line};
use super::types::{GroupEntry, IdEntry, LookupKey, PasswdEntry};
use crate::error::{HarnessError, HarnessResult};
use crate::system::CommandExecutor;
use std::time::Duration;
use tracing::debug;

/// `id` exits with 1 for an unknown user
const ID_NOT_FOUND: i32 = 1;
/// `getent` exits with 2 when a key is not found in the database
const GETENT_NOT_FOUND: i32 = 2;

/// Name and id resolution through the host's NSS tools
pub struct Tools<'a, E: CommandExecutor> {
    executor: &'a E,
    timeout: Duration,
}

impl<'a, E: CommandExecutor> Tools<'a, E> {
    pub fn new(executor: &'a E, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Run `id KEY`; `None` when the user does not exist
    pub async fn id(&self, key: impl Into<LookupKey>) -> HarnessResult<Option<IdEntry>> {
        let key = key.into().to_string();
        let args = [key.as_str()];
        let output = self
            .executor
            .execute_with_timeout("id", &args, self.timeout)
            .await?;

        match output.status {
            0 => parse_id_output(&output.stdout).map(Some),
            ID_NOT_FOUND => {
                debug!(key = %key, "id: no such user");
                Ok(None)
            }
            status => Err(HarnessError::unexpected_exit("id", &args, status, &output.stderr)),
        }
    }

    /// Run `getent passwd KEY`
    pub async fn getent_passwd(
        &self,
        key: impl Into<LookupKey>,
    ) -> HarnessResult<Option<PasswdEntry>> {
        let key = key.into().to_string();
        match self.getent("passwd", &key).await? {
            Some(stdout) => parse_passwd_line(&stdout).map(Some),
            None => Ok(None),
        }
    }

    /// Run `getent group KEY`
    pub async fn getent_group(
        &self,
        key: impl Into<LookupKey>,
    ) -> HarnessResult<Option<GroupEntry>> {
        let key = key.into().to_string();
        match self.getent("group", &key).await? {
            Some(stdout) => parse_group_line(&stdout).map(Some),
            None => Ok(None),
        }
    }

    async fn getent(&self, database: &str, key: &str) -> HarnessResult<Option<String>> {
        let args = [database, key];
        let output = self
            .executor
            .execute_with_timeout("getent", &args, self.timeout)
            .await?;

        match output.status {
            0 => Ok(Some(output.stdout)),
            GETENT_NOT_FOUND => {
                debug!(database, key, "getent: not found");
                Ok(None)
            }
            status => Err(HarnessError::unexpected_exit(
                "getent",
                &args,
                status,
                &output.stderr,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::commands::CommandOutput;
    use async_trait::async_trait;

    /// Replies with one fixed output to every command
    struct FixedExecutor(CommandOutput);

    #[async_trait]
    impl CommandExecutor for FixedExecutor {
        async fn execute(&self, _command: &str, _args: &[&str]) -> HarnessResult<CommandOutput> {
            Ok(self.0.clone())
        }

        async fn execute_with_input(
            &self,
            command: &str,
            args: &[&str],
            _input: &str,
        ) -> HarnessResult<CommandOutput> {
            self.execute(command, args).await
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    fn tools(executor: &FixedExecutor) -> Tools<'_, FixedExecutor> {
        Tools::new(executor, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_id_found() {
        let executor = FixedExecutor(CommandOutput::new(
            0,
            "uid=1001(user1) gid=1001(user1) groups=1001(user1)\n",
            "",
        ));
        let entry = tools(&executor).id("user1").await.unwrap().unwrap();
        assert_eq!(entry.user.id, 1001);
    }

    #[tokio::test]
    async fn test_id_not_found_is_none() {
        let executor = FixedExecutor(CommandOutput::new(1, "", "id: 'user9': no such user\n"));
        assert!(tools(&executor).id("user9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_id_unexpected_status_is_error() {
        let executor = FixedExecutor(CommandOutput::new(126, "", "permission denied"));
        let result = tools(&executor).id(1001u32).await;
        assert!(matches!(result, Err(HarnessError::UnexpectedExit { status: 126, .. })));
    }

    #[tokio::test]
    async fn test_getent_group_found_and_missing() {
        let executor = FixedExecutor(CommandOutput::new(0, "group1:*:1001:user1\n", ""));
        let group = tools(&executor).getent_group(1001u32).await.unwrap().unwrap();
        assert_eq!(group.name, "group1");

        let executor = FixedExecutor(CommandOutput::new(2, "", ""));
        assert!(tools(&executor).getent_group("group1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_getent_passwd_bad_output_is_error() {
        let executor = FixedExecutor(CommandOutput::new(0, "garbage\n", ""));
        let result = tools(&executor).getent_passwd("user1").await;
        assert!(matches!(result, Err(HarnessError::InvalidFormat { .. })));
    }

    #[tokio::test]
    async fn test_getent_enumeration_unsupported_is_error() {
        let executor = FixedExecutor(CommandOutput::new(3, "", ""));
        assert!(tools(&executor).getent_passwd("user1").await.is_err());
    }
}
