use crate::error::{HarnessError, HarnessResult};
use crate::system::CommandExecutor;
use crate::system::commands::redacted_args;
use std::time::Duration;
use tracing::debug;

/// sshpass exit status for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Authentication checks run on the client host
pub struct Auth<'a, E: CommandExecutor> {
    executor: &'a E,
    timeout: Duration,
}

impl<'a, E: CommandExecutor> Auth<'a, E> {
    pub fn new(executor: &'a E, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Log in as `user` over SSH to the client itself with a password
    pub async fn ssh_password(&self, user: &str, password: &str) -> HarnessResult<bool> {
        let args = [
            "-p",
            password,
            "ssh",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "PubkeyAuthentication=no",
            "-o",
            "NumberOfPasswordPrompts=1",
            "-l",
            user,
            "localhost",
            "true",
        ];
        let output = self
            .executor
            .execute_with_timeout("sshpass", &args, self.timeout)
            .await?;
        debug!(user, status = output.status, "ssh password login");

        // Anything else, ssh's 255 for a lost connection included, is a failure
        match output.status {
            0 => Ok(true),
            SSHPASS_BAD_PASSWORD => Ok(false),
            status => {
                let shown = redacted_args("sshpass", &args);
                let shown: Vec<&str> = shown.iter().map(String::as_str).collect();
                Err(HarnessError::unexpected_exit("sshpass", &shown, status, &output.stderr))
            }
        }
    }

    /// Obtain a Kerberos TGT for `user`, password passed on stdin
    pub async fn kinit(&self, user: &str, password: &str) -> HarnessResult<bool> {
        let args = [user];
        let output = tokio::time::timeout(
            self.timeout,
            self.executor
                .execute_with_input("kinit", &args, &format!("{}\n", password)),
        )
        .await
        .map_err(|_| HarnessError::timeout_error("kinit", self.timeout))??;
        debug!(user, status = output.status, "kinit");

        match output.status {
            0 => Ok(true),
            1 => Ok(false),
            status => Err(HarnessError::unexpected_exit("kinit", &args, status, &output.stderr)),
        }
    }
}
