use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time;
use tracing::debug;

/// Exit status and captured streams of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or -1 when the process was killed by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Return stdout when the command succeeded, an `UnexpectedExit` error otherwise
    pub fn into_checked(self, command: &str, args: &[&str]) -> HarnessResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(HarnessError::unexpected_exit(
                command,
                args,
                self.status,
                &self.stderr,
            ))
        }
    }
}

/// Abstraction for command execution on the host under test.
///
/// A non-zero exit status is reported through [`CommandOutput`], not as an
/// error: "not found" is an ordinary outcome for `id` and `getent`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, args: &[&str]) -> HarnessResult<CommandOutput>;

    /// Execute with `input` written to the command's stdin
    async fn execute_with_input(
        &self,
        command: &str,
        args: &[&str],
        input: &str,
    ) -> HarnessResult<CommandOutput>;

    async fn execute_with_timeout(
        &self,
        command: &str,
        args: &[&str],
        timeout_duration: Duration,
    ) -> HarnessResult<CommandOutput> {
        match time::timeout(timeout_duration, self.execute(command, args)).await {
            Ok(output) => output,
            Err(_) => Err(HarnessError::timeout_error(
                &format!("{} {}", command, redacted_args(command, args).join(" ")),
                timeout_duration,
            )),
        }
    }

    /// Human readable description of where commands run
    fn describe(&self) -> String;

    /// True when commands run on the machine executing the harness
    fn is_local(&self) -> bool {
        false
    }
}

/// Value masking a password in logs and error messages
pub const REDACTED: &str = "***";

/// Flag whose value is a password, per program
fn secret_flag(command: &str) -> Option<&'static str> {
    match command {
        "sshpass" => Some("-p"),
        "ldapadd" | "ldapdelete" => Some("-w"),
        _ => None,
    }
}

/// `args` as they may be logged, with password values masked
pub fn redacted_args(command: &str, args: &[&str]) -> Vec<String> {
    let flag = secret_flag(command);
    let mut secret_next = false;
    args.iter()
        .map(|arg| {
            let shown = if secret_next { REDACTED } else { *arg };
            secret_next = flag == Some(*arg);
            shown.to_string()
        })
        .collect()
}

/// Run `program args`; errors name it as `shown` so no password leaks
async fn run_process(
    program: &str,
    args: &[String],
    input: Option<&str>,
    shown: &[String],
) -> HarnessResult<CommandOutput> {
    let shown: Vec<&str> = shown.iter().map(String::as_str).collect();
    let spawn_error =
        |e: std::io::Error| HarnessError::command_error(program, &shown, &e.to_string());

    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(input.as_bytes()).await.map_err(spawn_error)?;
        // Closing stdin lets the child see end of input.
        drop(stdin);
    }

    let output = child.wait_with_output().await.map_err(spawn_error)?;
    let stdout = String::from_utf8(output.stdout)
        .map_err(|e| HarnessError::command_error(program, &shown, &e.to_string()))?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Runs commands on the local machine
pub struct LocalCommandExecutor;

#[async_trait]
impl CommandExecutor for LocalCommandExecutor {
    async fn execute(&self, command: &str, args: &[&str]) -> HarnessResult<CommandOutput> {
        let shown = redacted_args(command, args);
        debug!(command, args = ?shown, "local exec");
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        run_process(command, &args, None, &shown).await
    }

    async fn execute_with_input(
        &self,
        command: &str,
        args: &[&str],
        input: &str,
    ) -> HarnessResult<CommandOutput> {
        let shown = redacted_args(command, args);
        debug!(command, args = ?shown, input_len = input.len(), "local exec with input");
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        run_process(command, &args, Some(input), &shown).await
    }

    fn describe(&self) -> String {
        "localhost".to_string()
    }

    fn is_local(&self) -> bool {
        true
    }
}

/// Runs commands on a remote host through the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshCommandExecutor {
    host: String,
    user: String,
    port: u16,
    identity_file: Option<String>,
    connect_timeout: Duration,
}

impl SshCommandExecutor {
    pub fn new(host: &str, user: &str) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            port: 22,
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity_file(mut self, path: Option<String>) -> Self {
        self.identity_file = path;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Arguments passed to `ssh` to run `command args...` remotely
    pub fn ssh_args(&self, command: &str, args: &[&str]) -> Vec<String> {
        let mut ssh_args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            ssh_args.push("-i".to_string());
            ssh_args.push(identity.clone());
        }
        ssh_args.push(format!("{}@{}", self.user, self.host));
        ssh_args.push("--".to_string());

        let remote = std::iter::once(command)
            .chain(args.iter().copied())
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        ssh_args.push(remote);
        ssh_args
    }

    /// How a remote command appears in logs and errors
    fn shown(&self, command: &str, args: &[&str]) -> Vec<String> {
        let mut shown = vec![format!("{}@{}", self.user, self.host), command.to_string()];
        shown.extend(redacted_args(command, args));
        shown
    }
}

#[async_trait]
impl CommandExecutor for SshCommandExecutor {
    async fn execute(&self, command: &str, args: &[&str]) -> HarnessResult<CommandOutput> {
        let shown = self.shown(command, args);
        debug!(host = %self.host, command, args = ?&shown[2..], "ssh exec");
        run_process("ssh", &self.ssh_args(command, args), None, &shown).await
    }

    async fn execute_with_input(
        &self,
        command: &str,
        args: &[&str],
        input: &str,
    ) -> HarnessResult<CommandOutput> {
        let shown = self.shown(command, args);
        let input_len = input.len();
        debug!(host = %self.host, command, args = ?&shown[2..], input_len, "ssh exec with input");
        run_process("ssh", &self.ssh_args(command, args), Some(input), &shown).await
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Quote a word for a POSIX shell so the remote side sees it verbatim
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain_words() {
        assert_eq!(shell_quote("sssctl"), "sssctl");
        assert_eq!(shell_quote("user1@test"), "user1@test");
        assert_eq!(shell_quote("--genconf-section=nss"), "--genconf-section=nss");
    }

    #[test]
    fn test_shell_quote_special_characters() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_ssh_args_layout() {
        let executor = SshCommandExecutor::new("client.test", "root")
            .with_port(2222)
            .with_identity_file(Some("/root/.ssh/id_ed25519".to_string()))
            .with_connect_timeout(Duration::from_secs(5));

        let args = executor.ssh_args("id", &["user one"]);
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"/root/.ssh/id_ed25519".to_string()));
        assert_eq!(args[args.len() - 3], "root@client.test");
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().unwrap(), "id 'user one'");
    }

    #[test]
    fn test_redacted_args_mask_passwords() {
        let login = ["-p", "Secret123", "ssh", "-l", "user1", "localhost", "true"];
        let shown = redacted_args("sshpass", &login);
        assert_eq!(shown[..3], ["-p", REDACTED, "ssh"]);
        assert!(!shown.iter().any(|arg| arg == "Secret123"));

        let bind = ["-x", "-D", "cn=admin", "-w", "hunter2", "ou=users"];
        assert_eq!(redacted_args("ldapdelete", &bind)[4], REDACTED);
        assert_eq!(redacted_args("ls", &["-p", "dir"]), vec!["-p", "dir"]);
    }

    #[tokio::test]
    async fn test_errors_hide_password() {
        // Times out when sshpass is installed, fails to spawn otherwise
        let executor = LocalCommandExecutor;
        let result = executor
            .execute_with_timeout("sshpass", &["-p", "Secret123", "sleep", "5"], Duration::ZERO)
            .await;
        let message = result.unwrap_err().to_string();
        assert!(!message.contains("Secret123"), "{}", message);
    }

    #[test]
    fn test_into_checked() {
        let ok = CommandOutput::new(0, "out", "");
        assert_eq!(ok.into_checked("true", &[]).unwrap(), "out");

        let failed = CommandOutput::new(3, "", "boom");
        let err = failed.into_checked("false", &["-x"]).unwrap_err();
        assert!(matches!(err, HarnessError::UnexpectedExit { status: 3, .. }));
    }

    #[tokio::test]
    async fn test_local_executor_reports_exit_status() {
        let executor = LocalCommandExecutor;
        let output = executor.execute("sh", &["-c", "echo hi; exit 4"]).await.unwrap();
        assert_eq!(output.status, 4);
        assert_eq!(output.stdout, "hi\n");
    }

    #[tokio::test]
    async fn test_local_executor_with_input() {
        let executor = LocalCommandExecutor;
        let output = executor
            .execute_with_input("cat", &[], "line1\nline2\n")
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "line1\nline2\n");
    }

    #[tokio::test]
    async fn test_local_executor_timeout() {
        let executor = LocalCommandExecutor;
        let result = executor
            .execute_with_timeout("sleep", &["5"], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(HarnessError::TimeoutError { .. })));
    }

    #[tokio::test]
    async fn test_local_executor_missing_program() {
        let executor = LocalCommandExecutor;
        let result = executor.execute("definitely-not-a-real-program-xyz", &[]).await;
        assert!(matches!(result, Err(HarnessError::CommandError { .. })));
    }
}
