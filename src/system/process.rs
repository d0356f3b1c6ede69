use crate::error::{HarnessError, HarnessResult};
use std::time::{Duration, Instant};
use tracing::debug;

/// Check whether a process with the given command name runs on this machine
pub fn daemon_running(comm: &str) -> HarnessResult<bool> {
    let processes = procfs::process::all_processes()
        .map_err(|e| HarnessError::daemon_error("inspect", &e.to_string()))?;

    for process in processes {
        // Processes can exit while we iterate
        let Ok(process) = process else { continue };
        let Ok(stat) = process.stat() else { continue };
        if stat.comm == comm {
            debug!(pid = stat.pid, comm, "found daemon process");
            return Ok(true);
        }
    }
    Ok(false)
}

/// Poll until no process named `comm` remains or `timeout` elapses
pub async fn wait_for_exit(comm: &str, timeout: Duration) -> HarnessResult<()> {
    let deadline = Instant::now() + timeout;
    while daemon_running(comm)? {
        if Instant::now() >= deadline {
            return Err(HarnessError::timeout_error(
                &format!("waiting for {} to exit", comm),
                timeout,
            ));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

/// Local daemon control and cache maintenance need root
pub fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_daemon_is_not_running() {
        assert!(!daemon_running("no-such-daemon-xyz").unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_exit_returns_immediately_when_absent() {
        wait_for_exit("no-such-daemon-xyz", Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[test]
    fn test_running_as_root_matches_uid() {
        let expected = nix::unistd::getuid().is_root() && nix::unistd::geteuid().is_root();
        if expected {
            assert!(running_as_root());
        }
    }
}
