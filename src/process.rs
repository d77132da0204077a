use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Builds a command for an external tool: no console window on Windows,
/// UTF-8 output from Python tools, and the child dies with its handle.
pub fn command<S: AsRef<OsStr>>(program: S) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    /// The token fired first; the child has been killed and reaped.
    Cancelled,
}

/// Waits for `child` to exit, or kills it as soon as `cancel` fires.
pub async fn wait_cancellable(child: &mut Child, cancel: &CancellationToken) -> io::Result<WaitOutcome> {
    tokio::select! {
        status = child.wait() => status.map(WaitOutcome::Exited),
        _ = cancel.cancelled() => {
            terminate(child).await;
            Ok(WaitOutcome::Cancelled)
        }
    }
}

/// Kills `child` and waits for it so no zombie is left behind.
pub async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("Failed to kill child process: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn shell(script: &str) -> Child {
        command("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn reports_exit_status() {
        let token = CancellationToken::new();

        let mut ok = shell("exit 0");
        match wait_cancellable(&mut ok, &token).await.unwrap() {
            WaitOutcome::Exited(status) => assert!(status.success()),
            other => panic!("unexpected {other:?}"),
        }

        let mut failing = shell("exit 3");
        match wait_cancellable(&mut failing, &token).await.unwrap() {
            WaitOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_a_running_child_promptly() {
        let token = CancellationToken::new();
        let mut child = shell("sleep 30");

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = wait_cancellable(&mut child, &token).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        // Already reaped: a second wait returns the recorded status immediately.
        assert!(!child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_waits_for_exit() {
        let token = CancellationToken::new();
        token.cancel();
        let mut child = shell("sleep 30");

        let started = Instant::now();
        let outcome = wait_cancellable(&mut child, &token).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
