use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::repo::Repo;

pub const PRE_COMMIT: &str = "pre-commit";
pub const POST_COMMIT: &str = "post-commit";
pub const PRE_CHECKOUT: &str = "pre-checkout";
pub const POST_CHECKOUT: &str = "post-checkout";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run a pre-operation hook. A missing or non-executable hook is a silent
/// pass; non-zero exit aborts with `hook_rejected`; exceeding the timeout
/// kills the script and aborts with `timeout`.
pub fn run_pre_hook(
    repo: &Repo,
    name: &str,
    env: &[(&str, &str)],
    timeout_secs: u64,
) -> Result<()> {
    match run_hook(repo, name, env, timeout_secs)? {
        HookOutcome::Skipped | HookOutcome::Success => Ok(()),
        HookOutcome::Failed(message) => Err(Error::HookRejected {
            hook: name.to_string(),
            message,
        }),
        HookOutcome::TimedOut => Err(Error::Timeout(format!("{name} hook"))),
    }
}

/// Run a post-operation hook. Failures and timeouts are logged, never
/// propagated.
pub fn run_post_hook(repo: &Repo, name: &str, env: &[(&str, &str)], timeout_secs: u64) {
    match run_hook(repo, name, env, timeout_secs) {
        Ok(HookOutcome::Failed(message)) => warn!(hook = name, %message, "post hook failed"),
        Ok(HookOutcome::TimedOut) => warn!(hook = name, "post hook timed out, killed"),
        Ok(_) => {}
        Err(err) => warn!(hook = name, %err, "post hook could not run"),
    }
}

enum HookOutcome {
    Skipped,
    Success,
    Failed(String),
    TimedOut,
}

fn run_hook(repo: &Repo, name: &str, env: &[(&str, &str)], timeout_secs: u64) -> Result<HookOutcome> {
    let hook_path = repo.hooks_dir().join(name);
    if !is_executable(&hook_path) {
        return Ok(HookOutcome::Skipped);
    }

    debug!(hook = name, "running hook");
    let mut child = Command::new(&hook_path)
        .current_dir(repo.worktree())
        .env("DFM_REPO_PATH", repo.worktree())
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(HookOutcome::TimedOut);
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    };

    if status.success() {
        return Ok(HookOutcome::Success);
    }
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr);
    }
    let message = if stderr.trim().is_empty() {
        format!("exit code {}", status.code().unwrap_or(-1))
    } else {
        stderr.trim().to_string()
    };
    Ok(HookOutcome::Failed(message))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}
