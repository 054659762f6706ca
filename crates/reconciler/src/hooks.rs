//! Lifecycle hooks.
//!
//! Hooks are user-supplied executables. Each run spawns one process and the
//! caller waits for it to exit; only the exit status and stdout matter.
//!
//! The three hooks deliberately fail differently:
//!
//! - `converge_to` is retried until it produces a number,
//! - `take` failing is fatal,
//! - `release` failing is reported back so the ticket can be skipped.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spawner_broker::ResourcePayload;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::HookPaths;
use crate::error::{Error, Result};

/// Exit status and captured stdout of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Raw stdout.
    pub stdout: Vec<u8>,
}

impl CommandOutput {
    /// Output of a process that exited normally.
    pub fn exited(code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
        }
    }

    /// Whether the process exited with status 0.
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    fn describe_status(&self) -> String {
        self.code.map_or_else(
            || "killed by signal".to_string(),
            |code| format!("exit status {code}"),
        )
    }
}

/// Capability to run an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait for it to exit.
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// Runs hooks as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Runner without a time bound.
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Runner that kills hooks still running after `timeout`.
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!(hook = %program.display(), ?args, "Running hook");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::hook_spawn(program.display().to_string(), e.to_string()))?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    Error::hook_timeout(program.display().to_string(), timeout_ms)
                })?,
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|e| {
            Error::hook_spawn(
                program.display().to_string(),
                format!("failed to wait for hook: {e}"),
            )
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
        })
    }
}

/// Invokes the configured lifecycle hooks.
#[derive(Clone)]
pub struct HookRunner {
    runner: Arc<dyn CommandRunner>,
    hooks: HookPaths,
}

impl HookRunner {
    /// Create a hook runner.
    pub fn new(runner: Arc<dyn CommandRunner>, hooks: HookPaths) -> Self {
        Self { runner, hooks }
    }

    /// Hook runner backed by real processes.
    pub fn with_processes(hooks: HookPaths, timeout: Option<Duration>) -> Self {
        let runner = timeout.map_or_else(ProcessRunner::new, ProcessRunner::with_timeout);
        Self::new(Arc::new(runner), hooks)
    }

    /// Hook locations.
    pub const fn hooks(&self) -> &HookPaths {
        &self.hooks
    }

    /// Ask the converge-to hook how many resources should exist.
    ///
    /// Retries immediately and indefinitely until the hook exits 0 with an
    /// integer on stdout. Only a hook that cannot be spawned is an error.
    pub async fn converge_to(&self) -> Result<i64> {
        let mut attempt = 0u64;

        loop {
            attempt = attempt.saturating_add(1);

            match self.runner.run(&self.hooks.converge_to, &[]).await {
                Ok(output) => match parse_desired(&output) {
                    Some(desired) => {
                        debug!(desired, attempt, "Desired count");
                        return Ok(desired);
                    }
                    None => debug!(
                        attempt,
                        status = %output.describe_status(),
                        stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                        "Failing to run converge-to hook"
                    ),
                },
                Err(e @ Error::HookTimeout { .. }) => {
                    debug!(attempt, error = %e, "Failing to run converge-to hook");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Provision a resource with the take hook.
    ///
    /// A nonzero exit is returned as [`Error::ProvisionFailed`].
    pub async fn take(&self, payload: &ResourcePayload) -> Result<()> {
        let output = self
            .runner
            .run(&self.hooks.take, &[payload.to_string()])
            .await?;

        if output.success() {
            info!(%payload, "Resource taken");
            Ok(())
        } else {
            Err(Error::provision_failed(
                payload.as_str(),
                output.describe_status(),
            ))
        }
    }

    /// Deprovision a resource with the release hook.
    ///
    /// Returns `false` when the hook failed or timed out.
    pub async fn release(&self, payload: &ResourcePayload) -> Result<bool> {
        match self
            .runner
            .run(&self.hooks.release, &[payload.to_string()])
            .await
        {
            Ok(output) if output.success() => Ok(true),
            Ok(output) => {
                debug!(%payload, status = %output.describe_status(), "Release hook failed");
                Ok(false)
            }
            Err(e @ Error::HookTimeout { .. }) => {
                warn!(%payload, error = %e, "Release hook timed out");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Desired count from converge-to output, if the run counts as successful.
fn parse_desired(output: &CommandOutput) -> Option<i64> {
    if !output.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
