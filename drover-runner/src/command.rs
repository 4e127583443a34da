// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Child command handles: the contract between the driver and whatever runs
//! an action, plus the local-process implementation.

use crate::errors::CommandError;
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use std::{
    fmt,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Notify,
};
use tracing::debug;

/// The lines a command produced on stdout and stderr.
pub type OutputLines = Vec<String>;

/// The future returned by [`Command::execute_later`]. The driver spawns it
/// onto the runtime so the child runs while the monitor listens.
pub type OutputFuture = BoxFuture<'static, Result<OutputLines, CommandError>>;

/// A to-be-run child command for one action.
///
/// `destroy` is idempotent and may race with the returned future: whichever
/// side observes the kill first wins, and the future then resolves with
/// [`CommandError::Killed`].
pub trait Command: Send + Sync {
    /// Starts the command, returning a future for its combined console
    /// output. The future must be driven to completion; the driver spawns it.
    fn execute_later(&self) -> OutputFuture;

    /// Terminates the child if it is still running. Idempotent; safe to call
    /// before, during and after execution.
    fn destroy(&self);
}

#[derive(Debug, Default)]
struct KillSignal {
    destroyed: AtomicBool,
    notify: Notify,
}

impl KillSignal {
    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    async fn killed(&self) {
        if self.is_destroyed() {
            return;
        }
        // notify_one stores a permit if no waiter is registered yet, so a
        // destroy between the check above and this await is not lost.
        self.notify.notified().await;
    }
}

/// A command that runs a local child process via `tokio::process`.
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<Utf8PathBuf>,
    kill: Arc<KillSignal>,
}

impl ProcessCommand {
    /// Creates a command for the given program and arguments.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
            env: Vec::new(),
            working_dir: None,
            kill: Arc::new(KillSignal::default()),
        }
    }

    /// Adds an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory for the child.
    pub fn working_dir(mut self, dir: Utf8PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

impl fmt::Debug for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Command for ProcessCommand {
    fn execute_later(&self) -> OutputFuture {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let kill = Arc::clone(&self.kill);
        let program = self.program.clone();

        Box::pin(async move {
            if kill.is_destroyed() {
                return Err(CommandError::Killed);
            }

            let mut child = command
                .spawn()
                .map_err(|error| CommandError::Spawn(Arc::new(error)))?;

            // Collect the two streams independently; ordering between stdout
            // and stderr is not preserved.
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let stdout_task = tokio::spawn(collect_lines(stdout));
            let stderr_task = tokio::spawn(collect_lines(stderr));

            let status = tokio::select! {
                res = child.wait() => res.map_err(|error| CommandError::Wait(Arc::new(error)))?,
                () = kill.killed() => {
                    debug!(program = %program, "destroying child process");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(CommandError::Killed);
                }
            };

            let mut output_lines = stdout_task.await.unwrap_or_default();
            output_lines.extend(stderr_task.await.unwrap_or_default());

            if status.success() {
                Ok(output_lines)
            } else {
                Err(CommandError::Failed {
                    output_lines,
                    exit_code: status.code(),
                })
            }
        })
    }

    fn destroy(&self) {
        self.kill.destroy();
    }
}

async fn collect_lines<R>(reader: Option<R>) -> Vec<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push(line);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_status() {
        let command = ProcessCommand::new(
            "sh",
            ["-c".to_owned(), "echo one; echo two >&2".to_owned()],
        );
        let lines = command.execute_later().await.expect("command succeeded");
        assert!(lines.contains(&"one".to_owned()));
        assert!(lines.contains(&"two".to_owned()));
    }

    #[tokio::test]
    async fn non_zero_exit_reports_failure_with_output() {
        let command = ProcessCommand::new("sh", ["-c".to_owned(), "echo boom; exit 3".to_owned()]);
        let error = command.execute_later().await.expect_err("command failed");
        match error {
            CommandError::Failed {
                output_lines,
                exit_code,
            } => {
                assert_eq!(output_lines, ["boom"]);
                assert_eq!(exit_code, Some(3));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_kills_the_child() {
        let command = Arc::new(ProcessCommand::new(
            "sh",
            ["-c".to_owned(), "sleep 30".to_owned()],
        ));
        let fut = tokio::spawn(command.execute_later());

        // Give the child a moment to start, then destroy twice.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        command.destroy();
        command.destroy();

        let res = fut.await.expect("output task not cancelled");
        assert!(matches!(res, Err(CommandError::Killed)));
    }

    #[tokio::test]
    async fn destroy_before_execute_short_circuits() {
        let command = ProcessCommand::new("sh", ["-c".to_owned(), "echo hi".to_owned()]);
        command.destroy();
        let res = command.execute_later().await;
        assert!(matches!(res, Err(CommandError::Killed)));
    }
}
