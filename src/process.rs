// ABOUTME: Child-process spawning for pipe transports with piped stdin/stdout
// ABOUTME: Drains the child's stderr into the tracing log so it never blocks on a full pipe
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::config::PipeCommand;
use crate::types::TransportError;

/// A spawned child with its protocol streams taken out
pub(crate) struct PipedChild {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawn `command` with piped stdin/stdout and a stderr log drain
///
/// The child is killed when its handle is dropped.
///
/// # Errors
///
/// Returns a `Config` error for an empty program, or `TransportError` if the
/// process cannot be spawned or one of its standard streams is unavailable.
pub(crate) fn spawn_piped(command: &PipeCommand) -> Result<PipedChild, TransportError> {
    if command.program.as_os_str().is_empty() {
        return Err(TransportError::config("Pipe command has no program"));
    }

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &command.working_directory {
        cmd.current_dir(dir);
    }

    let program = command.program.display().to_string();
    let mut child = cmd.spawn().map_err(|e| {
        TransportError::io(format!("Failed to spawn pipe process {program}: {e}"))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::internal("Child stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::internal("Child stdout was not captured"))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(stderr, program.clone()));
    }

    debug!(program = %program, pid = child.id(), "Spawned pipe process");
    Ok(PipedChild {
        child,
        stdin,
        stdout,
    })
}

/// Forward each stderr line of the child to the debug log until EOF
async fn drain_stderr(stderr: ChildStderr, program: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(program = %program, "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn spawned_child_echoes_stdin() {
        let PipedChild {
            mut child,
            mut stdin,
            mut stdout,
        } = spawn_piped(&PipeCommand::new("cat")).expect("spawn cat");

        stdin.write_all(b"hello\n").await.expect("write");
        drop(stdin);

        let mut out = String::new();
        stdout.read_to_string(&mut out).await.expect("read");
        assert_eq!(out, "hello\n");
        child.wait().await.expect("wait");
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let err = spawn_piped(&PipeCommand::new("/nonexistent/mcplex-test-binary"))
            .err()
            .expect("spawn must fail");
        assert_eq!(err.kind, crate::types::ErrorKind::Io);
    }

    #[test]
    fn empty_program_is_config_error() {
        let err = spawn_piped(&PipeCommand::new(""))
            .err()
            .expect("spawn must fail");
        assert_eq!(err.kind, crate::types::ErrorKind::Config);
    }
}
