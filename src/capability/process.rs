//! Process capability: allowlisted command execution with timeouts.
//!
//! An [`ProcessPermission`] grant names the commands (base names, not
//! paths) a snippet may launch. In strict mode a fixed set of
//! file-operation commands is blocked unconditionally -- even when
//! allowlisted -- so file access is forced through the filesystem
//! capability instead of `cat`/`cp`/`rm` and friends.
//!
//! Each launch drains child stdout and stderr on two helper threads (both
//! joined before return) and enforces a wall-clock timeout: on expiry the
//! child is killed and a runtime error naming the command and the timeout
//! is raised.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::CapabilityState;
use crate::error::{Result, SandboxError};

/// Default timeout for `exec_output` and unspecified `exec` timeouts.
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;

/// Poll interval while waiting for a child to finish.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Commands blocked in strict mode regardless of the allowlist: the
/// reading, listing, writing, copy/move, delete, directory, permission,
/// archive, link, and disk utilities that would bypass the filesystem
/// capability.
const STRICT_BLOCKED_COMMANDS: &[&str] = &[
    // reading
    "cat", "head", "tail", "less", "more", "tac", "nl",
    // listing
    "ls", "dir", "find", "locate", "tree", "file", "stat",
    // writing
    "touch", "tee", "truncate",
    // copy/move
    "cp", "mv", "rsync", "scp",
    // delete
    "rm", "rmdir", "unlink", "shred",
    // directory
    "mkdir", "cd", "pwd",
    // permission
    "chmod", "chown", "chgrp",
    // archive
    "tar", "zip", "unzip", "gzip", "gunzip", "bzip2",
    // link
    "ln", "readlink",
    // disk
    "dd", "df", "du",
];

/// Outcome of one completed process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code; -1 when the child was killed by a signal.
    pub exit_code: i32,

    /// Captured stdout, lossily decoded.
    pub stdout: String,

    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

/// A scoped process-execution capability.
#[derive(Debug, Clone)]
pub struct ProcessPermission {
    allowed: BTreeSet<String>,
    strict: bool,
    state: CapabilityState,
}

impl ProcessPermission {
    pub fn new(
        commands: impl IntoIterator<Item = String>,
        strict: bool,
        state: CapabilityState,
    ) -> Self {
        Self {
            allowed: commands.into_iter().collect(),
            strict,
            state,
        }
    }

    /// Checks a command against the allowlist and the strict-mode block
    /// set without launching anything.
    fn check_command(&self, command: &str) -> Result<()> {
        self.state.ensure_active()?;

        let base = Path::new(command)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.to_string());

        if !self.allowed.contains(&base) {
            return Err(SandboxError::security(format!(
                "command not in allowlist: {base}"
            )));
        }

        if self.strict && STRICT_BLOCKED_COMMANDS.contains(&base.as_str()) {
            return Err(SandboxError::security(format!(
                "strict mode blocks file-operation command: {base}; \
                 use the filesystem capability instead"
            )));
        }

        Ok(())
    }

    /// Launches `command` with `args`, waits up to `timeout_ms`, and
    /// returns the captured result.
    ///
    /// # Errors
    ///
    /// - Security error if the command is not allowlisted, or is in the
    ///   strict-mode block set. No process is started in either case.
    /// - [`SandboxError::Timeout`] if the child outlives the timeout; it
    ///   is forcibly terminated first.
    pub fn exec(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        timeout_ms: u64,
    ) -> Result<ProcessResult> {
        self.check_command(command)?;

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::io(PathBuf::from(command), e))?;

        // Drain both pipes concurrently so a chatty child cannot deadlock
        // against a full pipe buffer while we wait on the other stream.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_thread = thread::spawn(move || drain(stdout_pipe));
        let stderr_thread = thread::spawn(move || drain(stderr_pipe));

        let status = wait_with_timeout(&mut child, command, timeout_ms);

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        let status = status?;

        Ok(ProcessResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// Convenience wrapper: run with the default timeout, return stdout.
    pub fn exec_output(&self, command: &str, args: &[String]) -> Result<String> {
        self.exec(command, args, None, DEFAULT_EXEC_TIMEOUT_MS)
            .map(|result| result.stdout)
    }
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn wait_with_timeout(
    child: &mut Child,
    command: &str,
    timeout_ms: u64,
) -> Result<std::process::ExitStatus> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SandboxError::Timeout {
                        command: command.to_string(),
                        timeout_ms,
                    });
                }
                thread::sleep(WAIT_POLL_INTERVAL);
            }
            Err(e) => return Err(SandboxError::io(PathBuf::from(command), e)),
        }
    }
}
