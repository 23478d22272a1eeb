//! Local process execution used by the AWS CLI provider and the SSH shell.
//!
//! Everything that leaves the process goes through [`CommandRunner`] so that
//! tests can script outcomes without spawning binaries.

use std::ffi::OsString;
use std::io::Write;
use std::process::{Command, Stdio};

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit code for messages, using `unknown` when the process
    /// was terminated without one.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when a process cannot be driven at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when writing to the child's standard input fails.
    #[error("failed to write input to {program}: {message}")]
    Input {
        /// Command whose input stream rejected the write.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// When `input` is present it is written to the child's standard input,
    /// which is then closed. Without input the stream is closed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] if the command cannot be started or fed.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<CommandOutput, ProcessError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    envs: Vec<(String, String)>,
}

impl ProcessCommandRunner {
    /// Creates a runner that inherits the parent environment unchanged.
    #[must_use]
    pub const fn new() -> Self {
        Self { envs: Vec::new() }
    }

    /// Adds an environment variable to every spawned child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<CommandOutput, ProcessError> {
        let mut child = Command::new(program)
            .args(args)
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        // Dropping the handle closes stdin whether or not input was written.
        if let Some(mut stdin) = child.stdin.take()
            && let Some(payload) = input
        {
            stdin
                .write_all(payload.as_bytes())
                .and_then(|()| stdin.flush())
                .map_err(|err| ProcessError::Input {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
        }

        let output = child
            .wait_with_output()
            .map_err(|err| ProcessError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is unset the input is returned unchanged.
///
/// # Examples
///
/// ```
/// # use hangar::process::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/deploy.pem"), format!("{home}/.ssh/deploy.pem"));
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
