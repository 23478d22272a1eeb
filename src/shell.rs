//! Remote shell capability and its implementation over the system `ssh`
//! client.
//!
//! Each [`RemoteShell::execute`] call runs one command in a fresh `ssh`
//! invocation. A [`Session`] only carries the connection parameters that were
//! proven to work by [`RemoteShell::connect`].

use std::ffi::OsString;

use thiserror::Error;

use crate::process::{CommandOutput, CommandRunner, ProcessError, expand_tilde};

/// Connection parameters for an authenticated shell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    /// Host name or address.
    pub host: String,
    /// Login user.
    pub user: String,
    /// Path of the private key used for authentication.
    pub identity_file: String,
}

/// One command to run remotely.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Command line passed to the remote shell.
    pub command: String,
    /// Data written to the command's standard input before it is closed.
    /// When absent the input stream is closed immediately.
    pub stdin: Option<String>,
}

impl RemoteCommand {
    /// Creates a command with no standard input.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
        }
    }

    /// Attaches standard input to the command.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Captured outcome of a remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutcome {
    /// Exit status reported by the remote command, when available.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutcome {
    /// Returns an outcome with exit status zero and no output.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Returns `true` when the exit status is zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

impl From<CommandOutput> for CommandOutcome {
    fn from(output: CommandOutput) -> Self {
        Self {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Errors raised by remote shells.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShellError {
    /// Authentication or transport setup failed.
    #[error("failed to connect to {user}@{host}: {message}")]
    Connection {
        /// Target host.
        host: String,
        /// Login user.
        user: String,
        /// Diagnostic from the transport.
        message: String,
    },
    /// The command could not be delivered to the host.
    #[error("failed to run command on {host}: {message}")]
    Transport {
        /// Target host.
        host: String,
        /// Diagnostic from the transport.
        message: String,
    },
}

/// Authenticated remote command execution.
///
/// Calls block the current thread until the remote side answers. The
/// configuration engine drives one host at a time and awaits nothing while a
/// call is in flight; callers that fan hosts out concurrently must move each
/// session onto `tokio::task::spawn_blocking` or a dedicated thread.
pub trait RemoteShell {
    /// Opens a session to `host` as `user` using the identity key at
    /// `identity_file`.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Connection`] when the host cannot be reached or
    /// rejects the key.
    fn connect(&self, host: &str, identity_file: &str, user: &str)
    -> Result<Session, ShellError>;

    /// Runs one command, feeding its standard input when requested.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Transport`] when the command cannot be started.
    /// A non-zero remote exit is reported through [`CommandOutcome`].
    fn execute(&self, session: &Session, command: &RemoteCommand)
    -> Result<CommandOutcome, ShellError>;

    /// Releases the session.
    fn close(&self, session: Session);
}

/// Settings for [`SshShell`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Seconds allowed for connection establishment.
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            connect_timeout_secs: 10,
        }
    }
}

const CONNECT_CHECK: &str = "true";

/// [`RemoteShell`] backed by the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshShell<R: CommandRunner> {
    settings: SshSettings,
    runner: R,
}

impl<R: CommandRunner> SshShell<R> {
    /// Creates a shell that spawns `ssh` through `runner`.
    #[must_use]
    pub const fn new(settings: SshSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    fn build_args(&self, session: &Session, command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-i"),
            OsString::from(expand_tilde(&session.identity_file)),
        ];
        for option in [
            String::from("BatchMode=yes"),
            String::from("StrictHostKeyChecking=no"),
            String::from("UserKnownHostsFile=/dev/null"),
            String::from("LogLevel=ERROR"),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
        ] {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }
        args.push(OsString::from(format!("{}@{}", session.user, session.host)));
        args.push(OsString::from(command));
        args
    }

    fn run(
        &self,
        session: &Session,
        command: &str,
        input: Option<&str>,
    ) -> Result<CommandOutput, ProcessError> {
        let args = self.build_args(session, command);
        self.runner.run(&self.settings.ssh_bin, &args, input)
    }
}

impl<R: CommandRunner> RemoteShell for SshShell<R> {
    fn connect(
        &self,
        host: &str,
        identity_file: &str,
        user: &str,
    ) -> Result<Session, ShellError> {
        let session = Session {
            host: host.to_owned(),
            user: user.to_owned(),
            identity_file: identity_file.to_owned(),
        };
        let connection_error = |message: String| ShellError::Connection {
            host: host.to_owned(),
            user: user.to_owned(),
            message,
        };

        let output = self
            .run(&session, CONNECT_CHECK, None)
            .map_err(|err| connection_error(err.to_string()))?;
        if !output.is_success() {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("ssh exited with status {}", output.status_text())
            } else {
                stderr.to_owned()
            };
            return Err(connection_error(message));
        }
        Ok(session)
    }

    fn execute(
        &self,
        session: &Session,
        command: &RemoteCommand,
    ) -> Result<CommandOutcome, ShellError> {
        self.run(session, &command.command, command.stdin.as_deref())
            .map(CommandOutcome::from)
            .map_err(|err| ShellError::Transport {
                host: session.host.clone(),
                message: err.to_string(),
            })
    }

    fn close(&self, session: Session) {
        drop(session);
    }
}
