//! Post-boot configuration of provisioned instances over a remote shell.
//!
//! Per instance, strictly in order: connect, update and upgrade, reboot,
//! reconnect, stage provider credentials and install tooling, run the
//! post-configuration script, shred the staged credentials, disconnect. The
//! shred step runs even when an earlier step on the reconnected session
//! failed.

use std::convert::Infallible;
use std::time::Instant;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::records::InstanceRecord;
use crate::redact::Redactor;
use crate::script::{
    DEFAULT_STDIN_MARKERS, REBOOT_COMMAND, ScriptContext, credential_staging_commands,
    filter_commands, shred_commands, tooling_commands, update_commands,
};
use crate::shell::{RemoteCommand, RemoteShell, Session, ShellError};
use crate::wait::{Poll, PollError, WaitPolicies, WaitTimeout, poll_until};

/// Inputs shared by every instance's configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigureSettings {
    /// Remote login user.
    pub ssh_user: String,
    /// Path of the identity key.
    pub identity_file: String,
    /// Contents of the operator's provider credentials file.
    pub credentials: String,
    /// Raw post-configuration script lines, comments included.
    pub post_config: Vec<String>,
    /// Substrings marking commands that read the admin password from stdin.
    pub stdin_markers: Vec<String>,
    /// Treat a non-zero remote exit as fatal instead of a warning.
    pub fail_on_command_error: bool,
}

impl ConfigureSettings {
    /// Creates settings with the default stdin markers and warn-only exit
    /// handling.
    #[must_use]
    pub fn new(
        ssh_user: impl Into<String>,
        identity_file: impl Into<String>,
        credentials: impl Into<String>,
        post_config: Vec<String>,
    ) -> Self {
        Self {
            ssh_user: ssh_user.into(),
            identity_file: identity_file.into(),
            credentials: credentials.into(),
            post_config,
            stdin_markers: DEFAULT_STDIN_MARKERS
                .iter()
                .map(|marker| (*marker).to_owned())
                .collect(),
            fail_on_command_error: false,
        }
    }
}

/// Errors raised while configuring an instance.
#[derive(Debug, Error)]
pub enum ConfigureError {
    /// The shell connection could not be opened.
    #[error("cannot connect to {instance}: {source}")]
    Connection {
        /// Instance name.
        instance: String,
        /// Transport error.
        #[source]
        source: ShellError,
    },
    /// A command could not be delivered.
    #[error("cannot run `{command}` on {instance}: {source}")]
    Transport {
        /// Instance name.
        instance: String,
        /// Redacted command text.
        command: String,
        /// Transport error.
        #[source]
        source: ShellError,
    },
    /// A command exited non-zero while failures are fatal.
    #[error("`{command}` on {instance} exited with status {status}")]
    CommandFailed {
        /// Instance name.
        instance: String,
        /// Redacted command text.
        command: String,
        /// Exit status, or `unknown`.
        status: String,
    },
    /// The host did not accept connections again after rebooting.
    #[error(transparent)]
    Timeout(#[from] WaitTimeout),
}

/// What happened on one instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigureOutcome {
    /// Commands executed, including the reboot and shred steps.
    pub commands_run: usize,
    /// Redacted text of commands that exited non-zero without aborting.
    pub failed_commands: Vec<String>,
}

/// Drives the post-boot workflow through a [`RemoteShell`].
#[derive(Debug)]
pub struct ConfigurationEngine<'a, S> {
    shell: &'a S,
    settings: &'a ConfigureSettings,
    waits: WaitPolicies,
}

impl<'a, S: RemoteShell> ConfigurationEngine<'a, S> {
    /// Creates an engine using `waits.reboot_delay` and `waits.reboot_wait`.
    #[must_use]
    pub const fn new(shell: &'a S, settings: &'a ConfigureSettings, waits: WaitPolicies) -> Self {
        Self {
            shell,
            settings,
            waits,
        }
    }

    /// Configures the instance described by `record`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigureError::Connection`] when the first connection
    /// fails, [`ConfigureError::Timeout`] when the post-reboot reconnect does
    /// not succeed within `reboot_wait`, and a transport or command error
    /// from the first failing step.
    pub async fn configure(
        &self,
        record: &InstanceRecord,
        vpc_cidr: &str,
    ) -> Result<ConfigureOutcome, ConfigureError> {
        let mut redactor = Redactor::new();
        redactor.register_secret(record.admin_password.as_str());
        redactor.register_secret(record.readonly_password.as_str());
        let mut runner = CommandRunner {
            shell: self.shell,
            instance: &record.name,
            redactor,
            fail_on_error: self.settings.fail_on_command_error,
            outcome: ConfigureOutcome::default(),
        };

        info!(instance = %record.name, host = %record.public_ip, "connecting");
        let session = self
            .shell
            .connect(
                &record.public_ip,
                &self.settings.identity_file,
                &self.settings.ssh_user,
            )
            .map_err(|source| ConfigureError::Connection {
                instance: record.name.clone(),
                source,
            })?;

        let updated = update_commands()
            .iter()
            .try_for_each(|command| runner.run(&session, command, None));
        if let Err(err) = updated {
            self.shell.close(session);
            return Err(err);
        }
        runner.run_unchecked(&session, REBOOT_COMMAND);
        self.shell.close(session);

        if !self.waits.reboot_delay.is_zero() {
            info!(
                instance = %record.name,
                "waiting {}s for reboot",
                self.waits.reboot_delay.as_secs()
            );
            sleep(self.waits.reboot_delay).await;
        }
        let session = self.reconnect(record).await?;

        let staging_path = format!("~/hangar-credentials-{}", Uuid::new_v4().simple());
        let context = ScriptContext::for_record(record, vpc_cidr);
        let configured = self.configure_host(&mut runner, &session, &context, &staging_path);
        let shredded = shred_commands(&staging_path)
            .iter()
            .map(|command| runner.run(&session, command, None))
            .fold(Ok(()), Result::and);
        self.shell.close(session);

        configured.and(shredded)?;
        info!(
            instance = %record.name,
            commands = runner.outcome.commands_run,
            failures = runner.outcome.failed_commands.len(),
            "configuration complete"
        );
        Ok(runner.outcome)
    }

    fn configure_host(
        &self,
        runner: &mut CommandRunner<'_, S>,
        session: &Session,
        context: &ScriptContext,
        staging_path: &str,
    ) -> Result<(), ConfigureError> {
        for command in credential_staging_commands(&self.settings.credentials, staging_path)
            .iter()
            .chain(tooling_commands().iter())
        {
            runner.run(session, command, None)?;
        }

        for line in filter_commands(&self.settings.post_config) {
            let command = context.render(&line);
            let stdin = self
                .settings
                .stdin_markers
                .iter()
                .any(|marker| command.contains(marker.as_str()))
                .then(|| format!("{}\n", context.admin_password));
            runner.run(session, &command, stdin)?;
        }
        Ok(())
    }

    async fn reconnect(&self, record: &InstanceRecord) -> Result<Session, ConfigureError> {
        let result = poll_until(
            self.waits.reboot_wait,
            &record.public_ip,
            "accept connections after reboot",
            || {
                let attempt = self.shell.connect(
                    &record.public_ip,
                    &self.settings.identity_file,
                    &self.settings.ssh_user,
                );
                async move {
                    Ok::<_, Infallible>(match attempt {
                        Ok(session) => Poll::Ready(session),
                        Err(err) => Poll::Pending(err.to_string()),
                    })
                }
            },
        )
        .await;

        match result {
            Ok(session) => {
                info!(instance = %record.name, "reconnected after reboot");
                Ok(session)
            }
            Err(PollError::Check(never)) => match never {},
            Err(PollError::Timeout(timeout)) => Err(ConfigureError::Timeout(timeout)),
        }
    }
}

struct CommandRunner<'a, S> {
    shell: &'a S,
    instance: &'a str,
    redactor: Redactor,
    fail_on_error: bool,
    outcome: ConfigureOutcome,
}

impl<S: RemoteShell> CommandRunner<'_, S> {
    fn run(
        &mut self,
        session: &Session,
        command: &str,
        stdin: Option<String>,
    ) -> Result<(), ConfigureError> {
        let logged = self.redactor.redact(command);
        let request = stdin.map_or_else(
            || RemoteCommand::new(command),
            |input| RemoteCommand::new(command).with_stdin(input),
        );
        info!(instance = self.instance, command = %logged, "START");
        let started = Instant::now();
        let outcome = self
            .shell
            .execute(session, &request)
            .map_err(|source| ConfigureError::Transport {
                instance: self.instance.to_owned(),
                command: logged.clone(),
                source,
            })?;
        self.outcome.commands_run += 1;
        for line in outcome.stderr.lines().filter(|line| !line.trim().is_empty()) {
            info!(instance = self.instance, stream = "stderr", "{}", self.redactor.redact(line));
        }
        info!(instance = self.instance, command = %logged, elapsed = ?started.elapsed(), "END");

        if outcome.is_success() {
            return Ok(());
        }
        let status = outcome
            .exit_code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        warn!(instance = self.instance, command = %logged, %status, "command exited non-zero");
        if self.fail_on_error {
            return Err(ConfigureError::CommandFailed {
                instance: self.instance.to_owned(),
                command: logged,
                status,
            });
        }
        self.outcome.failed_commands.push(logged);
        Ok(())
    }

    /// Runs a command whose exit status and transport errors are expected,
    /// such as a reboot that drops the connection.
    fn run_unchecked(&mut self, session: &Session, command: &str) {
        let request = RemoteCommand::new(command);
        info!(instance = self.instance, command, "START");
        match self.shell.execute(session, &request) {
            Ok(outcome) => {
                self.outcome.commands_run += 1;
                info!(instance = self.instance, command, status = ?outcome.exit_code, "END");
            }
            Err(err) => {
                info!(instance = self.instance, command, error = %err, "END (connection dropped)");
            }
        }
    }
}
