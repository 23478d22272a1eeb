//! Binary entry point for the Hangar CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use hangar::aws::{AwsCliError, AwsCliProvider};
use hangar::config::{ConfigError, HangarConfig};
use hangar::deployment::{DeploymentDocument, DeploymentError};
use hangar::files;
use hangar::orchestrator::{DeploymentPlan, Orchestrator, OrchestratorError};
use hangar::password::RandomPasswords;
use hangar::process::{ProcessCommandRunner, expand_tilde};
use hangar::shell::SshShell;
use hangar::state_store::StateStore;

mod cli;

use cli::{Cli, DeployCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Document(#[from] DeploymentError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error("deployment failed: {0}")]
    Deploy(#[from] OrchestratorError<AwsCliError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Deploy(command) => deploy(command).await,
    }
}

async fn deploy(args: DeployCommand) -> Result<i32, CliError> {
    let document = DeploymentDocument::from_path(Utf8Path::new(&args.document))?;
    let config = HangarConfig::load_without_cli_args()?;
    config.validate()?;
    init_logging(config.log_file.as_deref())?;
    let settings = config.deployment_settings(args.skip_configuration)?;

    let state_path = args.state_file.map_or_else(
        || config.state_path(),
        |path| Utf8PathBuf::from(expand_tilde(&path)),
    );
    let provider =
        AwsCliProvider::with_process_runner(config.aws_settings(), document.proxy.as_deref());
    let shell = SshShell::new(config.ssh_settings(), ProcessCommandRunner::new());
    let plan = DeploymentPlan {
        specs: document.instances,
        vpc_id: document.vpc_id,
        reuse_state: args.reuse_state,
        skip_configuration: args.skip_configuration,
    };

    Orchestrator::new(
        &provider,
        &shell,
        &RandomPasswords,
        StateStore::new(state_path),
        config.wait_policies(),
        settings,
    )
    .run(&plan)
    .await
    .into_result()?;
    Ok(0)
}

fn init_logging(log_file: Option<&str>) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = log_file
        .map(|path| {
            files::open_append(Utf8Path::new(&expand_tilde(path)))
                .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .map_err(|err| CliError::Logging(format!("{path}: {err}")))
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|err| CliError::Logging(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
