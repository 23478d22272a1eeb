//! Core library for the Hangar EC2 deployment tool.
//!
//! A deployment runs four phases over a list of desired instances:
//! reconciliation removes same-named instances and their security groups,
//! provisioning creates groups, instances, and public addresses, configuration
//! prepares each host over SSH, and reporting persists the resulting records.
//! Cloud and shell access sit behind the [`Provider`] and [`RemoteShell`]
//! traits so the engines can be exercised against the fakes in
//! [`test_support`].

pub mod aws;
pub mod config;
pub mod configure;
pub mod deployment;
pub mod desired;
pub mod files;
pub mod orchestrator;
pub mod password;
pub mod process;
pub mod provider;
pub mod provision;
pub mod reconcile;
pub mod records;
pub mod redact;
pub mod script;
pub mod shell;
pub mod state_store;
pub mod test_support;
pub mod wait;

pub use aws::{AwsCliError, AwsCliProvider, AwsSettings};
pub use config::{ConfigError, HangarConfig};
pub use configure::{ConfigurationEngine, ConfigureError, ConfigureOutcome, ConfigureSettings};
pub use deployment::{DeploymentDocument, DeploymentError};
pub use desired::{InstanceSpec, InstanceSpecBuilder, RuleType, SecurityGroupSpec, SpecError};
pub use orchestrator::{DeploymentPlan, DeploymentReport, Orchestrator, OrchestratorError, Phase};
pub use password::{PasswordGenerator, RandomPasswords};
pub use provider::{InstanceState, Provider, ProviderFuture};
pub use provision::{ProvisionError, ProvisioningEngine};
pub use reconcile::{ReconcileError, ReconcileSummary, ReconciliationEngine};
pub use records::{InstanceRecord, NetworkContext, SecurityGroupRecord};
pub use shell::{RemoteCommand, RemoteShell, Session, ShellError, SshSettings, SshShell};
pub use state_store::{StateStore, StateStoreError};
pub use wait::{WaitPolicies, WaitPolicy, WaitTimeout};
