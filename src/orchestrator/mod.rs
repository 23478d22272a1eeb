//! Top-level deployment workflow.
//!
//! A run moves strictly forward through
//! `Idle → Reconciling → Provisioning → Configuring → Reporting` and ends in
//! `Succeeded` or `Failed`. The first error from any phase moves the run
//! straight to `Failed`; records produced before the failure are still
//! written to the state file so the operator can find what was created.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::configure::{ConfigurationEngine, ConfigureError, ConfigureOutcome, ConfigureSettings};
use crate::desired::InstanceSpec;
use crate::password::PasswordGenerator;
use crate::provider::Provider;
use crate::provision::{ProvisionError, ProvisioningEngine};
use crate::reconcile::{ReconcileError, ReconcileSummary, ReconciliationEngine};
use crate::records::{InstanceRecord, NetworkContext};
use crate::shell::RemoteShell;
use crate::state_store::{StateStore, StateStoreError};
use crate::wait::WaitPolicies;

/// Position of a run in the deployment state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// Removing stale same-named resources.
    Reconciling,
    /// Creating groups, instances, and addresses.
    Provisioning,
    /// Running the post-boot workflow on each instance.
    Configuring,
    /// Persisting and reporting the records.
    Reporting,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl Phase {
    /// Lower-case phase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reconciling => "reconciling",
            Self::Provisioning => "provisioning",
            Self::Configuring => "configuring",
            Self::Reporting => "reporting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a deployment run.
#[derive(Debug, Error)]
pub enum OrchestratorError<E>
where
    E: std::error::Error + 'static,
{
    /// No VPC and subnet could be found.
    #[error("no VPC or subnet found for {vpc_id}")]
    NetworkResolution {
        /// Requested VPC, or `default`.
        vpc_id: String,
    },
    /// Network lookup itself failed.
    #[error("failed to resolve network: {0}")]
    Network(#[source] E),
    /// Reconciliation failed.
    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError<E>),
    /// Provisioning failed.
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError<E>),
    /// Configuring an instance failed.
    #[error("configuration failed: {0}")]
    Configure(#[from] ConfigureError),
    /// The state file could not be read or written.
    #[error(transparent)]
    State(#[from] StateStoreError),
}

/// Inputs for one run.
#[derive(Clone, Debug, Default)]
pub struct DeploymentPlan {
    /// Desired instances, in processing order.
    pub specs: Vec<InstanceSpec>,
    /// VPC to deploy into; the provider default when `None`.
    pub vpc_id: Option<String>,
    /// Load records from the state file instead of reconciling and
    /// provisioning.
    pub reuse_state: bool,
    /// Stop after the records are persisted.
    pub skip_configuration: bool,
}

/// Everything a finished run observed.
#[derive(Debug)]
pub struct DeploymentReport<E>
where
    E: std::error::Error + 'static,
{
    /// Phases entered, in order, ending with a terminal phase.
    pub phases: Vec<Phase>,
    /// Reconciliation counts, when reconciliation ran to completion.
    pub reconcile: Option<ReconcileSummary>,
    /// Records provisioned or loaded during the run.
    pub records: Vec<InstanceRecord>,
    /// Per-instance configuration outcomes, in record order.
    pub configured: Vec<ConfigureOutcome>,
    /// The error that failed the run.
    pub error: Option<OrchestratorError<E>>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl<E> DeploymentReport<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the terminal phase.
    #[must_use]
    pub fn final_phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Idle)
    }

    /// Returns `true` when the run reached [`Phase::Succeeded`].
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.final_phase() == Phase::Succeeded
    }

    /// Converts the report into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the run.
    pub fn into_result(self) -> Result<Vec<InstanceRecord>, OrchestratorError<E>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

struct RunState<E>
where
    E: std::error::Error + 'static,
{
    phases: Vec<Phase>,
    reconcile: Option<ReconcileSummary>,
    records: Vec<InstanceRecord>,
    configured: Vec<ConfigureOutcome>,
    records_changed: bool,
    error: Option<OrchestratorError<E>>,
}

impl<E> RunState<E>
where
    E: std::error::Error + 'static,
{
    fn enter(&mut self, phase: Phase) {
        info!(phase = %phase, "entering phase");
        self.phases.push(phase);
    }
}

/// Drives one deployment through every phase.
#[derive(Debug)]
pub struct Orchestrator<'a, P, S, G> {
    provider: &'a P,
    shell: &'a S,
    passwords: &'a G,
    store: StateStore,
    waits: WaitPolicies,
    settings: ConfigureSettings,
}

impl<'a, P, S, G> Orchestrator<'a, P, S, G>
where
    P: Provider,
    S: RemoteShell,
    G: PasswordGenerator,
{
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub const fn new(
        provider: &'a P,
        shell: &'a S,
        passwords: &'a G,
        store: StateStore,
        waits: WaitPolicies,
        settings: ConfigureSettings,
    ) -> Self {
        Self {
            provider,
            shell,
            passwords,
            store,
            waits,
            settings,
        }
    }

    /// Runs `plan` to a terminal phase and reports what happened.
    ///
    /// Failures are captured in [`DeploymentReport::error`] rather than
    /// returned, so the report always carries the phases visited and any
    /// records created.
    pub async fn run(&self, plan: &DeploymentPlan) -> DeploymentReport<P::Error> {
        let started = Instant::now();
        let mut state = RunState {
            phases: vec![Phase::Idle],
            reconcile: None,
            records: Vec::new(),
            configured: Vec::new(),
            records_changed: false,
            error: None,
        };

        match self.drive(plan, &mut state).await {
            Ok(()) => state.enter(Phase::Succeeded),
            Err(err) => {
                let phase = state.phases.last().copied().unwrap_or(Phase::Idle);
                error!(phase = %phase, error = %err, "deployment failed");
                if state.records_changed
                    && let Err(save_err) = self.store.save(&state.records)
                {
                    warn!(
                        path = %self.store.path(),
                        error = %save_err,
                        "could not persist partial records"
                    );
                }
                state.error = Some(err);
                state.enter(Phase::Failed);
            }
        }

        let elapsed = started.elapsed();
        info!(
            outcome = %state.phases.last().copied().unwrap_or(Phase::Idle),
            elapsed = ?elapsed,
            "deployment finished"
        );
        DeploymentReport {
            phases: state.phases,
            reconcile: state.reconcile,
            records: state.records,
            configured: state.configured,
            error: state.error,
            elapsed,
        }
    }

    async fn drive(
        &self,
        plan: &DeploymentPlan,
        state: &mut RunState<P::Error>,
    ) -> Result<(), OrchestratorError<P::Error>> {
        let network = self.resolve_network(plan.vpc_id.as_deref()).await?;

        if plan.reuse_state {
            state.records = self.store.load()?;
            info!(
                path = %self.store.path(),
                instances = state.records.len(),
                "reusing recorded instances"
            );
        } else {
            state.enter(Phase::Reconciling);
            let summary = ReconciliationEngine::new(self.provider, self.waits.terminate_wait)
                .reconcile(&plan.specs)
                .await?;
            state.reconcile = Some(summary);

            state.enter(Phase::Provisioning);
            self.provision(plan, &network, state).await?;
            if state.records_changed {
                self.store.save(&state.records)?;
                info!(
                    path = %self.store.path(),
                    instances = state.records.len(),
                    "saved provisioned records"
                );
            }
        }

        if plan.skip_configuration {
            info!("configuration skipped");
        } else {
            state.enter(Phase::Configuring);
            let engine = ConfigurationEngine::new(self.shell, &self.settings, self.waits);
            for record in &state.records {
                let outcome = engine.configure(record, &network.cidr).await?;
                state.configured.push(outcome);
            }
        }

        state.enter(Phase::Reporting);
        if state.records_changed {
            self.store.save(&state.records)?;
            info!(path = %self.store.path(), "saved instance records");
        }
        report(&state.records);
        Ok(())
    }

    async fn resolve_network(
        &self,
        vpc_id: Option<&str>,
    ) -> Result<NetworkContext, OrchestratorError<P::Error>> {
        let network = self
            .provider
            .resolve_network(vpc_id)
            .await
            .map_err(OrchestratorError::Network)?
            .ok_or_else(|| OrchestratorError::NetworkResolution {
                vpc_id: vpc_id.unwrap_or("default").to_owned(),
            })?;
        info!(
            vpc_id = %network.vpc_id,
            subnet_id = %network.subnet_id,
            cidr = %network.cidr,
            "resolved network"
        );
        Ok(network)
    }

    async fn provision(
        &self,
        plan: &DeploymentPlan,
        network: &NetworkContext,
        state: &mut RunState<P::Error>,
    ) -> Result<(), OrchestratorError<P::Error>> {
        let engine = ProvisioningEngine::new(self.provider, self.passwords, self.waits);
        let groups = engine.create_security_groups(&plan.specs, network).await?;
        for spec in &plan.specs {
            let record = engine.provision_instance(spec, network, &groups).await?;
            state.records.push(record);
            state.records_changed = true;
        }
        Ok(())
    }
}

fn report(records: &[InstanceRecord]) {
    for record in records {
        info!(
            instance = %record.name,
            instance_id = %record.id,
            private_ip = %record.private_ip,
            public_ip = %record.public_ip,
            admin_password = %record.admin_password,
            readonly_password = %record.readonly_password,
            "instance ready"
        );
    }
}

#[cfg(test)]
mod tests;
