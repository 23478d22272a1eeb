//! Removal of stale resources that share names with the desired instances.
//!
//! Reconciliation is idempotent: instances already terminated and groups
//! already deleted are simply not found on the next pass. Any provider
//! failure aborts the whole pass.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::info;

use crate::desired::InstanceSpec;
use crate::provider::{ExistingInstance, InstanceState, Provider};
use crate::wait::{Poll, PollError, WaitPolicy, WaitTimeout, poll_until};

/// Counts of the resources removed by one pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    /// Instances that received a terminate request.
    pub terminated_instances: usize,
    /// Public addresses released before termination.
    pub released_addresses: usize,
    /// Security groups deleted.
    pub deleted_groups: usize,
}

impl ReconcileSummary {
    /// Returns `true` when nothing was removed.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.terminated_instances == 0 && self.released_addresses == 0 && self.deleted_groups == 0
    }
}

/// Errors raised while reconciling.
#[derive(Debug, Error)]
pub enum ReconcileError<E>
where
    E: std::error::Error + 'static,
{
    /// A provider call failed.
    #[error("{operation} failed for {resource}: {source}")]
    Provider {
        /// Provider operation that failed.
        operation: &'static str,
        /// Resource the call targeted.
        resource: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// An instance did not reach `terminated` in time.
    #[error(transparent)]
    Timeout(#[from] WaitTimeout),
}

fn provider_error<E: std::error::Error + 'static>(
    operation: &'static str,
    resource: &str,
) -> impl FnOnce(E) -> ReconcileError<E> {
    move |source| ReconcileError::Provider {
        operation,
        resource: resource.to_owned(),
        source,
    }
}

/// Terminates same-named instances and deletes referenced security groups.
#[derive(Debug)]
pub struct ReconciliationEngine<'a, P> {
    provider: &'a P,
    terminate_wait: WaitPolicy,
}

impl<'a, P> ReconciliationEngine<'a, P>
where
    P: Provider,
{
    /// Creates an engine polling termination with `terminate_wait`.
    #[must_use]
    pub const fn new(provider: &'a P, terminate_wait: WaitPolicy) -> Self {
        Self {
            provider,
            terminate_wait,
        }
    }

    /// Converges the account towards a clean slate for `specs`.
    ///
    /// Every instance whose `Name` tag matches a desired name and that is not
    /// already terminating has its public addresses disassociated and
    /// released, is terminated, and is polled until `terminated`. Instances
    /// found mid-shutdown are awaited without a second terminate request.
    /// Afterwards every existing security group whose name is referenced by a
    /// spec is deleted; the provider rejecting a deletion is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Provider`] on the first failing provider call
    /// and [`ReconcileError::Timeout`] when termination exceeds its ceiling.
    pub async fn reconcile(
        &self,
        specs: &[InstanceSpec],
    ) -> Result<ReconcileSummary, ReconcileError<P::Error>> {
        let mut summary = ReconcileSummary::default();
        self.terminate_instances(specs, &mut summary).await?;
        self.delete_security_groups(specs, &mut summary).await?;
        Ok(summary)
    }

    async fn terminate_instances(
        &self,
        specs: &[InstanceSpec],
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconcileError<P::Error>> {
        let names: BTreeSet<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
        let instances = self
            .provider
            .list_instances()
            .await
            .map_err(provider_error("list_instances", "account"))?;
        let matching: Vec<ExistingInstance> = instances
            .into_iter()
            .filter(|instance| {
                instance
                    .name
                    .as_deref()
                    .is_some_and(|name| names.contains(name))
            })
            .filter(|instance| instance.state != InstanceState::Terminated)
            .collect();

        if matching.is_empty() {
            info!("No EC2 instances to terminate");
            return Ok(());
        }

        for instance in &matching {
            if instance.state == InstanceState::ShuttingDown {
                info!(instance_id = %instance.id, "instance already shutting down");
            } else {
                if instance.public_ip.is_some() {
                    summary.released_addresses += self.release_addresses(instance).await?;
                }
                info!(
                    instance = instance.name.as_deref().unwrap_or_default(),
                    instance_id = %instance.id,
                    state = %instance.state,
                    "terminating instance"
                );
                self.provider
                    .terminate_instance(&instance.id)
                    .await
                    .map_err(provider_error("terminate_instance", &instance.id))?;
                summary.terminated_instances += 1;
            }
            self.wait_for_termination(&instance.id).await?;
        }
        Ok(())
    }

    async fn release_addresses(
        &self,
        instance: &ExistingInstance,
    ) -> Result<usize, ReconcileError<P::Error>> {
        let addresses = self
            .provider
            .describe_addresses()
            .await
            .map_err(provider_error("describe_addresses", &instance.id))?;
        let mut released = 0;
        for address in addresses.iter().filter(|address| {
            address.instance_id.as_deref() == Some(instance.id.as_str())
                || instance.public_ip.as_deref() == Some(address.public_ip.as_str())
        }) {
            if let Some(association_id) = &address.association_id {
                info!(
                    instance_id = %instance.id,
                    association_id = %association_id,
                    public_ip = %address.public_ip,
                    "disassociating address"
                );
                self.provider
                    .disassociate_address(association_id)
                    .await
                    .map_err(provider_error("disassociate_address", association_id))?;
            }
            info!(
                allocation_id = %address.allocation_id,
                public_ip = %address.public_ip,
                "releasing address"
            );
            self.provider
                .release_address(&address.allocation_id)
                .await
                .map_err(provider_error("release_address", &address.allocation_id))?;
            released += 1;
        }
        Ok(released)
    }

    async fn wait_for_termination(&self, instance_id: &str) -> Result<(), ReconcileError<P::Error>> {
        let result = poll_until(self.terminate_wait, instance_id, "terminate", || {
            let state = self.provider.get_instance_state(instance_id);
            async move {
                state.await.map(|current| {
                    if current == InstanceState::Terminated {
                        Poll::Ready(())
                    } else {
                        Poll::Pending(current.to_string())
                    }
                })
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!(instance_id, "instance terminated");
                Ok(())
            }
            Err(PollError::Check(source)) => Err(ReconcileError::Provider {
                operation: "get_instance_state",
                resource: instance_id.to_owned(),
                source,
            }),
            Err(PollError::Timeout(timeout)) => Err(ReconcileError::Timeout(timeout)),
        }
    }

    async fn delete_security_groups(
        &self,
        specs: &[InstanceSpec],
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconcileError<P::Error>> {
        let wanted: BTreeSet<&str> = specs
            .iter()
            .flat_map(|spec| spec.security_groups.iter())
            .map(|group| group.name.as_str())
            .collect();
        let existing = self
            .provider
            .describe_security_groups()
            .await
            .map_err(provider_error("describe_security_groups", "account"))?;

        let stale: Vec<_> = existing
            .iter()
            .filter(|group| wanted.contains(group.name.as_str()))
            .collect();
        if stale.is_empty() {
            info!("No security groups to delete");
            return Ok(());
        }

        for group in stale {
            info!(group = %group.name, group_id = %group.id, "deleting security group");
            self.provider
                .delete_security_group(&group.id)
                .await
                .map_err(provider_error("delete_security_group", &group.name))?;
            summary.deleted_groups += 1;
        }
        Ok(())
    }
}
