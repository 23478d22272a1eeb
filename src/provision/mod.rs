//! Creation of security groups, instances, and public addresses.
//!
//! Groups are created once per unique name across the whole batch before any
//! instance is launched. Each instance is then launched, polled out of
//! `pending`, given an elastic address, and left to settle before its record
//! is returned.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::time::sleep;
use tracing::info;

use crate::desired::InstanceSpec;
use crate::password::PasswordGenerator;
use crate::provider::{IngressRule, InstanceState, LaunchRequest, Provider};
use crate::records::{InstanceRecord, NetworkContext, SecurityGroupRecord};
use crate::wait::{Poll, PollError, WaitPolicies, WaitTimeout, poll_until};

/// Errors raised while provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
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
    /// The launch call succeeded but returned no instance.
    #[error("launching {instance} returned no instance")]
    NothingLaunched {
        /// Instance name.
        instance: String,
    },
    /// The instance left `pending` for a state other than `running`.
    #[error("instance {instance} ({instance_id}) entered {state} instead of running")]
    NotRunning {
        /// Instance name.
        instance: String,
        /// Provider identifier.
        instance_id: String,
        /// State observed after `pending`.
        state: String,
    },
    /// A spec referenced a group that was not created in this batch.
    #[error("security group {group} for {instance} was not created")]
    MissingGroup {
        /// Instance name.
        instance: String,
        /// Group name.
        group: String,
    },
    /// The instance stayed `pending` past its ceiling.
    #[error(transparent)]
    Timeout(#[from] WaitTimeout),
}

fn provider_error<E: std::error::Error + 'static>(
    operation: &'static str,
    resource: &str,
) -> impl FnOnce(E) -> ProvisionError<E> {
    move |source| ProvisionError::Provider {
        operation,
        resource: resource.to_owned(),
        source,
    }
}

/// Security groups created in this run, keyed by name.
pub type GroupRecords = BTreeMap<String, SecurityGroupRecord>;

/// Launches instances and their networking prerequisites.
#[derive(Debug)]
pub struct ProvisioningEngine<'a, P, G> {
    provider: &'a P,
    passwords: &'a G,
    waits: WaitPolicies,
}

impl<'a, P, G> ProvisioningEngine<'a, P, G>
where
    P: Provider,
    G: PasswordGenerator,
{
    /// Creates an engine using `waits.pending_wait` and `waits.settle_delay`.
    #[must_use]
    pub const fn new(provider: &'a P, passwords: &'a G, waits: WaitPolicies) -> Self {
        Self {
            provider,
            passwords,
            waits,
        }
    }

    /// Provisions every spec in order, returning one record per spec.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProvisionError`]; nothing created before the
    /// failure is rolled back.
    pub async fn provision(
        &self,
        specs: &[InstanceSpec],
        network: &NetworkContext,
    ) -> Result<Vec<InstanceRecord>, ProvisionError<P::Error>> {
        let groups = self.create_security_groups(specs, network).await?;
        let mut records = Vec::with_capacity(specs.len());
        for spec in specs {
            records.push(self.provision_instance(spec, network, &groups).await?);
        }
        Ok(records)
    }

    /// Creates each uniquely named group once and authorises its single
    /// ingress rule.
    ///
    /// The first spec mentioning a name decides its rule; `public` groups
    /// admit that spec's external CIDR, all others the VPC CIDR.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Provider`] when creation or authorisation
    /// fails; groups created earlier in the batch are left in place.
    pub async fn create_security_groups(
        &self,
        specs: &[InstanceSpec],
        network: &NetworkContext,
    ) -> Result<GroupRecords, ProvisionError<P::Error>> {
        let mut created = GroupRecords::new();
        for spec in specs {
            for group in &spec.security_groups {
                if created.contains_key(&group.name) {
                    continue;
                }
                let cidr = group
                    .rule
                    .resolve_cidr(&spec.external_cidr, &network.cidr)
                    .to_owned();
                let group_id = self
                    .provider
                    .create_security_group(&group.name, &network.vpc_id)
                    .await
                    .map_err(provider_error("create_security_group", &group.name))?;
                let rule = IngressRule {
                    protocol: group.protocol,
                    port: group.port,
                    cidr: cidr.clone(),
                };
                self.provider
                    .authorize_ingress(&group_id, &rule)
                    .await
                    .map_err(provider_error("authorize_ingress", &group.name))?;
                info!(
                    group = %group.name,
                    group_id = %group_id,
                    port = group.port,
                    cidr = %cidr,
                    "created security group"
                );
                created.insert(
                    group.name.clone(),
                    SecurityGroupRecord {
                        name: group.name.clone(),
                        id: group_id,
                        rule: group.rule,
                        port: group.port,
                        protocol: group.protocol,
                        cidr,
                    },
                );
            }
        }
        Ok(created)
    }

    /// Launches one instance and returns its connection-ready record.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a referenced group is missing, a
    /// provider call fails, the instance does not reach `running`, or the
    /// pending wait exceeds its ceiling. An instance that was already
    /// launched is not cleaned up.
    pub async fn provision_instance(
        &self,
        spec: &InstanceSpec,
        network: &NetworkContext,
        groups: &GroupRecords,
    ) -> Result<InstanceRecord, ProvisionError<P::Error>> {
        let security_groups = spec
            .security_groups
            .iter()
            .map(|group| {
                groups
                    .get(&group.name)
                    .cloned()
                    .ok_or_else(|| ProvisionError::MissingGroup {
                        instance: spec.name.clone(),
                        group: group.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let request = LaunchRequest {
            image_id: spec.image_id.clone(),
            instance_type: spec.instance_type.clone(),
            key_name: spec.key_name.clone(),
            subnet_id: network.subnet_id.clone(),
            availability_zone: spec.availability_zone.clone(),
            security_group_ids: security_groups.iter().map(|group| group.id.clone()).collect(),
            tags: vec![
                (String::from("Name"), spec.name.clone()),
                (String::from("Owner"), spec.owner.clone()),
                (String::from("Purpose"), spec.purpose.clone()),
            ],
            count: 1,
        };
        let created = self
            .provider
            .create_instances(&request)
            .await
            .map_err(provider_error("create_instances", &spec.name))?
            .into_iter()
            .next()
            .ok_or_else(|| ProvisionError::NothingLaunched {
                instance: spec.name.clone(),
            })?;
        info!(
            instance = %spec.name,
            instance_id = %created.id,
            private_ip = %created.private_ip,
            "launched instance"
        );

        self.wait_until_running(&spec.name, &created.id).await?;

        let address = self
            .provider
            .allocate_address()
            .await
            .map_err(provider_error("allocate_address", &spec.name))?;
        self.provider
            .associate_address(&address.allocation_id, &created.id)
            .await
            .map_err(provider_error("associate_address", &created.id))?;
        info!(
            instance = %spec.name,
            instance_id = %created.id,
            allocation_id = %address.allocation_id,
            public_ip = %address.public_ip,
            "associated public address"
        );

        if !self.waits.settle_delay.is_zero() {
            info!(
                instance = %spec.name,
                "waiting {}s for the guest to settle",
                self.waits.settle_delay.as_secs()
            );
            sleep(self.waits.settle_delay).await;
        }

        Ok(InstanceRecord {
            name: spec.name.clone(),
            id: created.id,
            private_ip: created.private_ip,
            public_ip: address.public_ip,
            vpc_id: network.vpc_id.clone(),
            subnet_id: network.subnet_id.clone(),
            security_groups,
            admin_password: self.passwords.generate(),
            readonly_password: self.passwords.generate(),
        })
    }

    async fn wait_until_running(
        &self,
        name: &str,
        instance_id: &str,
    ) -> Result<(), ProvisionError<P::Error>> {
        let result = poll_until(self.waits.pending_wait, instance_id, "leave pending", || {
            let state = self.provider.get_instance_state(instance_id);
            async move {
                state.await.map(|current| {
                    if current == InstanceState::Pending {
                        Poll::Pending(current.to_string())
                    } else {
                        Poll::Ready(current)
                    }
                })
            }
        })
        .await;

        match result {
            Ok(InstanceState::Running) => Ok(()),
            Ok(other) => Err(ProvisionError::NotRunning {
                instance: name.to_owned(),
                instance_id: instance_id.to_owned(),
                state: other.to_string(),
            }),
            Err(PollError::Check(source)) => Err(ProvisionError::Provider {
                operation: "get_instance_state",
                resource: instance_id.to_owned(),
                source,
            }),
            Err(PollError::Timeout(timeout)) => Err(ProvisionError::Timeout(timeout)),
        }
    }
}
