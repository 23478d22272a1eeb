//! [`Provider`] implementation that shells out to the AWS CLI.
//!
//! Every call runs `aws ec2 <operation> ... --region <region> --output json`
//! through a [`CommandRunner`] and parses the JSON reply with serde. Commands
//! that print nothing on success (associate, delete, release) only have their
//! exit status checked.

mod types;

use std::ffi::OsString;

use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError};
use crate::provider::{
    Address, AllocatedAddress, CreatedInstance, ExistingInstance, ExistingSecurityGroup,
    IngressRule, InstanceState, LaunchRequest, Provider, ProviderFuture,
};
use crate::records::NetworkContext;
use types::{
    AllocateAddressOutput, CreateSecurityGroupOutput, DescribeAddressesOutput,
    DescribeInstancesOutput, DescribeSecurityGroupsOutput, DescribeSubnetsOutput,
    DescribeVpcsOutput, RunInstancesOutput,
};

/// Default AWS CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Settings shared by every AWS CLI invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsSettings {
    /// Path to the `aws` executable.
    pub aws_bin: String,
    /// Region passed as `--region`.
    pub region: String,
    /// Optional named profile passed as `--profile`.
    pub profile: Option<String>,
}

/// Errors raised by [`AwsCliProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsCliError {
    /// The CLI could not be started.
    #[error("failed to run aws ec2 {operation}: {source}")]
    Process {
        /// EC2 operation being invoked.
        operation: String,
        /// Underlying process failure.
        #[source]
        source: ProcessError,
    },
    /// The CLI exited with a non-zero status.
    #[error("aws ec2 {operation} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// EC2 operation being invoked.
        operation: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the CLI.
        stderr: String,
    },
    /// The CLI output could not be parsed.
    #[error("failed to parse aws ec2 {operation} output: {message}")]
    Parse {
        /// EC2 operation being invoked.
        operation: String,
        /// Parser error message.
        message: String,
    },
    /// The blocking task running the CLI panicked or was cancelled.
    #[error("aws ec2 {operation} worker failed: {message}")]
    Worker {
        /// EC2 operation being invoked.
        operation: String,
        /// Join failure reported by the runtime.
        message: String,
    },
    /// The CLI succeeded but omitted an expected value.
    #[error("aws ec2 {operation} returned no {field}")]
    MissingField {
        /// EC2 operation being invoked.
        operation: String,
        /// Value that was expected.
        field: String,
    },
}

/// EC2 provider driven through the `aws` command line tool.
#[derive(Clone, Debug)]
pub struct AwsCliProvider<R: CommandRunner> {
    settings: AwsSettings,
    runner: R,
}

impl AwsCliProvider<ProcessCommandRunner> {
    /// Creates a provider wired to the real process runner, routing CLI
    /// traffic through `proxy` when one is given.
    #[must_use]
    pub fn with_process_runner(settings: AwsSettings, proxy: Option<&str>) -> Self {
        let runner = proxy.map_or_else(ProcessCommandRunner::new, |url| {
            ProcessCommandRunner::new().with_env("HTTPS_PROXY", url)
        });
        Self::new(settings, runner)
    }
}

impl<R: CommandRunner> AwsCliProvider<R> {
    /// Creates a provider that runs the CLI through `runner`.
    #[must_use]
    pub const fn new(settings: AwsSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    fn build_args(&self, operation: &str, extra: Vec<OsString>) -> Vec<OsString> {
        let mut args = vec![OsString::from("ec2"), OsString::from(operation)];
        args.extend(extra);
        args.push(OsString::from("--region"));
        args.push(OsString::from(&self.settings.region));
        if let Some(profile) = &self.settings.profile {
            args.push(OsString::from("--profile"));
            args.push(OsString::from(profile));
        }
        args.push(OsString::from("--output"));
        args.push(OsString::from("json"));
        args
    }

    fn run_checked(
        &self,
        operation: &str,
        extra: Vec<OsString>,
    ) -> Result<CommandOutput, AwsCliError> {
        let args = self.build_args(operation, extra);
        let output = self
            .runner
            .run(&self.settings.aws_bin, &args, None)
            .map_err(|source| AwsCliError::Process {
                operation: operation.to_owned(),
                source,
            })?;
        if output.is_success() {
            return Ok(output);
        }
        Err(AwsCliError::CommandFailure {
            operation: operation.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn run_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        extra: Vec<OsString>,
    ) -> Result<T, AwsCliError> {
        let output = self.run_checked(operation, extra)?;
        serde_json::from_str(&output.stdout).map_err(|err| AwsCliError::Parse {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }

    fn describe_instances(
        &self,
        instance_ids: &[&str],
    ) -> Result<Vec<types::Ec2Instance>, AwsCliError> {
        let mut extra = Vec::new();
        if !instance_ids.is_empty() {
            extra.push(OsString::from("--instance-ids"));
            extra.extend(instance_ids.iter().map(OsString::from));
        }
        let output: DescribeInstancesOutput = self.run_json("describe-instances", extra)?;
        Ok(output
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .collect())
    }

    fn list_instances_sync(&self) -> Result<Vec<ExistingInstance>, AwsCliError> {
        Ok(self
            .describe_instances(&[])?
            .into_iter()
            .map(|instance| ExistingInstance {
                name: instance.name_tag(),
                state: InstanceState::from_name(instance.state_name()),
                id: instance.instance_id,
                public_ip: instance.public_ip_address,
            })
            .collect())
    }

    fn instance_state_sync(&self, instance_id: &str) -> Result<InstanceState, AwsCliError> {
        self.describe_instances(&[instance_id])?
            .into_iter()
            .find(|instance| instance.instance_id == instance_id)
            .map(|instance| InstanceState::from_name(instance.state_name()))
            .ok_or_else(|| AwsCliError::MissingField {
                operation: String::from("describe-instances"),
                field: format!("instance {instance_id}"),
            })
    }

    fn create_security_group_sync(&self, name: &str, vpc_id: &str) -> Result<String, AwsCliError> {
        let output: CreateSecurityGroupOutput = self.run_json(
            "create-security-group",
            vec![
                OsString::from("--group-name"),
                OsString::from(name),
                OsString::from("--description"),
                OsString::from(name),
                OsString::from("--vpc-id"),
                OsString::from(vpc_id),
            ],
        )?;
        Ok(output.group_id)
    }

    fn authorize_ingress_sync(&self, group_id: &str, rule: &IngressRule) -> Result<(), AwsCliError> {
        self.run_checked(
            "authorize-security-group-ingress",
            vec![
                OsString::from("--group-id"),
                OsString::from(group_id),
                OsString::from("--protocol"),
                OsString::from(rule.protocol.as_str()),
                OsString::from("--port"),
                OsString::from(rule.port.to_string()),
                OsString::from("--cidr"),
                OsString::from(&rule.cidr),
            ],
        )
        .map(drop)
    }

    fn describe_security_groups_sync(&self) -> Result<Vec<ExistingSecurityGroup>, AwsCliError> {
        let output: DescribeSecurityGroupsOutput =
            self.run_json("describe-security-groups", Vec::new())?;
        Ok(output
            .security_groups
            .into_iter()
            .map(|group| ExistingSecurityGroup {
                id: group.group_id,
                name: group.group_name,
            })
            .collect())
    }

    fn run_instances_sync(
        &self,
        request: &LaunchRequest,
    ) -> Result<Vec<CreatedInstance>, AwsCliError> {
        let tags = request
            .tags
            .iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value }))
            .collect::<Vec<_>>();
        let tag_specifications = json!([{ "ResourceType": "instance", "Tags": tags }]);

        let mut extra = vec![
            OsString::from("--image-id"),
            OsString::from(&request.image_id),
            OsString::from("--count"),
            OsString::from(request.count.to_string()),
            OsString::from("--instance-type"),
            OsString::from(&request.instance_type),
            OsString::from("--key-name"),
            OsString::from(&request.key_name),
            OsString::from("--subnet-id"),
            OsString::from(&request.subnet_id),
            OsString::from("--placement"),
            OsString::from(format!("AvailabilityZone={}", request.availability_zone)),
            OsString::from("--tag-specifications"),
            OsString::from(tag_specifications.to_string()),
            OsString::from("--security-group-ids"),
        ];
        extra.extend(request.security_group_ids.iter().map(OsString::from));

        let output: RunInstancesOutput = self.run_json("run-instances", extra)?;
        output
            .instances
            .into_iter()
            .map(|instance| {
                let private_ip =
                    instance
                        .private_ip_address
                        .ok_or_else(|| AwsCliError::MissingField {
                            operation: String::from("run-instances"),
                            field: format!("private IP for {}", instance.instance_id),
                        })?;
                Ok(CreatedInstance {
                    id: instance.instance_id,
                    private_ip,
                })
            })
            .collect()
    }

    fn allocate_address_sync(&self) -> Result<AllocatedAddress, AwsCliError> {
        let output: AllocateAddressOutput = self.run_json(
            "allocate-address",
            vec![OsString::from("--domain"), OsString::from("vpc")],
        )?;
        Ok(AllocatedAddress {
            allocation_id: output.allocation_id,
            public_ip: output.public_ip,
        })
    }

    fn describe_addresses_sync(&self) -> Result<Vec<Address>, AwsCliError> {
        let output: DescribeAddressesOutput = self.run_json("describe-addresses", Vec::new())?;
        Ok(output
            .addresses
            .into_iter()
            .map(|address| Address {
                allocation_id: address.allocation_id,
                association_id: address.association_id,
                instance_id: address.instance_id,
                public_ip: address.public_ip,
            })
            .collect())
    }

    fn resolve_network_sync(
        &self,
        vpc_id: Option<&str>,
    ) -> Result<Option<NetworkContext>, AwsCliError> {
        let filter = vpc_id.map_or_else(Vec::new, |id| {
            vec![OsString::from("--vpc-ids"), OsString::from(id)]
        });
        let vpcs: DescribeVpcsOutput = self.run_json("describe-vpcs", filter)?;
        let Some(vpc) = vpcs.vpcs.into_iter().next() else {
            return Ok(None);
        };

        let subnets: DescribeSubnetsOutput = self.run_json(
            "describe-subnets",
            vec![
                OsString::from("--filters"),
                OsString::from(format!("Name=vpc-id,Values={}", vpc.vpc_id)),
            ],
        )?;
        Ok(subnets
            .subnets
            .into_iter()
            .next()
            .map(|subnet| NetworkContext {
                vpc_id: vpc.vpc_id,
                subnet_id: subnet.subnet_id,
                cidr: vpc.cidr_block,
            }))
    }

    fn run_simple(&self, operation: &str, flag: &str, value: &str) -> Result<(), AwsCliError> {
        self.run_checked(operation, vec![OsString::from(flag), OsString::from(value)])
            .map(drop)
    }
}

impl<R> AwsCliProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Runs one blocking CLI call on tokio's blocking pool so the caller's
    /// worker thread stays free while `aws` runs.
    async fn offload<T, F>(&self, operation: &'static str, call: F) -> Result<T, AwsCliError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, AwsCliError> + Send + 'static,
    {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || call(&provider))
            .await
            .map_err(|err| AwsCliError::Worker {
                operation: operation.to_owned(),
                message: err.to_string(),
            })?
    }
}

impl<R> Provider for AwsCliProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    type Error = AwsCliError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<ExistingInstance>, Self::Error> {
        Box::pin(self.offload("describe-instances", Self::list_instances_sync))
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        vpc_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        let (name, vpc_id) = (name.to_owned(), vpc_id.to_owned());
        Box::pin(self.offload("create-security-group", move |aws| {
            aws.create_security_group_sync(&name, &vpc_id)
        }))
    }

    fn authorize_ingress<'a>(
        &'a self,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let (group_id, rule) = (group_id.to_owned(), rule.clone());
        Box::pin(self.offload("authorize-security-group-ingress", move |aws| {
            aws.authorize_ingress_sync(&group_id, &rule)
        }))
    }

    fn delete_security_group<'a>(
        &'a self,
        group_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let group_id = group_id.to_owned();
        Box::pin(self.offload("delete-security-group", move |aws| {
            aws.run_simple("delete-security-group", "--group-id", &group_id)
        }))
    }

    fn describe_security_groups(
        &self,
    ) -> ProviderFuture<'_, Vec<ExistingSecurityGroup>, Self::Error> {
        Box::pin(self.offload("describe-security-groups", Self::describe_security_groups_sync))
    }

    fn create_instances<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, Vec<CreatedInstance>, Self::Error> {
        let request = request.clone();
        Box::pin(self.offload("run-instances", move |aws| aws.run_instances_sync(&request)))
    }

    fn get_instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, InstanceState, Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(self.offload("describe-instances", move |aws| {
            aws.instance_state_sync(&instance_id)
        }))
    }

    fn allocate_address(&self) -> ProviderFuture<'_, AllocatedAddress, Self::Error> {
        Box::pin(self.offload("allocate-address", Self::allocate_address_sync))
    }

    fn associate_address<'a>(
        &'a self,
        allocation_id: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let extra = vec![
            OsString::from("--allocation-id"),
            OsString::from(allocation_id),
            OsString::from("--instance-id"),
            OsString::from(instance_id),
        ];
        Box::pin(self.offload("associate-address", move |aws| {
            aws.run_checked("associate-address", extra).map(drop)
        }))
    }

    fn disassociate_address<'a>(
        &'a self,
        association_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let association_id = association_id.to_owned();
        Box::pin(self.offload("disassociate-address", move |aws| {
            aws.run_simple("disassociate-address", "--association-id", &association_id)
        }))
    }

    fn release_address<'a>(
        &'a self,
        allocation_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let allocation_id = allocation_id.to_owned();
        Box::pin(self.offload("release-address", move |aws| {
            aws.run_simple("release-address", "--allocation-id", &allocation_id)
        }))
    }

    fn describe_addresses(&self) -> ProviderFuture<'_, Vec<Address>, Self::Error> {
        Box::pin(self.offload("describe-addresses", Self::describe_addresses_sync))
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(self.offload("terminate-instances", move |aws| {
            aws.run_simple("terminate-instances", "--instance-ids", &instance_id)
        }))
    }

    fn resolve_network<'a>(
        &'a self,
        vpc_id: Option<&'a str>,
    ) -> ProviderFuture<'a, Option<NetworkContext>, Self::Error> {
        let vpc_id = vpc_id.map(str::to_owned);
        Box::pin(self.offload("describe-vpcs", move |aws| {
            aws.resolve_network_sync(vpc_id.as_deref())
        }))
    }
}
