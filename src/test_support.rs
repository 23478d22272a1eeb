//! Test support utilities shared across unit and integration tests.
//!
//! The fakes here stand in for the three external collaborators: the local
//! process runner, the cloud provider, and the remote shell. Each one records
//! what it was asked to do so tests can assert on call order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::desired::{InstanceSpec, RuleType, SecurityGroupSpec, SpecError};
use crate::password::PasswordGenerator;
use crate::process::{CommandOutput, CommandRunner, ProcessError};
use crate::provider::{
    Address, AllocatedAddress, CreatedInstance, ExistingInstance, ExistingSecurityGroup,
    IngressRule, InstanceState, LaunchRequest, Provider, ProviderFuture,
};
use crate::records::{InstanceRecord, NetworkContext};
use crate::shell::{CommandOutcome, RemoteCommand, RemoteShell, Session, ShellError};

type Shared<T> = Arc<std::sync::Mutex<T>>;

fn locked<T, R>(shared: &Shared<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Shared<VecDeque<CommandOutput>>,
    invocations: Shared<Vec<CommandInvocation>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Standard input supplied to the program, if any.
    pub input: Option<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations, |calls| calls.clone())
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        let output = CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        };
        locked(&self.responses, |queue| queue.push_back(output));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&str>,
    ) -> Result<CommandOutput, ProcessError> {
        locked(&self.invocations, |calls| {
            calls.push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
                input: input.map(str::to_owned),
            });
        });
        locked(&self.responses, VecDeque::pop_front).ok_or_else(|| ProcessError::Spawn {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        })
    }
}

/// Error raised by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{operation}: {message}")]
pub struct FakeProviderError {
    /// Provider operation that failed.
    pub operation: String,
    /// Simulated provider message.
    pub message: String,
}

/// A call recorded by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `list_instances`.
    ListInstances,
    /// `create_security_group`.
    CreateSecurityGroup {
        /// Group name.
        name: String,
        /// Target VPC.
        vpc_id: String,
    },
    /// `authorize_ingress`.
    AuthorizeIngress {
        /// Group identifier.
        group_id: String,
        /// Rule granted.
        rule: IngressRule,
    },
    /// `delete_security_group`.
    DeleteSecurityGroup {
        /// Group identifier.
        group_id: String,
    },
    /// `describe_security_groups`.
    DescribeSecurityGroups,
    /// `create_instances`.
    CreateInstances {
        /// Launch parameters.
        request: LaunchRequest,
    },
    /// `get_instance_state`.
    GetInstanceState {
        /// Instance identifier.
        instance_id: String,
    },
    /// `allocate_address`.
    AllocateAddress,
    /// `associate_address`.
    AssociateAddress {
        /// Allocation identifier.
        allocation_id: String,
        /// Instance identifier.
        instance_id: String,
    },
    /// `disassociate_address`.
    DisassociateAddress {
        /// Association identifier.
        association_id: String,
    },
    /// `release_address`.
    ReleaseAddress {
        /// Allocation identifier.
        allocation_id: String,
    },
    /// `describe_addresses`.
    DescribeAddresses,
    /// `terminate_instance`.
    TerminateInstance {
        /// Instance identifier.
        instance_id: String,
    },
    /// `resolve_network`.
    ResolveNetwork {
        /// Requested VPC, if any.
        vpc_id: Option<String>,
    },
}

impl ProviderCall {
    /// Returns the operation name, matching the [`Provider`] method.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ListInstances => "list_instances",
            Self::CreateSecurityGroup { .. } => "create_security_group",
            Self::AuthorizeIngress { .. } => "authorize_ingress",
            Self::DeleteSecurityGroup { .. } => "delete_security_group",
            Self::DescribeSecurityGroups => "describe_security_groups",
            Self::CreateInstances { .. } => "create_instances",
            Self::GetInstanceState { .. } => "get_instance_state",
            Self::AllocateAddress => "allocate_address",
            Self::AssociateAddress { .. } => "associate_address",
            Self::DisassociateAddress { .. } => "disassociate_address",
            Self::ReleaseAddress { .. } => "release_address",
            Self::DescribeAddresses => "describe_addresses",
            Self::TerminateInstance { .. } => "terminate_instance",
            Self::ResolveNetwork { .. } => "resolve_network",
        }
    }
}

#[derive(Clone, Debug)]
struct FakeInstance {
    id: String,
    name: Option<String>,
    state: InstanceState,
    private_ip: String,
    public_ip: Option<String>,
    group_ids: Vec<String>,
    polls_until_settled: u32,
}

#[derive(Debug, Default)]
struct FakeCloud {
    instances: Vec<FakeInstance>,
    groups: Vec<ExistingSecurityGroup>,
    ingress: BTreeMap<String, Vec<IngressRule>>,
    addresses: Vec<Address>,
    network: Option<NetworkContext>,
    calls: Vec<ProviderCall>,
    failures: BTreeMap<String, String>,
    pending_polls: u32,
    terminate_polls: u32,
    next_id: u32,
}

impl FakeCloud {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self, operation: &str) -> Result<(), FakeProviderError> {
        self.failures
            .get(operation)
            .map_or(Ok(()), |message| Err(fail(operation, message)))
    }

    fn instance_mut(&mut self, instance_id: &str) -> Option<&mut FakeInstance> {
        self.instances
            .iter_mut()
            .find(|instance| instance.id == instance_id)
    }
}

fn fail(operation: &str, message: &str) -> FakeProviderError {
    FakeProviderError {
        operation: operation.to_owned(),
        message: message.to_owned(),
    }
}

/// In-memory cloud implementing [`Provider`].
///
/// It enforces the provider rules the workflow depends on: an associated
/// address cannot be released, a group referenced by a live instance cannot be
/// deleted, and group names are unique. State transitions take a configurable
/// number of polls so wait loops are exercised.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    cloud: Shared<FakeCloud>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    /// Creates an empty account with one VPC (`vpc-1`, `10.0.0.0/16`) and one
    /// subnet (`subnet-1`).
    #[must_use]
    pub fn new() -> Self {
        let cloud = FakeCloud {
            network: Some(NetworkContext {
                vpc_id: String::from("vpc-1"),
                subnet_id: String::from("subnet-1"),
                cidr: String::from("10.0.0.0/16"),
            }),
            ..FakeCloud::default()
        };
        Self {
            cloud: Arc::new(std::sync::Mutex::new(cloud)),
        }
    }

    /// Replaces the network returned by `resolve_network`.
    pub fn set_network(&self, network: Option<NetworkContext>) {
        locked(&self.cloud, |cloud| cloud.network = network);
    }

    /// Number of `get_instance_state` polls a new instance stays `pending`.
    pub fn set_pending_polls(&self, polls: u32) {
        locked(&self.cloud, |cloud| cloud.pending_polls = polls);
    }

    /// Number of `get_instance_state` polls a terminating instance stays
    /// `shutting-down`.
    pub fn set_terminate_polls(&self, polls: u32) {
        locked(&self.cloud, |cloud| cloud.terminate_polls = polls);
    }

    /// Makes every call to `operation` fail with `message`.
    pub fn fail_operation(&self, operation: &str, message: &str) {
        locked(&self.cloud, |cloud| {
            cloud
                .failures
                .insert(operation.to_owned(), message.to_owned());
        });
    }

    /// Seeds an existing instance tagged `name`; when `public_ip` is given an
    /// associated address is seeded too. Returns the instance id.
    pub fn add_instance(&self, name: &str, state: InstanceState, public_ip: Option<&str>) -> String {
        locked(&self.cloud, |cloud| {
            let n = cloud.next();
            let id = format!("i-existing{n}");
            if let Some(ip) = public_ip {
                cloud.addresses.push(Address {
                    allocation_id: format!("eipalloc-existing{n}"),
                    association_id: Some(format!("eipassoc-existing{n}")),
                    instance_id: Some(id.clone()),
                    public_ip: ip.to_owned(),
                });
            }
            cloud.instances.push(FakeInstance {
                id: id.clone(),
                name: Some(name.to_owned()),
                state,
                private_ip: format!("10.0.9.{n}"),
                public_ip: public_ip.map(str::to_owned),
                group_ids: Vec::new(),
                polls_until_settled: 0,
            });
            id
        })
    }

    /// Seeds an existing security group and returns its id.
    pub fn add_security_group(&self, name: &str) -> String {
        locked(&self.cloud, |cloud| {
            let id = format!("sg-existing{}", cloud.next());
            cloud.groups.push(ExistingSecurityGroup {
                id: id.clone(),
                name: name.to_owned(),
            });
            id
        })
    }

    /// Attaches a group to an instance so deletion is rejected until the
    /// instance is terminated.
    pub fn attach_group(&self, instance_id: &str, group_id: &str) {
        locked(&self.cloud, |cloud| {
            if let Some(instance) = cloud.instance_mut(instance_id) {
                instance.group_ids.push(group_id.to_owned());
            }
        });
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        locked(&self.cloud, |cloud| cloud.calls.clone())
    }

    /// Returns the operation names called so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<&'static str> {
        self.calls().iter().map(ProviderCall::operation).collect()
    }

    /// Counts calls to `operation`.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Returns the current instances without recording a call.
    #[must_use]
    pub fn instances(&self) -> Vec<ExistingInstance> {
        locked(&self.cloud, |cloud| {
            cloud.instances.iter().map(existing).collect()
        })
    }

    /// Returns the current security groups without recording a call.
    #[must_use]
    pub fn security_groups(&self) -> Vec<ExistingSecurityGroup> {
        locked(&self.cloud, |cloud| cloud.groups.clone())
    }

    /// Returns the ingress rules granted on `group_id`.
    #[must_use]
    pub fn ingress_rules(&self, group_id: &str) -> Vec<IngressRule> {
        locked(&self.cloud, |cloud| {
            cloud.ingress.get(group_id).cloned().unwrap_or_default()
        })
    }

    /// Returns the current addresses without recording a call.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        locked(&self.cloud, |cloud| cloud.addresses.clone())
    }

    fn call<T>(
        &self,
        call: ProviderCall,
        action: impl FnOnce(&mut FakeCloud) -> Result<T, FakeProviderError>,
    ) -> Result<T, FakeProviderError> {
        locked(&self.cloud, |cloud| {
            let operation = call.operation();
            cloud.calls.push(call);
            cloud.check(operation)?;
            action(cloud)
        })
    }
}

fn existing(instance: &FakeInstance) -> ExistingInstance {
    ExistingInstance {
        id: instance.id.clone(),
        name: instance.name.clone(),
        state: instance.state.clone(),
        public_ip: instance.public_ip.clone(),
    }
}

fn ready<'a, T: Send + 'a>(
    result: Result<T, FakeProviderError>,
) -> ProviderFuture<'a, T, FakeProviderError> {
    Box::pin(std::future::ready(result))
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<ExistingInstance>, Self::Error> {
        ready(self.call(ProviderCall::ListInstances, |cloud| {
            Ok(cloud.instances.iter().map(existing).collect())
        }))
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        vpc_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        let call = ProviderCall::CreateSecurityGroup {
            name: name.to_owned(),
            vpc_id: vpc_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            if cloud.groups.iter().any(|group| group.name == name) {
                return Err(fail(
                    "create_security_group",
                    &format!("InvalidGroup.Duplicate: {name} already exists"),
                ));
            }
            let id = format!("sg-{}", cloud.next());
            cloud.groups.push(ExistingSecurityGroup {
                id: id.clone(),
                name: name.to_owned(),
            });
            Ok(id)
        }))
    }

    fn authorize_ingress<'a>(
        &'a self,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let call = ProviderCall::AuthorizeIngress {
            group_id: group_id.to_owned(),
            rule: rule.clone(),
        };
        ready(self.call(call, |cloud| {
            if !cloud.groups.iter().any(|group| group.id == group_id) {
                return Err(fail("authorize_ingress", "InvalidGroup.NotFound"));
            }
            cloud
                .ingress
                .entry(group_id.to_owned())
                .or_default()
                .push(rule.clone());
            Ok(())
        }))
    }

    fn delete_security_group<'a>(
        &'a self,
        group_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let call = ProviderCall::DeleteSecurityGroup {
            group_id: group_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            let in_use = cloud.instances.iter().any(|instance| {
                instance.state != InstanceState::Terminated
                    && instance.group_ids.iter().any(|id| id == group_id)
            });
            if in_use {
                return Err(fail(
                    "delete_security_group",
                    &format!("DependencyViolation: {group_id} has a dependent object"),
                ));
            }
            let before = cloud.groups.len();
            cloud.groups.retain(|group| group.id != group_id);
            if cloud.groups.len() == before {
                return Err(fail("delete_security_group", "InvalidGroup.NotFound"));
            }
            cloud.ingress.remove(group_id);
            Ok(())
        }))
    }

    fn describe_security_groups(
        &self,
    ) -> ProviderFuture<'_, Vec<ExistingSecurityGroup>, Self::Error> {
        ready(self.call(ProviderCall::DescribeSecurityGroups, |cloud| {
            Ok(cloud.groups.clone())
        }))
    }

    fn create_instances<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, Vec<CreatedInstance>, Self::Error> {
        let call = ProviderCall::CreateInstances {
            request: request.clone(),
        };
        ready(self.call(call, |cloud| {
            let name = request
                .tags
                .iter()
                .find(|(key, _)| key == "Name")
                .map(|(_, value)| value.clone());
            let mut created = Vec::new();
            for _ in 0..request.count {
                let n = cloud.next();
                let instance = FakeInstance {
                    id: format!("i-{n:04}"),
                    name: name.clone(),
                    state: InstanceState::Pending,
                    private_ip: format!("10.0.1.{n}"),
                    public_ip: None,
                    group_ids: request.security_group_ids.clone(),
                    polls_until_settled: cloud.pending_polls,
                };
                created.push(CreatedInstance {
                    id: instance.id.clone(),
                    private_ip: instance.private_ip.clone(),
                });
                cloud.instances.push(instance);
            }
            Ok(created)
        }))
    }

    fn get_instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, InstanceState, Self::Error> {
        let call = ProviderCall::GetInstanceState {
            instance_id: instance_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            let instance = cloud
                .instance_mut(instance_id)
                .ok_or_else(|| fail("get_instance_state", "InvalidInstanceID.NotFound"))?;
            if instance.polls_until_settled > 0 {
                instance.polls_until_settled -= 1;
            } else {
                instance.state = match instance.state {
                    InstanceState::Pending => InstanceState::Running,
                    InstanceState::ShuttingDown => InstanceState::Terminated,
                    ref other => other.clone(),
                };
            }
            Ok(instance.state.clone())
        }))
    }

    fn allocate_address(&self) -> ProviderFuture<'_, AllocatedAddress, Self::Error> {
        ready(self.call(ProviderCall::AllocateAddress, |cloud| {
            let n = cloud.next();
            let address = Address {
                allocation_id: format!("eipalloc-{n}"),
                association_id: None,
                instance_id: None,
                public_ip: format!("203.0.113.{n}"),
            };
            let allocated = AllocatedAddress {
                allocation_id: address.allocation_id.clone(),
                public_ip: address.public_ip.clone(),
            };
            cloud.addresses.push(address);
            Ok(allocated)
        }))
    }

    fn associate_address<'a>(
        &'a self,
        allocation_id: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let call = ProviderCall::AssociateAddress {
            allocation_id: allocation_id.to_owned(),
            instance_id: instance_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            let n = cloud.next();
            let public_ip = {
                let address = cloud
                    .addresses
                    .iter_mut()
                    .find(|address| address.allocation_id == allocation_id)
                    .ok_or_else(|| fail("associate_address", "InvalidAllocationID.NotFound"))?;
                address.association_id = Some(format!("eipassoc-{n}"));
                address.instance_id = Some(instance_id.to_owned());
                address.public_ip.clone()
            };
            let instance = cloud
                .instance_mut(instance_id)
                .ok_or_else(|| fail("associate_address", "InvalidInstanceID.NotFound"))?;
            instance.public_ip = Some(public_ip);
            Ok(())
        }))
    }

    fn disassociate_address<'a>(
        &'a self,
        association_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let call = ProviderCall::DisassociateAddress {
            association_id: association_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            let address = cloud
                .addresses
                .iter_mut()
                .find(|address| address.association_id.as_deref() == Some(association_id))
                .ok_or_else(|| fail("disassociate_address", "InvalidAssociationID.NotFound"))?;
            address.association_id = None;
            let instance_id = address.instance_id.take();
            if let Some(id) = instance_id
                && let Some(instance) = cloud.instance_mut(&id)
            {
                instance.public_ip = None;
            }
            Ok(())
        }))
    }

    fn release_address<'a>(
        &'a self,
        allocation_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let call = ProviderCall::ReleaseAddress {
            allocation_id: allocation_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            let position = cloud
                .addresses
                .iter()
                .position(|address| address.allocation_id == allocation_id)
                .ok_or_else(|| fail("release_address", "InvalidAllocationID.NotFound"))?;
            let still_associated = cloud
                .addresses
                .get(position)
                .is_some_and(|address| address.association_id.is_some());
            if still_associated {
                return Err(fail("release_address", "InvalidIPAddress.InUse"));
            }
            cloud.addresses.remove(position);
            Ok(())
        }))
    }

    fn describe_addresses(&self) -> ProviderFuture<'_, Vec<Address>, Self::Error> {
        ready(self.call(ProviderCall::DescribeAddresses, |cloud| {
            Ok(cloud.addresses.clone())
        }))
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let call = ProviderCall::TerminateInstance {
            instance_id: instance_id.to_owned(),
        };
        ready(self.call(call, |cloud| {
            let polls = cloud.terminate_polls;
            let instance = cloud
                .instance_mut(instance_id)
                .ok_or_else(|| fail("terminate_instance", "InvalidInstanceID.NotFound"))?;
            if !instance.state.is_terminal() {
                instance.state = InstanceState::ShuttingDown;
                instance.polls_until_settled = polls;
            }
            Ok(())
        }))
    }

    fn resolve_network<'a>(
        &'a self,
        vpc_id: Option<&'a str>,
    ) -> ProviderFuture<'a, Option<NetworkContext>, Self::Error> {
        let call = ProviderCall::ResolveNetwork {
            vpc_id: vpc_id.map(str::to_owned),
        };
        ready(self.call(call, |cloud| {
            Ok(cloud
                .network
                .clone()
                .filter(|network| vpc_id.is_none_or(|id| id == network.vpc_id)))
        }))
    }
}

/// An interaction recorded by [`FakeShell`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ShellEvent {
    /// A connection attempt, successful or not.
    Connect {
        /// Target host.
        host: String,
        /// Login user.
        user: String,
        /// Whether the attempt succeeded.
        succeeded: bool,
    },
    /// A command execution.
    Execute {
        /// Command text as received.
        command: String,
        /// Standard input supplied, if any.
        stdin: Option<String>,
    },
    /// A session close.
    Close {
        /// Host of the closed session.
        host: String,
    },
}

#[derive(Debug, Default)]
struct ShellScript {
    queued_connects: VecDeque<bool>,
    fail_every_connect: bool,
    exit_codes: Vec<(String, i32)>,
    events: Vec<ShellEvent>,
}

/// Scripted [`RemoteShell`] that records every interaction.
///
/// Commands succeed with exit status zero unless a rule registered through
/// [`FakeShell::exit_code_for`] matches a substring of the command.
#[derive(Clone, Debug, Default)]
pub struct FakeShell {
    script: Shared<ShellScript>,
}

impl FakeShell {
    /// Creates a shell where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues explicit outcomes (`true` succeeds) for the next connection
    /// attempts. Queued outcomes take precedence over the other rules.
    pub fn queue_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        locked(&self.script, |script| script.queued_connects.extend(outcomes));
    }

    /// Makes every connection attempt fail.
    pub fn fail_all_connects(&self) {
        locked(&self.script, |script| script.fail_every_connect = true);
    }

    /// Returns `code` for commands containing `needle`.
    pub fn exit_code_for(&self, needle: &str, code: i32) {
        locked(&self.script, |script| {
            script.exit_codes.push((needle.to_owned(), code));
        });
    }

    /// Returns all recorded events in order.
    #[must_use]
    pub fn events(&self) -> Vec<ShellEvent> {
        locked(&self.script, |script| script.events.clone())
    }

    /// Returns the executed command strings in order.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ShellEvent::Execute { command, .. } => Some(command),
                ShellEvent::Connect { .. } | ShellEvent::Close { .. } => None,
            })
            .collect()
    }

    /// Returns the executed commands paired with the stdin they received.
    #[must_use]
    pub fn executed_with_stdin(&self) -> Vec<(String, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ShellEvent::Execute { command, stdin } => Some((command, stdin)),
                ShellEvent::Connect { .. } | ShellEvent::Close { .. } => None,
            })
            .collect()
    }

    /// Counts connection attempts, including failed ones.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ShellEvent::Connect { .. }))
            .count()
    }
}

impl RemoteShell for FakeShell {
    fn connect(
        &self,
        host: &str,
        identity_file: &str,
        user: &str,
    ) -> Result<Session, ShellError> {
        let succeeded = locked(&self.script, |script| {
            let succeeded = script
                .queued_connects
                .pop_front()
                .unwrap_or(!script.fail_every_connect);
            script.events.push(ShellEvent::Connect {
                host: host.to_owned(),
                user: user.to_owned(),
                succeeded,
            });
            succeeded
        });
        if !succeeded {
            return Err(ShellError::Connection {
                host: host.to_owned(),
                user: user.to_owned(),
                message: String::from("Connection refused"),
            });
        }
        Ok(Session {
            host: host.to_owned(),
            user: user.to_owned(),
            identity_file: identity_file.to_owned(),
        })
    }

    fn execute(
        &self,
        _session: &Session,
        command: &RemoteCommand,
    ) -> Result<CommandOutcome, ShellError> {
        locked(&self.script, |script| {
            script.events.push(ShellEvent::Execute {
                command: command.command.clone(),
                stdin: command.stdin.clone(),
            });
            let exit_code = script
                .exit_codes
                .iter()
                .find(|(needle, _)| command.command.contains(needle.as_str()))
                .map_or(0, |(_, code)| *code);
            Ok(CommandOutcome {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }

    fn close(&self, session: Session) {
        locked(&self.script, |script| {
            script.events.push(ShellEvent::Close { host: session.host });
        });
    }
}

/// Password generator returning a fixed sequence, cycling when exhausted.
#[derive(Debug)]
pub struct FixedPasswords {
    values: Vec<String>,
    next: AtomicUsize,
}

impl FixedPasswords {
    /// Creates a generator over `values`.
    #[must_use]
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl PasswordGenerator for FixedPasswords {
    fn generate(&self) -> String {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.values
            .iter()
            .cycle()
            .nth(index)
            .cloned()
            .unwrap_or_default()
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Builds an [`InstanceSpec`] with fixed image, size, and placement values.
///
/// # Errors
///
/// Returns [`SpecError`] when `name` or a group definition is invalid.
pub fn sample_spec(
    name: &str,
    groups: &[(&str, RuleType, u16)],
) -> Result<InstanceSpec, SpecError> {
    groups
        .iter()
        .try_fold(
            InstanceSpec::builder()
                .name(name)
                .owner("ops")
                .purpose("testing")
                .image_id("ami-0123456789")
                .instance_type("t2.micro")
                .availability_zone("ap-southeast-2c")
                .key_name("deploy-key")
                .external_cidr("198.51.100.7/32"),
            |builder, (group, rule, port)| {
                SecurityGroupSpec::new(*group, *rule, *port).map(|spec| builder.security_group(spec))
            },
        )?
        .build()
}

/// Builds a provisioned [`InstanceRecord`] with fixed addresses and passwords.
#[must_use]
pub fn sample_record(name: &str) -> InstanceRecord {
    InstanceRecord {
        name: name.to_owned(),
        id: format!("i-{name}"),
        private_ip: String::from("10.0.1.15"),
        public_ip: String::from("203.0.113.10"),
        vpc_id: String::from("vpc-1"),
        subnet_id: String::from("subnet-1"),
        security_groups: Vec::new(),
        admin_password: String::from("admin-secret-value"),
        readonly_password: String::from("readonly-secret-value"),
    }
}
