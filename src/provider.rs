//! Provider capability consumed by the reconciliation and provisioning
//! engines.
//!
//! The trait mirrors the EC2 calls the workflow needs and nothing more.
//! Implementations return boxed futures so engines stay generic over the
//! provider without naming its future types. Returned futures must not block
//! the polling thread; implementations backed by blocking I/O run it on
//! tokio's blocking pool.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::desired::Protocol;
use crate::records::NetworkContext;

/// Lifecycle state reported by the provider for an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Launch in progress.
    Pending,
    /// Instance is up.
    Running,
    /// Termination in progress.
    ShuttingDown,
    /// Instance is gone.
    Terminated,
    /// Stop in progress.
    Stopping,
    /// Instance is stopped.
    Stopped,
    /// Any state name this crate does not model.
    Other(String),
}

impl InstanceState {
    /// Parses a provider state name such as `running` or `shutting-down`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the provider's spelling of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Other(name) => name,
        }
    }

    /// Returns `true` for states from which termination is already under
    /// way or complete.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance that already exists in the provider account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExistingInstance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Value of the `Name` tag, if any.
    pub name: Option<String>,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Public address currently attached, if any.
    pub public_ip: Option<String>,
}

/// An existing security group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExistingSecurityGroup {
    /// Provider-assigned identifier.
    pub id: String,
    /// Group name.
    pub name: String,
}

/// Details returned synchronously by instance creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedInstance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Private IPv4 address.
    pub private_ip: String,
}

/// A public address held by the account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Address {
    /// Allocation identifier used to release the address.
    pub allocation_id: String,
    /// Association identifier, present while the address is attached.
    pub association_id: Option<String>,
    /// Instance the address is attached to, if any.
    pub instance_id: Option<String>,
    /// The IPv4 address itself.
    pub public_ip: String,
}

/// A freshly allocated public address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocatedAddress {
    /// Allocation identifier.
    pub allocation_id: String,
    /// The IPv4 address.
    pub public_ip: String,
}

/// Single ingress rule granted on a security group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRule {
    /// Protocol to admit.
    pub protocol: Protocol,
    /// Port to open.
    pub port: u16,
    /// Source CIDR.
    pub cidr: String,
}

/// Parameters for launching exactly one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Machine image identifier.
    pub image_id: String,
    /// Instance size or class.
    pub instance_type: String,
    /// Key-pair identifier.
    pub key_name: String,
    /// Subnet to launch into.
    pub subnet_id: String,
    /// Availability zone placement.
    pub availability_zone: String,
    /// Security groups to attach.
    pub security_group_ids: Vec<String>,
    /// Tags applied at launch, in order.
    pub tags: Vec<(String, String)>,
    /// Number of instances; the workflow always requests one.
    pub count: u32,
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Resource lifecycle calls the workflow needs from a cloud provider.
pub trait Provider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance visible to the account.
    fn list_instances(&self) -> ProviderFuture<'_, Vec<ExistingInstance>, Self::Error>;

    /// Creates a security group in `vpc_id` and returns its identifier.
    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        vpc_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Adds one ingress rule to a group.
    fn authorize_ingress<'a>(
        &'a self,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Deletes a security group. Providers reject deletion while the group
    /// is still attached.
    fn delete_security_group<'a>(&'a self, group_id: &'a str)
    -> ProviderFuture<'a, (), Self::Error>;

    /// Lists every security group visible to the account.
    fn describe_security_groups(
        &self,
    ) -> ProviderFuture<'_, Vec<ExistingSecurityGroup>, Self::Error>;

    /// Launches instances and returns their identifiers and private IPs.
    fn create_instances<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, Vec<CreatedInstance>, Self::Error>;

    /// Fetches the current state of one instance.
    fn get_instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, InstanceState, Self::Error>;

    /// Allocates a new public address.
    fn allocate_address(&self) -> ProviderFuture<'_, AllocatedAddress, Self::Error>;

    /// Attaches an allocated address to an instance.
    fn associate_address<'a>(
        &'a self,
        allocation_id: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Detaches an address.
    fn disassociate_address<'a>(
        &'a self,
        association_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Returns an address to the provider pool.
    fn release_address<'a>(&'a self, allocation_id: &'a str)
    -> ProviderFuture<'a, (), Self::Error>;

    /// Lists every public address held by the account.
    fn describe_addresses(&self) -> ProviderFuture<'_, Vec<Address>, Self::Error>;

    /// Requests termination of one instance.
    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Resolves the VPC, a subnet within it, and the VPC CIDR.
    ///
    /// With `vpc_id` unset the first VPC reported by the provider is used.
    /// Returns `Ok(None)` when no usable VPC or subnet exists.
    fn resolve_network<'a>(
        &'a self,
        vpc_id: Option<&'a str>,
    ) -> ProviderFuture<'a, Option<NetworkContext>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pending", InstanceState::Pending, false)]
    #[case("running", InstanceState::Running, false)]
    #[case("shutting-down", InstanceState::ShuttingDown, true)]
    #[case("terminated", InstanceState::Terminated, true)]
    #[case("stopped", InstanceState::Stopped, false)]
    #[case("rebooting", InstanceState::Other(String::from("rebooting")), false)]
    fn state_names_round_trip(
        #[case] name: &str,
        #[case] expected: InstanceState,
        #[case] terminal: bool,
    ) {
        let state = InstanceState::from_name(name);
        assert_eq!(state, expected);
        assert_eq!(state.as_str(), name);
        assert_eq!(state.is_terminal(), terminal);
    }
}
