//! Created-state records produced by provisioning.

use serde::{Deserialize, Serialize};

use crate::desired::{Protocol, RuleType};

/// VPC, subnet, and CIDR resolved once per orchestration run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkContext {
    /// VPC identifier.
    pub vpc_id: String,
    /// Subnet identifier used for new instances.
    pub subnet_id: String,
    /// IPv4 CIDR block of the VPC.
    pub cidr: String,
}

/// A security group created during this run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SecurityGroupRecord {
    /// Group name, unique per account.
    pub name: String,
    /// Provider-assigned group identifier.
    pub id: String,
    /// Rule type the CIDR was derived from.
    pub rule: RuleType,
    /// Port opened by the ingress rule.
    pub port: u16,
    /// Protocol opened by the ingress rule.
    #[serde(default)]
    pub protocol: Protocol,
    /// CIDR admitted by the ingress rule.
    pub cidr: String,
}

/// Durable output of provisioning for one instance.
///
/// Records are persisted to the state file and reloaded by reuse runs, so the
/// serialised field names are part of the on-disk format.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceRecord {
    /// Stable instance name matching the desired spec.
    pub name: String,
    /// Provider-assigned instance identifier.
    pub id: String,
    /// Private IPv4 address.
    pub private_ip: String,
    /// Public (elastic) IPv4 address.
    pub public_ip: String,
    /// VPC the instance lives in.
    pub vpc_id: String,
    /// Subnet the instance lives in.
    pub subnet_id: String,
    /// Groups attached to the instance.
    pub security_groups: Vec<SecurityGroupRecord>,
    /// Generated admin credential.
    pub admin_password: String,
    /// Generated read-only credential.
    pub readonly_password: String,
}
