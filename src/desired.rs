//! Desired-state types supplied by the caller.
//!
//! An [`InstanceSpec`] is immutable once built. The builder trims every field
//! and rejects missing values at the boundary so that provisioning never has
//! to deal with half-specified instances.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Determines which CIDR a security group rule admits.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Admit the caller's external CIDR.
    Public,
    /// Admit the VPC's internal CIDR.
    Private,
}

impl RuleType {
    /// Resolves the CIDR admitted by a rule of this type.
    ///
    /// `public` rules admit `external_cidr`; every other rule admits the VPC
    /// CIDR. Never both.
    #[must_use]
    pub fn resolve_cidr<'a>(self, external_cidr: &'a str, vpc_cidr: &'a str) -> &'a str {
        match self {
            Self::Public => external_cidr,
            Self::Private => vpc_cidr,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => formatter.write_str("public"),
            Self::Private => formatter.write_str("private"),
        }
    }
}

impl FromStr for RuleType {
    type Err = SpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(SpecError::UnknownRuleType(other.to_owned())),
        }
    }
}

/// Transport protocol admitted by an ingress rule.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP, the only protocol this workflow opens.
    #[default]
    Tcp,
}

impl Protocol {
    /// Returns the provider spelling of the protocol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
        }
    }
}

/// A named firewall rule set requested for one or more instances.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SecurityGroupSpec {
    /// Account-unique group name; the deduplication key across instances.
    pub name: String,
    /// Whether the rule admits the external or the VPC CIDR.
    pub rule: RuleType,
    /// Single TCP port opened by the rule.
    pub port: u16,
    /// Protocol of the ingress rule.
    #[serde(default)]
    pub protocol: Protocol,
}

impl SecurityGroupSpec {
    /// Creates a TCP group spec, trimming the name.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when the name is blank or the port is zero.
    pub fn new(name: impl Into<String>, rule: RuleType, port: u16) -> Result<Self, SpecError> {
        let trimmed_name = name.into().trim().to_owned();
        if trimmed_name.is_empty() {
            return Err(SpecError::MissingField(String::from("security_groups.name")));
        }
        if port == 0 {
            return Err(SpecError::InvalidPort {
                group: trimmed_name,
            });
        }
        Ok(Self {
            name: trimmed_name,
            rule,
            port,
            protocol: Protocol::Tcp,
        })
    }
}

/// Desired state for a single instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceSpec {
    /// Stable identity key; matched against the provider's `Name` tag.
    pub name: String,
    /// Value of the `Owner` tag.
    pub owner: String,
    /// Value of the `Purpose` tag.
    pub purpose: String,
    /// Machine image identifier (for example `ami-0abc`).
    pub image_id: String,
    /// Instance size or class (for example `t2.micro`).
    pub instance_type: String,
    /// Availability zone used for placement.
    pub availability_zone: String,
    /// Key pair registered with the provider.
    pub key_name: String,
    /// CIDR admitted by `public` rules.
    pub external_cidr: String,
    /// Security groups attached to the instance, in request order.
    pub security_groups: Vec<SecurityGroupSpec>,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the spec, returning the first missing field.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MissingField`] when a string field is empty and
    /// [`SpecError::NoSecurityGroups`] when no group is requested.
    pub fn validate(&self) -> Result<(), SpecError> {
        for (field, value) in [
            ("name", &self.name),
            ("owner", &self.owner),
            ("purpose", &self.purpose),
            ("image_id", &self.image_id),
            ("instance_type", &self.instance_type),
            ("availability_zone", &self.availability_zone),
            ("key_name", &self.key_name),
            ("external_cidr", &self.external_cidr),
        ] {
            if value.trim().is_empty() {
                return Err(SpecError::MissingField(field.to_owned()));
            }
        }
        if self.security_groups.is_empty() {
            return Err(SpecError::NoSecurityGroups {
                instance: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    owner: String,
    purpose: String,
    image_id: String,
    instance_type: String,
    availability_zone: String,
    key_name: String,
    external_cidr: String,
    security_groups: Vec<SecurityGroupSpec>,
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the owner tag.
    #[must_use]
    pub fn owner(mut self, value: impl Into<String>) -> Self {
        self.owner = value.into();
        self
    }

    /// Sets the purpose tag.
    #[must_use]
    pub fn purpose(mut self, value: impl Into<String>) -> Self {
        self.purpose = value.into();
        self
    }

    /// Sets the machine image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn availability_zone(mut self, value: impl Into<String>) -> Self {
        self.availability_zone = value.into();
        self
    }

    /// Sets the key pair name.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.key_name = value.into();
        self
    }

    /// Sets the external CIDR admitted by public rules.
    #[must_use]
    pub fn external_cidr(mut self, value: impl Into<String>) -> Self {
        self.external_cidr = value.into();
        self
    }

    /// Appends a security group.
    #[must_use]
    pub fn security_group(mut self, group: SecurityGroupSpec) -> Self {
        self.security_groups.push(group);
        self
    }

    /// Builds and validates the [`InstanceSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when a required field is missing or the same
    /// group name is requested twice for this instance.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            owner: self.owner.trim().to_owned(),
            purpose: self.purpose.trim().to_owned(),
            image_id: self.image_id.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            availability_zone: self.availability_zone.trim().to_owned(),
            key_name: self.key_name.trim().to_owned(),
            external_cidr: self.external_cidr.trim().to_owned(),
            security_groups: self.security_groups,
        };
        spec.validate()?;
        let mut seen = BTreeSet::new();
        for group in &spec.security_groups {
            if !seen.insert(group.name.as_str()) {
                return Err(SpecError::DuplicateGroup {
                    instance: spec.name.clone(),
                    group: group.name.clone(),
                });
            }
        }
        Ok(spec)
    }
}

/// Checks a whole desired-state list for cross-instance consistency.
///
/// Instance names must be unique, and a group name shared by several
/// instances must carry the same rule, port, and resolved external CIDR
/// everywhere it appears, because it is created only once.
///
/// # Errors
///
/// Returns [`SpecError::DuplicateInstance`] or
/// [`SpecError::ConflictingGroup`] on the first inconsistency.
pub fn validate_specs(specs: &[InstanceSpec]) -> Result<(), SpecError> {
    let mut names = BTreeSet::new();
    let mut groups: BTreeMap<&str, (&SecurityGroupSpec, &str)> = BTreeMap::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(SpecError::DuplicateInstance(spec.name.clone()));
        }
        for group in &spec.security_groups {
            let entry = groups
                .entry(group.name.as_str())
                .or_insert((group, spec.external_cidr.as_str()));
            let (first, first_cidr) = *entry;
            let cidr_conflicts =
                group.rule == RuleType::Public && first_cidr != spec.external_cidr;
            if first.rule != group.rule || first.port != group.port || cidr_conflicts {
                return Err(SpecError::ConflictingGroup(group.name.clone()));
            }
        }
    }
    Ok(())
}

/// Errors raised while validating desired state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a required field is empty.
    #[error("missing or empty field: {0}")]
    MissingField(String),
    /// Raised when an instance requests no security groups.
    #[error("instance {instance} requests no security groups")]
    NoSecurityGroups {
        /// Instance name.
        instance: String,
    },
    /// Raised when a group port is zero.
    #[error("security group {group} must open a non-zero port")]
    InvalidPort {
        /// Group name.
        group: String,
    },
    /// Raised when a rule type is neither `public` nor `private`.
    #[error("unknown security group rule type: {0}")]
    UnknownRuleType(String),
    /// Raised when one instance lists the same group twice.
    #[error("instance {instance} lists security group {group} more than once")]
    DuplicateGroup {
        /// Instance name.
        instance: String,
        /// Group name.
        group: String,
    },
    /// Raised when two instances share a name.
    #[error("instance name {0} is used more than once")]
    DuplicateInstance(String),
    /// Raised when a shared group name is declared with different rules.
    #[error("security group {0} is declared with conflicting rules")]
    ConflictingGroup(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn builder() -> InstanceSpecBuilder {
        InstanceSpec::builder()
            .name(" db1 ")
            .owner("ops")
            .purpose("testing")
            .image_id("ami-1")
            .instance_type("t2.micro")
            .availability_zone("ap-southeast-2c")
            .key_name("deploy-key")
            .external_cidr("203.0.113.4/32")
            .security_group(
                SecurityGroupSpec::new("public_ssh", RuleType::Public, 22).expect("group"),
            )
    }

    #[rstest]
    fn builder_trims_fields(builder: InstanceSpecBuilder) {
        let spec = builder.build().expect("spec should build");
        assert_eq!(spec.name, "db1");
        assert_eq!(spec.security_groups.len(), 1);
    }

    #[rstest]
    #[case("name", |b: InstanceSpecBuilder| b.name("  "))]
    #[case("image_id", |b: InstanceSpecBuilder| b.image_id(""))]
    #[case("key_name", |b: InstanceSpecBuilder| b.key_name(" "))]
    #[case("external_cidr", |b: InstanceSpecBuilder| b.external_cidr(""))]
    fn builder_rejects_blank_fields(
        builder: InstanceSpecBuilder,
        #[case] field: &str,
        #[case] blank: fn(InstanceSpecBuilder) -> InstanceSpecBuilder,
    ) {
        let err = blank(builder).build().expect_err("blank field");
        assert_eq!(err, SpecError::MissingField(field.to_owned()));
    }

    #[rstest]
    fn builder_rejects_missing_groups() {
        let err = InstanceSpec::builder()
            .name("db1")
            .owner("ops")
            .purpose("testing")
            .image_id("ami-1")
            .instance_type("t2.micro")
            .availability_zone("az")
            .key_name("key")
            .external_cidr("203.0.113.4/32")
            .build()
            .expect_err("no groups");
        assert!(matches!(err, SpecError::NoSecurityGroups { .. }));
    }

    #[rstest]
    fn builder_rejects_repeated_group(builder: InstanceSpecBuilder) {
        let err = builder
            .security_group(
                SecurityGroupSpec::new("public_ssh", RuleType::Public, 22).expect("group"),
            )
            .build()
            .expect_err("duplicate group");
        assert!(matches!(err, SpecError::DuplicateGroup { .. }));
    }

    #[rstest]
    fn group_spec_rejects_zero_port() {
        let err = SecurityGroupSpec::new("web", RuleType::Public, 0).expect_err("port 0");
        assert_eq!(
            err,
            SpecError::InvalidPort {
                group: String::from("web")
            }
        );
    }

    #[rstest]
    #[case(RuleType::Public, "203.0.113.4/32")]
    #[case(RuleType::Private, "172.31.0.0/16")]
    fn cidr_follows_rule_type(#[case] rule: RuleType, #[case] expected: &str) {
        assert_eq!(rule.resolve_cidr("203.0.113.4/32", "172.31.0.0/16"), expected);
    }

    #[rstest]
    #[case("public", Ok(RuleType::Public))]
    #[case(" private ", Ok(RuleType::Private))]
    #[case("internal", Err(SpecError::UnknownRuleType(String::from("internal"))))]
    fn rule_type_parses(#[case] input: &str, #[case] expected: Result<RuleType, SpecError>) {
        assert_eq!(input.parse::<RuleType>(), expected);
    }

    #[rstest]
    fn validate_specs_rejects_duplicate_instances(builder: InstanceSpecBuilder) {
        let spec = builder.build().expect("spec");
        let err = validate_specs(&[spec.clone(), spec]).expect_err("duplicate names");
        assert_eq!(err, SpecError::DuplicateInstance(String::from("db1")));
    }

    #[rstest]
    fn validate_specs_rejects_conflicting_shared_group(builder: InstanceSpecBuilder) {
        let first = builder.clone().build().expect("spec");
        let second = builder
            .name("db2")
            .external_cidr("198.51.100.7/32")
            .build()
            .expect("spec");
        let err = validate_specs(&[first, second]).expect_err("conflicting cidr");
        assert_eq!(err, SpecError::ConflictingGroup(String::from("public_ssh")));
    }

    #[rstest]
    fn validate_specs_accepts_consistent_shared_group(builder: InstanceSpecBuilder) {
        let first = builder.clone().build().expect("spec");
        let second = builder.name("db2").build().expect("spec");
        assert!(validate_specs(&[first, second]).is_ok());
    }
}
