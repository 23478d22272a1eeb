//! Desired-state document loading.
//!
//! The document is JSON naming the provider, an optional proxy and VPC, and
//! the instances to deploy. Entries are converted through
//! [`InstanceSpec::builder`] so every field is validated before any provider
//! call is made.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::desired::{InstanceSpec, RuleType, SecurityGroupSpec, SpecError, validate_specs};
use crate::files;

/// The only provider the document may select.
pub const SUPPORTED_PROVIDER: &str = "aws";

/// Errors raised while loading a desired-state document.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The document could not be read.
    #[error("failed to read deployment document {path}: {message}")]
    Io {
        /// Document path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The document is not valid JSON of the expected shape.
    #[error("failed to parse deployment document {path}: {message}")]
    Parse {
        /// Document path.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// The document selects a provider other than AWS.
    #[error("unsupported provider `{0}`: only aws deployments are supported")]
    UnsupportedProvider(String),
    /// The document lists no instances.
    #[error("deployment document lists no instances")]
    NoInstances,
    /// An instance entry failed validation.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    provider: String,
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default)]
    vpc_id: Option<String>,
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawInstance {
    name: String,
    owner: String,
    purpose: String,
    image_id: String,
    instance_type: String,
    availability_zone: String,
    key_name: String,
    external_cidr: String,
    security_groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    name: String,
    rule: String,
    port: u16,
}

impl RawInstance {
    fn into_spec(self) -> Result<InstanceSpec, SpecError> {
        let builder = InstanceSpec::builder()
            .name(self.name)
            .owner(self.owner)
            .purpose(self.purpose)
            .image_id(self.image_id)
            .instance_type(self.instance_type)
            .availability_zone(self.availability_zone)
            .key_name(self.key_name)
            .external_cidr(self.external_cidr);
        self.security_groups
            .into_iter()
            .try_fold(builder, |acc, group| {
                let rule: RuleType = group.rule.parse()?;
                SecurityGroupSpec::new(group.name, rule, group.port)
                    .map(|spec| acc.security_group(spec))
            })?
            .build()
    }
}

/// A validated desired-state document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentDocument {
    /// Proxy URL exported to provider CLI processes.
    pub proxy: Option<String>,
    /// VPC to deploy into; the provider default when absent.
    pub vpc_id: Option<String>,
    /// Desired instances in document order.
    pub instances: Vec<InstanceSpec>,
}

impl DeploymentDocument {
    /// Reads and validates the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError`] when the file is unreadable or malformed,
    /// selects an unsupported provider, or contains an invalid instance.
    pub fn from_path(path: &Utf8Path) -> Result<Self, DeploymentError> {
        let contents = files::read_to_string(path).map_err(|err| DeploymentError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(&contents).map_err(|err| match err {
            DeploymentError::Parse { message, .. } => DeploymentError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses and validates a document held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError`] as [`DeploymentDocument::from_path`] does;
    /// parse errors carry an empty path.
    pub fn parse(contents: &str) -> Result<Self, DeploymentError> {
        let raw: RawDocument =
            serde_json::from_str(contents).map_err(|err| DeploymentError::Parse {
                path: Utf8PathBuf::new(),
                message: err.to_string(),
            })?;

        let provider = raw.provider.trim().to_ascii_lowercase();
        if provider != SUPPORTED_PROVIDER {
            return Err(DeploymentError::UnsupportedProvider(raw.provider));
        }
        if raw.instances.is_empty() {
            return Err(DeploymentError::NoInstances);
        }

        let instances = raw
            .instances
            .into_iter()
            .map(RawInstance::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        validate_specs(&instances)?;

        Ok(Self {
            proxy: raw.proxy.filter(|proxy| !proxy.trim().is_empty()),
            vpc_id: raw.vpc_id.filter(|vpc| !vpc.trim().is_empty()),
            instances,
        })
    }
}
