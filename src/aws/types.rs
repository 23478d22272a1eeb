//! JSON shapes emitted by `aws ec2 ... --output json`.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeInstancesOutput {
    #[serde(default)]
    pub(super) reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Reservation {
    #[serde(default)]
    pub(super) instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Instance {
    pub(super) instance_id: String,
    pub(super) state: Option<Ec2State>,
    #[serde(default)]
    pub(super) tags: Vec<Ec2Tag>,
    pub(super) public_ip_address: Option<String>,
    pub(super) private_ip_address: Option<String>,
}

impl Ec2Instance {
    pub(super) fn name_tag(&self) -> Option<String> {
        self.tags
            .iter()
            .find(|tag| tag.key == "Name")
            .map(|tag| tag.value.clone())
    }

    pub(super) fn state_name(&self) -> &str {
        self.state.as_ref().map_or("unknown", |state| state.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2State {
    pub(super) name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Tag {
    pub(super) key: String,
    #[serde(default)]
    pub(super) value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct RunInstancesOutput {
    #[serde(default)]
    pub(super) instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CreateSecurityGroupOutput {
    pub(super) group_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeSecurityGroupsOutput {
    #[serde(default)]
    pub(super) security_groups: Vec<Ec2SecurityGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2SecurityGroup {
    pub(super) group_id: String,
    pub(super) group_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AllocateAddressOutput {
    pub(super) allocation_id: String,
    pub(super) public_ip: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeAddressesOutput {
    #[serde(default)]
    pub(super) addresses: Vec<Ec2Address>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Address {
    pub(super) allocation_id: String,
    pub(super) association_id: Option<String>,
    pub(super) instance_id: Option<String>,
    pub(super) public_ip: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeVpcsOutput {
    #[serde(default)]
    pub(super) vpcs: Vec<Ec2Vpc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Vpc {
    pub(super) vpc_id: String,
    pub(super) cidr_block: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeSubnetsOutput {
    #[serde(default)]
    pub(super) subnets: Vec<Ec2Subnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Subnet {
    pub(super) subnet_id: String,
}
