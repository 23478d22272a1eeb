//! BDD scenarios for the deployment workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{DeploymentWorld, deployment_world};

#[scenario(
    path = "tests/features/deployment.feature",
    name = "Fresh deployment of a single instance"
)]
fn scenario_fresh_deployment(deployment_world: DeploymentWorld) {
    let _ = deployment_world;
}

#[scenario(
    path = "tests/features/deployment.feature",
    name = "Re-deploying over an existing instance"
)]
fn scenario_redeploy(deployment_world: DeploymentWorld) {
    let _ = deployment_world;
}

#[scenario(
    path = "tests/features/deployment.feature",
    name = "Shared security group across instances"
)]
fn scenario_shared_group(deployment_world: DeploymentWorld) {
    let _ = deployment_world;
}

#[scenario(
    path = "tests/features/deployment.feature",
    name = "Post-configuration script skips comments and blank lines"
)]
fn scenario_post_config_filtering(deployment_world: DeploymentWorld) {
    let _ = deployment_world;
}

#[scenario(
    path = "tests/features/deployment.feature",
    name = "Unreachable host fails configuration"
)]
fn scenario_unreachable_host(deployment_world: DeploymentWorld) {
    let _ = deployment_world;
}
