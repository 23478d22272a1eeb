//! BDD step definitions for deployment behaviour.

use hangar::configure::ConfigureError;
use hangar::desired::RuleType;
use hangar::password::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use hangar::provider::InstanceState;
use hangar::test_support::{ProviderCall, sample_spec};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::DeploymentWorld;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message()))
    }
}

#[given("an empty account")]
fn empty_account(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    let instances = deployment_world.provider.instances();
    ensure(instances.is_empty(), || {
        format!("expected no instances, found {instances:?}")
    })
}

#[given("an existing running instance \"{name}\" holding a public address")]
fn existing_instance(deployment_world: &DeploymentWorld, name: String) {
    let id = deployment_world
        .provider
        .add_instance(&name, InstanceState::Running, Some("198.51.100.20"));
    *deployment_world.existing_instance.borrow_mut() = Some(id);
}

#[given("a desired instance \"{name}\" with a public \"{group}\" group on port {port:u16}")]
fn desired_instance(
    deployment_world: &DeploymentWorld,
    name: String,
    group: String,
    port: u16,
) -> Result<(), StepError> {
    let spec = sample_spec(&name, &[(group.as_str(), RuleType::Public, port)])
        .map_err(|err| StepError::Assertion(format!("invalid spec: {err}")))?;
    deployment_world.specs.borrow_mut().push(spec);
    Ok(())
}

#[given("configuration is skipped")]
fn configuration_skipped(deployment_world: &DeploymentWorld) {
    *deployment_world.skip_configuration.borrow_mut() = true;
}

#[given("a reachable host")]
fn reachable_host() {}

#[given("a host that refuses connections")]
fn unreachable_host(deployment_world: &DeploymentWorld) {
    deployment_world.shell.fail_all_connects();
}

#[given("a post-configuration script of \"# comment\", \"\", and \"echo hi\"")]
fn post_config_script(deployment_world: &DeploymentWorld) {
    *deployment_world.post_config.borrow_mut() = vec![
        String::from("# comment"),
        String::new(),
        String::from("echo hi"),
    ];
}

#[when("the deployment runs")]
fn deployment_runs(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    deployment_world.run_deployment()?;
    Ok(())
}

#[when("the host is configured")]
fn host_configured(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    deployment_world.configure_host()?;
    Ok(())
}

#[then("the deployment succeeds")]
fn deployment_succeeds(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    let report = deployment_world.report.borrow();
    let Some(report) = report.as_ref() else {
        return Err(StepError::Assertion(String::from("deployment did not run")));
    };
    ensure(report.succeeded(), || {
        format!("deployment failed: {:?}", report.error)
    })
}

fn assert_count(
    deployment_world: &DeploymentWorld,
    operation: &str,
    expected: usize,
) -> Result<(), StepError> {
    let actual = deployment_world.provider.count(operation);
    ensure(actual == expected, || {
        format!("expected {expected} {operation} calls, found {actual}")
    })
}

#[then("{count:usize} security group was created")]
fn groups_created(deployment_world: &DeploymentWorld, count: usize) -> Result<(), StepError> {
    assert_count(deployment_world, "create_security_group", count)
}

#[then("{count:usize} instance was launched")]
fn instance_launched(deployment_world: &DeploymentWorld, count: usize) -> Result<(), StepError> {
    assert_count(deployment_world, "create_instances", count)
}

#[then("{count:usize} instances were launched")]
fn instances_launched(deployment_world: &DeploymentWorld, count: usize) -> Result<(), StepError> {
    assert_count(deployment_world, "create_instances", count)
}

#[then("{count:usize} public address was allocated")]
fn address_allocated(deployment_world: &DeploymentWorld, count: usize) -> Result<(), StepError> {
    assert_count(deployment_world, "allocate_address", count)
}

#[then("the record for \"{name}\" has a public address and two distinct passwords")]
fn record_is_complete(deployment_world: &DeploymentWorld, name: String) -> Result<(), StepError> {
    let report = deployment_world.report.borrow();
    let record = report
        .as_ref()
        .and_then(|report| report.records.iter().find(|record| record.name == name))
        .ok_or_else(|| StepError::Assertion(format!("no record for {name}")))?;

    ensure(!record.public_ip.is_empty(), || {
        format!("{name} has no public address")
    })?;
    ensure(record.admin_password != record.readonly_password, || {
        String::from("admin and read-only passwords must differ")
    })?;
    let range = MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN;
    for password in [&record.admin_password, &record.readonly_password] {
        ensure(range.contains(&password.len()), || {
            format!("password length {} outside {range:?}", password.len())
        })?;
    }
    Ok(())
}

#[then("the old address was released before the old instance was terminated")]
fn address_released_first(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    let old_id = deployment_world
        .existing_instance
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no existing instance seeded")))?;
    let calls = deployment_world.provider.calls();
    let disassociated = calls
        .iter()
        .position(|call| matches!(call, ProviderCall::DisassociateAddress { .. }));
    let released = calls
        .iter()
        .position(|call| matches!(call, ProviderCall::ReleaseAddress { .. }));
    let terminated = calls.iter().position(|call| {
        matches!(call, ProviderCall::TerminateInstance { instance_id } if *instance_id == old_id)
    });

    match (disassociated, released, terminated) {
        (Some(first), Some(second), Some(third)) if first < second && second < third => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected disassociate, release, terminate in order; positions {other:?}"
        ))),
    }
}

#[then("the old instance is terminated")]
fn old_instance_terminated(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    let old_id = deployment_world.existing_instance.borrow().clone();
    let state = deployment_world
        .provider
        .instances()
        .into_iter()
        .find(|instance| Some(&instance.id) == old_id.as_ref())
        .map(|instance| instance.state);
    ensure(state == Some(InstanceState::Terminated), || {
        format!("old instance state is {state:?}")
    })
}

#[then("configuration succeeds")]
fn configuration_succeeds(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    match deployment_world.configured.borrow().as_ref() {
        Some(Ok(_)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected configuration to succeed, got {other:?}"
        ))),
    }
}

#[then("\"echo hi\" is the only post-configuration command executed")]
fn only_echo_runs(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    let commands = deployment_world.shell.executed_commands();
    let echoes = commands.iter().filter(|command| *command == "echo hi").count();
    ensure(echoes == 1, || format!("echo hi ran {echoes} times"))?;
    ensure(
        commands
            .iter()
            .all(|command| !command.trim().is_empty() && !command.starts_with('#')),
        || format!("comment or blank line was executed: {commands:?}"),
    )
}

#[then("configuration fails with a connection error")]
fn configuration_fails(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    match deployment_world.configured.borrow().as_ref() {
        Some(Err(ConfigureError::Connection { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a connection error, got {other:?}"
        ))),
    }
}

#[then("no update commands were executed")]
fn nothing_executed(deployment_world: &DeploymentWorld) -> Result<(), StepError> {
    let commands = deployment_world.shell.executed_commands();
    ensure(commands.is_empty(), || {
        format!("expected no commands, found {commands:?}")
    })
}
