//! Unit tests for the deployment state machine.

use super::*;
use crate::desired::RuleType;
use crate::provider::InstanceState;
use crate::test_support::{FakeProvider, FakeShell, FixedPasswords, sample_record, sample_spec};
use crate::shell::{CommandOutcome, RemoteCommand, Session, ShellError};
use camino::Utf8PathBuf;
use std::sync::Mutex;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    provider: FakeProvider,
    shell: FakeShell,
    passwords: FixedPasswords,
    store: StateStore,
}

impl Harness {
    async fn run(&self, plan: &DeploymentPlan) -> DeploymentReport<crate::test_support::FakeProviderError> {
        let settings = ConfigureSettings::new(
            "ubuntu",
            "~/.ssh/deploy.pem",
            "[default]\n",
            vec![String::from("echo hi")],
        );
        Orchestrator::new(
            &self.provider,
            &self.shell,
            &self.passwords,
            self.store.clone(),
            WaitPolicies::immediate(),
            settings,
        )
        .run(plan)
        .await
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("state.json"))
        .unwrap_or_else(|path| panic!("temp path is not UTF-8: {}", path.display()));
    Harness {
        _tmp: tmp,
        provider: FakeProvider::new(),
        shell: FakeShell::new(),
        passwords: FixedPasswords::new(["admin-pw", "readonly-pw"]),
        store: StateStore::new(path),
    }
}

fn plan() -> DeploymentPlan {
    DeploymentPlan {
        specs: vec![sample_spec("db1", &[("public_ssh", RuleType::Public, 22)]).expect("spec")],
        ..DeploymentPlan::default()
    }
}

#[rstest]
#[tokio::test]
async fn full_run_visits_every_phase(harness: Harness) {
    let report = harness.run(&plan()).await;

    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert_eq!(
        report.phases,
        vec![
            Phase::Idle,
            Phase::Reconciling,
            Phase::Provisioning,
            Phase::Configuring,
            Phase::Reporting,
            Phase::Succeeded,
        ]
    );
    assert_eq!(report.reconcile, Some(ReconcileSummary::default()));
    assert_eq!(report.configured.len(), 1);
    assert!(harness.shell.executed_commands().contains(&String::from("echo hi")));
    let saved = harness.store.load().expect("state file should exist");
    assert_eq!(saved, report.records);
}

#[rstest]
#[tokio::test]
async fn missing_network_fails_before_any_instance_work(harness: Harness) {
    harness.provider.set_network(None);

    let report = harness.run(&plan()).await;

    assert_eq!(report.phases, vec![Phase::Idle, Phase::Failed]);
    assert!(matches!(
        report.error,
        Some(OrchestratorError::NetworkResolution { ref vpc_id }) if vpc_id == "default"
    ));
    assert_eq!(harness.provider.operations(), vec!["resolve_network"]);
    assert!(!harness.store.path().exists());
}

#[rstest]
#[tokio::test]
async fn skip_configuration_stops_after_provisioning(harness: Harness) {
    let plan = DeploymentPlan {
        skip_configuration: true,
        ..plan()
    };

    let report = harness.run(&plan).await;

    assert_eq!(
        report.phases,
        vec![
            Phase::Idle,
            Phase::Reconciling,
            Phase::Provisioning,
            Phase::Reporting,
            Phase::Succeeded,
        ]
    );
    assert!(harness.shell.events().is_empty());
    assert_eq!(harness.store.load().expect("state file").len(), 1);
}

#[rstest]
#[tokio::test]
async fn reuse_state_configures_recorded_instances(harness: Harness) {
    let recorded = vec![sample_record("db1")];
    harness.store.save(&recorded).expect("seed state file");
    let plan = DeploymentPlan {
        reuse_state: true,
        ..plan()
    };

    let report = harness.run(&plan).await;

    assert_eq!(
        report.phases,
        vec![
            Phase::Idle,
            Phase::Configuring,
            Phase::Reporting,
            Phase::Succeeded,
        ]
    );
    assert_eq!(report.records, recorded);
    assert_eq!(harness.provider.operations(), vec!["resolve_network"]);
    assert!(harness.shell.events().iter().any(|event| matches!(
        event,
        crate::test_support::ShellEvent::Connect { host, .. } if host == "203.0.113.10"
    )));
}

#[rstest]
#[tokio::test]
async fn reuse_without_state_file_fails(harness: Harness) {
    let plan = DeploymentPlan {
        reuse_state: true,
        ..plan()
    };

    let report = harness.run(&plan).await;

    assert_eq!(report.final_phase(), Phase::Failed);
    assert!(matches!(report.error, Some(OrchestratorError::State(_))));
}

#[rstest]
#[tokio::test]
async fn reconcile_failure_stops_the_run(harness: Harness) {
    harness.provider.add_instance("db1", InstanceState::Running, None);
    harness
        .provider
        .fail_operation("terminate_instance", "UnauthorizedOperation");

    let report = harness.run(&plan()).await;

    assert_eq!(
        report.phases,
        vec![Phase::Idle, Phase::Reconciling, Phase::Failed]
    );
    assert!(matches!(report.error, Some(OrchestratorError::Reconcile(_))));
    assert_eq!(harness.provider.count("create_security_group"), 0);
}

#[rstest]
#[tokio::test]
async fn configuration_failure_still_persists_records(harness: Harness) {
    harness.shell.fail_all_connects();

    let report = harness.run(&plan()).await;

    assert_eq!(
        report.phases,
        vec![
            Phase::Idle,
            Phase::Reconciling,
            Phase::Provisioning,
            Phase::Configuring,
            Phase::Failed,
        ]
    );
    assert!(matches!(
        report.error,
        Some(OrchestratorError::Configure(ConfigureError::Connection { .. }))
    ));
    assert_eq!(report.records.len(), 1);
    let saved = harness.store.load().expect("partial records should be saved");
    assert_eq!(saved, report.records);
}

#[rstest]
#[tokio::test]
async fn provisioning_failure_keeps_no_state_file(harness: Harness) {
    harness
        .provider
        .fail_operation("allocate_address", "AddressLimitExceeded");

    let report = harness.run(&plan()).await;

    assert_eq!(report.final_phase(), Phase::Failed);
    assert!(matches!(report.error, Some(OrchestratorError::Provision(_))));
    assert!(report.records.is_empty());
    assert!(!harness.store.path().exists());
    assert!(report.into_result().is_err());
}

/// Records whether the state file exists each time a connection is opened.
struct StateCheckingShell {
    inner: FakeShell,
    state_path: Utf8PathBuf,
    seen: Mutex<Vec<bool>>,
}

impl StateCheckingShell {
    fn seen(&self) -> Vec<bool> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl RemoteShell for StateCheckingShell {
    fn connect(
        &self,
        host: &str,
        identity_file: &str,
        user: &str,
    ) -> Result<Session, ShellError> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(self.state_path.exists());
        self.inner.connect(host, identity_file, user)
    }

    fn execute(
        &self,
        session: &Session,
        command: &RemoteCommand,
    ) -> Result<CommandOutcome, ShellError> {
        self.inner.execute(session, command)
    }

    fn close(&self, session: Session) {
        self.inner.close(session);
    }
}

#[rstest]
#[tokio::test]
async fn records_are_saved_before_the_first_connection(harness: Harness) {
    let shell = StateCheckingShell {
        inner: FakeShell::new(),
        state_path: harness.store.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    };
    let settings = ConfigureSettings::new("ubuntu", "~/.ssh/deploy.pem", "[default]\n", Vec::new());

    let report = Orchestrator::new(
        &harness.provider,
        &shell,
        &harness.passwords,
        harness.store.clone(),
        WaitPolicies::immediate(),
        settings,
    )
    .run(&plan())
    .await;

    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    let seen = shell.seen();
    assert!(!seen.is_empty(), "configuration never connected");
    assert!(
        seen.iter().all(|exists| *exists),
        "state file missing at connect: {seen:?}"
    );
}
