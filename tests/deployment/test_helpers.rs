//! Shared fixtures and helpers for deployment BDD scenarios.

use std::cell::RefCell;

use camino::Utf8PathBuf;
use hangar::configure::{ConfigurationEngine, ConfigureError, ConfigureOutcome, ConfigureSettings};
use hangar::desired::InstanceSpec;
use hangar::orchestrator::{DeploymentPlan, DeploymentReport, Orchestrator};
use hangar::password::RandomPasswords;
use hangar::state_store::StateStore;
use hangar::test_support::{FakeProvider, FakeProviderError, FakeShell, sample_record};
use hangar::wait::WaitPolicies;
use rstest::fixture;
use tempfile::TempDir;

pub const VPC_CIDR: &str = "10.0.0.0/16";

pub struct DeploymentWorld {
    pub provider: FakeProvider,
    pub shell: FakeShell,
    pub specs: RefCell<Vec<InstanceSpec>>,
    pub post_config: RefCell<Vec<String>>,
    pub skip_configuration: RefCell<bool>,
    pub existing_instance: RefCell<Option<String>>,
    pub report: RefCell<Option<DeploymentReport<FakeProviderError>>>,
    pub configured: RefCell<Option<Result<ConfigureOutcome, ConfigureError>>>,
    store: StateStore,
    _tmp: TempDir,
}

#[fixture]
pub fn deployment_world() -> DeploymentWorld {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create state directory: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("state.json"))
        .unwrap_or_else(|path| panic!("state path is not UTF-8: {}", path.display()));
    DeploymentWorld {
        provider: FakeProvider::new(),
        shell: FakeShell::new(),
        specs: RefCell::new(Vec::new()),
        post_config: RefCell::new(Vec::new()),
        skip_configuration: RefCell::new(false),
        existing_instance: RefCell::new(None),
        report: RefCell::new(None),
        configured: RefCell::new(None),
        store: StateStore::new(path),
        _tmp: tmp,
    }
}

impl DeploymentWorld {
    fn settings(&self) -> ConfigureSettings {
        ConfigureSettings::new(
            "ubuntu",
            "~/.ssh/deploy.pem",
            "[default]\naws_access_key_id = AKIAEXAMPLE\n",
            self.post_config.borrow().clone(),
        )
    }

    pub fn run_deployment(&self) -> Result<(), std::io::Error> {
        let plan = DeploymentPlan {
            specs: self.specs.borrow().clone(),
            skip_configuration: *self.skip_configuration.borrow(),
            ..DeploymentPlan::default()
        };
        let orchestrator = Orchestrator::new(
            &self.provider,
            &self.shell,
            &RandomPasswords,
            self.store.clone(),
            WaitPolicies::immediate(),
            self.settings(),
        );
        let report = tokio::runtime::Runtime::new()?.block_on(orchestrator.run(&plan));
        *self.report.borrow_mut() = Some(report);
        Ok(())
    }

    pub fn configure_host(&self) -> Result<(), std::io::Error> {
        let settings = self.settings();
        let engine = ConfigurationEngine::new(&self.shell, &settings, WaitPolicies::immediate());
        let record = sample_record("db1");
        let outcome =
            tokio::runtime::Runtime::new()?.block_on(engine.configure(&record, VPC_CIDR));
        *self.configured.borrow_mut() = Some(outcome);
        Ok(())
    }
}
