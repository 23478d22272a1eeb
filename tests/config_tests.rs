//! Integration tests for configuration loading and validation.

use std::time::Duration;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use hangar::config::{ConfigError, DEFAULT_REGION, HangarConfig};
use hangar::test_support::EnvGuard;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn valid_config() -> HangarConfig {
    HangarConfig {
        aws_bin: String::from("aws"),
        region: String::from(DEFAULT_REGION),
        profile: None,
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("ubuntu"),
        ssh_identity_file: String::from("~/.ssh/deploy.pem"),
        ssh_connect_timeout_secs: 10,
        state_file: String::from("hangar-state.json"),
        credentials_file: String::from("~/.aws/credentials"),
        post_config_script: None,
        stdin_markers: Vec::new(),
        fail_on_command_error: false,
        terminate_poll_secs: 15,
        terminate_timeout_secs: 900,
        pending_poll_secs: 10,
        pending_timeout_secs: 600,
        settle_delay_secs: 30,
        reboot_delay_secs: 60,
        reboot_timeout_secs: 600,
        log_file: None,
    }
}

fn utf8_root(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()))
}

#[rstest]
fn defaults_validate(valid_config: HangarConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

#[rstest]
#[case::identity(|cfg: &mut HangarConfig| cfg.ssh_identity_file.clear(), "HANGAR_SSH_IDENTITY_FILE", "ssh_identity_file")]
#[case::region(|cfg: &mut HangarConfig| cfg.region = String::from("  "), "HANGAR_REGION", "region")]
#[case::aws_bin(|cfg: &mut HangarConfig| cfg.aws_bin.clear(), "HANGAR_AWS_BIN", "aws_bin")]
#[case::state_file(|cfg: &mut HangarConfig| cfg.state_file.clear(), "HANGAR_STATE_FILE", "state_file")]
#[case::credentials(|cfg: &mut HangarConfig| cfg.credentials_file.clear(), "HANGAR_CREDENTIALS_FILE", "credentials_file")]
fn blank_fields_produce_actionable_errors(
    valid_config: HangarConfig,
    #[case] mutate: fn(&mut HangarConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let err = cfg.validate().expect_err("blank field should be rejected");

    let ConfigError::MissingField(ref message) = err else {
        panic!("expected MissingField, got {err:?}");
    };
    assert!(message.contains(env_var), "error should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention {toml_key}: {message}");
    assert!(message.contains("hangar.toml"), "error should mention the file: {message}");
}

#[rstest]
fn zero_poll_interval_is_rejected(valid_config: HangarConfig) {
    let cfg = HangarConfig {
        pending_poll_secs: 0,
        ..valid_config
    };

    let err = cfg.validate().expect_err("zero interval should be rejected");

    assert!(
        matches!(err, ConfigError::InvalidValue(ref message) if message.contains("HANGAR_PENDING_POLL_SECS")),
        "unexpected error: {err}"
    );
}

#[rstest]
fn wait_policies_follow_configured_seconds(valid_config: HangarConfig) {
    let waits = valid_config.wait_policies();

    assert_eq!(waits.terminate_wait.interval, Duration::from_secs(15));
    assert_eq!(waits.terminate_wait.ceiling, Duration::from_secs(900));
    assert_eq!(waits.pending_wait.ceiling, Duration::from_secs(600));
    assert_eq!(waits.reboot_wait.interval, Duration::from_secs(10));
    assert_eq!(waits.reboot_wait.ceiling, Duration::from_secs(600));
    assert_eq!(waits.settle_delay, Duration::from_secs(30));
    assert_eq!(waits.reboot_delay, Duration::from_secs(60));
}

#[rstest]
fn configure_settings_reads_credentials_and_script(valid_config: HangarConfig) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = utf8_root(&tmp);
    let dir = Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"));
    dir.write("credentials", "[default]\naws_access_key_id = AKIAEXAMPLE\n")
        .unwrap_or_else(|err| panic!("write credentials: {err}"));
    dir.write("post-config.sh", "# restore\n\nsudo service postgresql restart\n")
        .unwrap_or_else(|err| panic!("write script: {err}"));

    let cfg = HangarConfig {
        credentials_file: root.join("credentials").into_string(),
        post_config_script: Some(root.join("post-config.sh").into_string()),
        fail_on_command_error: true,
        ..valid_config
    };

    let settings = cfg
        .configure_settings()
        .unwrap_or_else(|err| panic!("settings should load: {err}"));

    assert!(settings.credentials.contains("AKIAEXAMPLE"));
    assert_eq!(
        settings.post_config,
        vec![
            String::from("# restore"),
            String::new(),
            String::from("sudo service postgresql restart"),
        ]
    );
    assert!(settings.fail_on_command_error);
    assert_eq!(settings.ssh_user, "ubuntu");
}

#[rstest]
fn missing_credentials_file_is_reported(valid_config: HangarConfig) {
    let cfg = HangarConfig {
        credentials_file: String::from("/nonexistent/hangar/credentials"),
        ..valid_config
    };

    let err = cfg.configure_settings().expect_err("file is missing");

    assert!(
        matches!(err, ConfigError::Read { ref path, .. } if path.as_str() == "/nonexistent/hangar/credentials"),
        "unexpected error: {err}"
    );
}

#[rstest]
fn provision_only_runs_read_no_files(valid_config: HangarConfig) {
    let cfg = HangarConfig {
        credentials_file: String::from("/nonexistent/hangar/credentials"),
        post_config_script: Some(String::from("/nonexistent/hangar/post-config.sh")),
        ..valid_config
    };

    let settings = cfg
        .deployment_settings(true)
        .unwrap_or_else(|err| panic!("provision-only settings should not read files: {err}"));

    assert!(settings.credentials.is_empty());
    assert!(settings.post_config.is_empty());
    assert_eq!(settings.identity_file, "~/.ssh/deploy.pem");
    assert!(matches!(
        cfg.deployment_settings(false),
        Err(ConfigError::Read { .. })
    ));
}

#[rstest]
#[case(Vec::new(), vec!["pg_restore"])]
#[case(vec!["psql", "pg_restore"], vec!["psql", "pg_restore"])]
fn stdin_markers_replace_the_defaults_when_set(
    valid_config: HangarConfig,
    #[case] configured: Vec<&str>,
    #[case] expected: Vec<&str>,
) {
    let cfg = HangarConfig {
        stdin_markers: configured.into_iter().map(str::to_owned).collect(),
        ..valid_config
    };

    let settings = cfg.session_settings();

    assert_eq!(settings.stdin_markers, expected);
}

#[tokio::test]
async fn credentials_path_expands_tilde() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = utf8_root(&tmp);
    let _guard = EnvGuard::set_vars(&[("HOME", root.as_str())]).await;
    let dir = Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp home dir: {err}"));
    dir.create_dir_all(".aws")
        .unwrap_or_else(|err| panic!("create .aws dir: {err}"));
    dir.write(".aws/credentials", "[default]\n")
        .unwrap_or_else(|err| panic!("write credentials: {err}"));

    let settings = valid_config()
        .configure_settings()
        .unwrap_or_else(|err| panic!("settings should load: {err}"));

    assert_eq!(settings.credentials, "[default]\n");
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("HANGAR_SSH_IDENTITY_FILE", "~/.ssh/deploy.pem"),
        ("HANGAR_REGION", "us-west-2"),
        ("HANGAR_STDIN_MARKERS", "pg_restore,psql"),
    ])
    .await;

    let cfg = HangarConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from the environment: {err}"));

    assert_eq!(cfg.ssh_identity_file, "~/.ssh/deploy.pem");
    assert_eq!(cfg.region, "us-west-2");
    assert_eq!(cfg.ssh_user, "ubuntu");
    assert_eq!(cfg.pending_timeout_secs, 600);
    assert_eq!(cfg.stdin_markers, vec!["pg_restore", "psql"]);
}
