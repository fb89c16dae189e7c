//! Building domains from TOML configuration files.

use std::io::Write;
use std::time::Duration;

use oxircu::{ConfigError, GracePeriodDomain, RcuError, RcuFileConfig};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_domain_from_file() {
    let file = write_config(
        r#"
[tree]
nr_cpus = 40
fanout = 4
fanout_leaf = 8

[grace_period]
first_fqs_delay_ms = 2
next_fqs_delay_ms = 1

[callbacks]
blimit = 32
qhimark = 500
qlowmark = 50
qovld = 1000

[expedited]
kick_interval_ms = 5
stall_timeout_ms = 2000
"#,
    );

    let config = RcuFileConfig::load_from_path(file.path())
        .unwrap()
        .to_rcu_config();
    assert_eq!(config.nr_cpus, 40);
    assert_eq!(config.first_fqs_delay, Duration::from_millis(2));
    assert_eq!(config.blimit, 32);
    assert_eq!(config.expedited_stall_timeout, Duration::from_secs(2));

    let domain = GracePeriodDomain::new(config).unwrap();
    let geometry = domain.geometry();
    // 40 contexts in leaves of 8 need 5 leaves, under 2 interior nodes and a root.
    assert_eq!(geometry.depth(), 3);
    assert_eq!(geometry.leaf_level().count, 5);
    assert_eq!(geometry.num_nodes(), 8);
    assert_eq!(domain.node_snapshot().len(), 8);
    assert_eq!(domain.online_cpus().len(), 40);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config("[tree]\nnr_cpus = 3\n");
    let config = RcuFileConfig::load_from_path(file.path())
        .unwrap()
        .to_rcu_config();
    assert_eq!(config.nr_cpus, 3);
    assert_eq!(config.fanout, 64);
    assert_eq!(config.fanout_leaf, 16);

    let domain = GracePeriodDomain::new(config).unwrap();
    assert_eq!(domain.geometry().depth(), 1);
}

#[test]
fn test_unknown_field_is_rejected() {
    let file = write_config("[tree]\nnr_cpus = 3\nbogus = 1\n");
    assert!(matches!(
        RcuFileConfig::load_from_path(file.path()),
        Err(ConfigError::Toml(_))
    ));
}

#[test]
fn test_invalid_values_fail_validation() {
    let file = write_config("[tree]\nnr_cpus = 8\nfanout = 1\n");
    let config = RcuFileConfig::load_from_path(file.path())
        .unwrap()
        .to_rcu_config();
    assert!(matches!(
        GracePeriodDomain::new(config),
        Err(RcuError::InvalidConfig(_))
    ));

    let file = write_config("[callbacks]\nqhimark = 10\nqlowmark = 20\n");
    let config = RcuFileConfig::load_from_path(file.path())
        .unwrap()
        .to_rcu_config();
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        RcuFileConfig::load_from_path(dir.path().join("absent.toml")),
        Err(ConfigError::Io(_))
    ));
}
