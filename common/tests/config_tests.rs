#![allow(missing_docs)]

use common::config::{SysqConfig, load_yaml_file};
use common::decode::service::Config2Level;
use common::decode::session::SessionLevel;
use common::error::QueryError;

#[test]
fn deserialize_yaml_sets_fields() -> Result<(), Box<dyn std::error::Error>> {
    let yaml = r#"
targets:
  hosts:
    - "srv01"
    - "srv02.corp.example"
sessions:
  level: 502
  resolve_hosts: false
directory:
  max_depth: 4
  include_hidden: true
services:
  include_drivers: true
  names:
    - "Spooler"
  config2_levels:
    triggers: false
    launch_protected: false
folders:
  names:
    - "Downloads"
"#;

    let cfg: SysqConfig = serde_yaml::from_str(yaml)?;
    cfg.validate()?;

    assert_eq!(cfg.targets.hosts, ["srv01", "srv02.corp.example"]);
    assert_eq!(cfg.sessions.session_level()?, SessionLevel::Info502);
    assert!(!cfg.sessions.resolve_hosts);
    assert_eq!(cfg.directory.max_depth, 4);
    assert!(cfg.directory.large_fetch);
    assert!(cfg.directory.include_hidden);
    let options = cfg.services.options();
    assert_eq!(options.service_type(), 0x3B);
    assert_eq!(options.levels.len(), 7);
    assert!(!options.levels.contains(&Config2Level::TriggerInfo));
    assert_eq!(cfg.folders.names, ["Downloads"]);
    Ok(())
}

#[test]
fn defaults_query_the_local_machine() {
    let cfg = SysqConfig::default();
    assert!(cfg.targets.hosts.is_empty());
    assert_eq!(cfg.sessions.level, 10);
    assert!(cfg.sessions.resolve_hosts);
    assert_eq!(cfg.directory.max_depth, 1);
    assert!(cfg.services.names.is_empty());
    assert_eq!(cfg.services.options().levels, Config2Level::ALL.to_vec());
    assert!(cfg.folders.names.iter().any(|n| n == "Windows"));
    assert!(cfg.validate().is_ok());
}

#[test]
fn invalid_values_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    for yaml in [
        "sessions:\n  level: 1\n",
        "targets:\n  hosts: [\"  \"]\n",
        "directory:\n  max_depth: 1000\n",
        "services:\n  names: [\"\"]\n",
    ] {
        let cfg: SysqConfig = serde_yaml::from_str(yaml)?;
        assert!(
            matches!(cfg.validate(), Err(QueryError::ConfigError { .. })),
            "{yaml}"
        );
    }
    Ok(())
}

#[test]
fn load_yaml_file_reads_and_reports_errors() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sysq.yml");
    std::fs::write(path.as_path(), "folders:\n  names: [\"Fonts\"]\n")?;
    let cfg = load_yaml_file(path.as_path())?;
    assert_eq!(cfg.folders.names, ["Fonts"]);

    std::fs::write(path.as_path(), "sessions: [not, a, map]\n")?;
    assert!(matches!(
        load_yaml_file(path.as_path()),
        Err(QueryError::ConfigError { .. })
    ));
    assert!(matches!(
        load_yaml_file(dir.path().join("missing.yml").as_path()),
        Err(QueryError::IoError(_))
    ));
    Ok(())
}
