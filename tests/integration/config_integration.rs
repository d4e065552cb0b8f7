//! Integration tests for the layered configuration system

use muster::config::{ConfigError, ConfigLoader, MusterConfig};
use muster::manager::DirectoryManager;
use muster::types::{Domain, NodeStatus};
use tempfile::TempDir;

use crate::integration::{seeded_directory, with_env_vars, ADMIN_NAME, ADMIN_PASSWORD};

#[test]
fn toml_round_trip_preserves_every_section() {
    let mut config = MusterConfig::default();
    config.session.domain = Domain::ProxyDirectoryServer;
    config.session.server = Some("od.example.edu".to_string());
    config.session.admin_name = Some(ADMIN_NAME.to_string());
    config.session.admin_password = Some(ADMIN_PASSWORD.to_string());
    config.batch.continue_on_error = false;
    config.logging.level = "debug".to_string();
    config.logging.format = "json".to_string();

    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("roundtrip.toml");
    std::fs::write(&config_file, toml::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = ConfigLoader::load_from_file(&config_file).unwrap();
    assert_eq!(loaded.session.domain, Domain::ProxyDirectoryServer);
    assert_eq!(loaded.session.server.as_deref(), Some("od.example.edu"));
    assert_eq!(loaded.session.admin_name.as_deref(), Some(ADMIN_NAME));
    assert_eq!(
        loaded.session.admin_password.as_deref(),
        Some(ADMIN_PASSWORD)
    );
    assert!(!loaded.batch.continue_on_error);
    assert_eq!(loaded.logging.level, "debug");
    assert_eq!(loaded.logging.format, "json");
}

#[test]
fn the_user_level_file_overrides_the_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("muster");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        r#"
[logging]
level = "debug"
"#,
    )
    .unwrap();

    let home = temp_dir.path().join("home");
    let config = with_env_vars(
        &[
            ("HOME", Some(home.to_str().unwrap())),
            ("XDG_CONFIG_HOME", Some(temp_dir.path().to_str().unwrap())),
            ("MUSTER_CONFIG", None),
        ],
        ConfigLoader::load,
    )
    .unwrap();

    assert_eq!(config.logging.level, "debug");
    // Everything the file does not mention stays at its default.
    assert_eq!(config.session.domain, Domain::Local);
    assert!(config.batch.continue_on_error);
}

#[test]
fn environment_overrides_win_over_files() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("explicit.toml");
    std::fs::write(
        &config_file,
        r#"
[session]
admin_name = "filadmin"

[logging]
level = "warn"
"#,
    )
    .unwrap();

    let home = temp_dir.path().join("home");
    let config = with_env_vars(
        &[
            ("HOME", Some(home.to_str().unwrap())),
            ("XDG_CONFIG_HOME", Some(temp_dir.path().to_str().unwrap())),
            ("MUSTER_CONFIG", Some(config_file.to_str().unwrap())),
            ("MUSTER_SESSION__ADMIN_NAME", Some("envadmin")),
        ],
        ConfigLoader::load,
    )
    .unwrap();

    // The explicit file beat the defaults; the environment beat the file.
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.session.admin_name.as_deref(), Some("envadmin"));
}

#[test]
fn an_explicit_config_path_must_exist() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let home = temp_dir.path().join("home");
    let err = with_env_vars(
        &[
            ("HOME", Some(home.to_str().unwrap())),
            ("XDG_CONFIG_HOME", Some(temp_dir.path().to_str().unwrap())),
            ("MUSTER_CONFIG", Some(missing.to_str().unwrap())),
        ],
        ConfigLoader::load,
    )
    .unwrap_err();

    assert!(matches!(err, ConfigError::Load(_)));
}

#[tokio::test]
async fn a_loaded_file_drives_a_working_session() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("session.toml");
    std::fs::write(
        &config_file,
        format!(
            r#"
[session]
admin_name = "{ADMIN_NAME}"
admin_password = "{ADMIN_PASSWORD}"
"#
        ),
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let manager = DirectoryManager::connect(seeded_directory(), config)
        .await
        .unwrap();
    assert_eq!(manager.status(), NodeStatus::AuthenticatedLocal);
    manager.close().await;
}
