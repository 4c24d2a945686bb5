use super::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.session.keepalive_secs, 60);
    assert_eq!(settings.session.keepalive_factor, 1.5);
    assert_eq!(settings.session.protocol_version, 4);
    assert!(!settings.session.resume);
    assert_eq!(settings.persistence.backend, StoreBackend::Memory);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_merge_keeps_defaults_for_missing_values() {
    let partial: PartialSettings = serde_json::from_str(
        r#"{"session": {"keepalive_secs": 10}, "persistence": {"backend": "sled"}}"#,
    )
    .unwrap();
    let merged = Settings::default().merge(partial);

    assert_eq!(merged.session.keepalive_secs, 10);
    assert_eq!(merged.session.keepalive_factor, 1.5);
    assert_eq!(merged.persistence.backend, StoreBackend::Sled);
    assert_eq!(merged.persistence.path, "popsub_session_db");
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("session.toml");
    fs::write(
        &path,
        r#"
            [session]
            keepalive_secs = 4
            keepalive_factor = 2.0
            protocol_version = 5
            resume = true

            [persistence]
            backend = "sled"
            path = "/tmp/popsub-test"

            [logging]
            level = "debug"
        "#,
    )
    .expect("write config file");

    let cfg = load_config_from(path.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg.session.keepalive_secs, 4);
    assert_eq!(cfg.session.keepalive_factor, 2.0);
    assert_eq!(cfg.session.protocol_version, 5);
    assert!(cfg.session.resume);
    assert_eq!(cfg.persistence.backend, StoreBackend::Sled);
    assert_eq!(cfg.persistence.path, "/tmp/popsub-test");
    assert_eq!(cfg.logging.level, "debug");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    temp_env::with_vars(
        [
            ("POPSUB_SESSION__KEEPALIVE_SECS", Some("30")),
            ("POPSUB_LOGGING__LEVEL", Some("warn")),
        ],
        || {
            let cfg = load_config_from("does/not/exist").expect("load_config failed");
            assert_eq!(cfg.session.keepalive_secs, 30);
            assert_eq!(cfg.logging.level, "warn");
            assert_eq!(cfg.session.keepalive_factor, 1.5);
        },
    );
}

#[test]
fn test_session_config_from_settings() {
    let settings = Settings::default();
    let config = SessionConfig::try_from(&settings).unwrap();
    assert_eq!(config.keepalive, Duration::from_secs(60));
    assert_eq!(config.protocol_version, ProtocolVersion::V311);
    assert_eq!(config.ping_interval(), Duration::from_secs(45));
    assert_eq!(config.keepalive_timeout(), Duration::from_secs(90));
}

#[test]
fn test_session_config_rejects_bad_values() {
    let mut settings = Settings::default();
    settings.session.keepalive_factor = 0.5;
    assert!(matches!(
        SessionConfig::try_from(&settings),
        Err(ConfigError::InvalidKeepaliveFactor(_))
    ));

    let mut settings = Settings::default();
    settings.session.protocol_version = 9;
    assert!(matches!(
        SessionConfig::try_from(&settings),
        Err(ConfigError::UnsupportedProtocolVersion(9))
    ));

    assert!(SessionConfig::new(Duration::from_secs(1), f64::NAN).is_err());
}

#[test]
fn test_zero_keepalive_disables_monitor() {
    let config = SessionConfig::new(Duration::ZERO, 1.0).unwrap();
    assert!(!config.keepalive_enabled());
    assert!(SessionConfig::default().keepalive_enabled());
}

#[test]
fn test_session_config_rejects_overflowing_keepalive() {
    let mut settings = Settings::default();
    settings.session.keepalive_secs = u64::MAX / 2;
    assert!(matches!(
        SessionConfig::try_from(&settings),
        Err(ConfigError::KeepaliveTooLong(_))
    ));

    let mut settings = Settings::default();
    settings.session.keepalive_factor = 1e20;
    assert!(matches!(
        SessionConfig::try_from(&settings),
        Err(ConfigError::KeepaliveTimeoutOverflow { .. })
    ));

    let longest = SessionConfig::new(Duration::from_secs(MAX_KEEPALIVE_SECS), 1.0).unwrap();
    assert_eq!(longest.keepalive_timeout(), Duration::from_secs(MAX_KEEPALIVE_SECS));
}

#[test]
fn test_unvalidated_config_saturates_instead_of_panicking() {
    let config = SessionConfig {
        keepalive: Duration::MAX,
        keepalive_factor: 1e20,
        ..SessionConfig::default()
    };
    assert!(config.validate().is_err());
    assert_eq!(config.keepalive_timeout(), Duration::MAX);
    assert_eq!(config.ping_interval(), Duration::MAX / 4);
}
