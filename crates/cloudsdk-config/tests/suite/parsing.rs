use std::path::PathBuf;

use cloudsdk_config::{CloudToolsConfig, ConfigError, LoggingConfig, SdkConfig, SdkManagement};
use pretty_assertions::assert_eq;

#[test]
fn empty_document_is_all_defaults() {
    let config = CloudToolsConfig::load_from_str("").unwrap();

    assert_eq!(config.sdk.management, SdkManagement::Custom);
    assert!(config.sdk.auto_update);
    assert!(!config.sdk.enable_managed_feature);
    assert!(config.sdk.installer.is_empty());
    assert_eq!(config.logging, LoggingConfig::default());
}

#[test]
fn parses_full_sdk_section() {
    let text = r#"
[sdk]
management = "managed"
auto_update = false
managed_root = "/opt/google/managed-cloud-sdk"
installer = ["/opt/google/install.sh", "--usage-reporting=false"]
enable_managed_feature = true

[logging]
level = "cloudsdk.lock=trace,info"
json = true
"#;

    let config = CloudToolsConfig::load_from_str(text).unwrap();
    assert_eq!(
        config.sdk,
        SdkConfig {
            management: SdkManagement::Managed,
            auto_update: false,
            path: None,
            managed_root: Some(PathBuf::from("/opt/google/managed-cloud-sdk")),
            installer: vec![
                "/opt/google/install.sh".to_owned(),
                "--usage-reporting=false".to_owned(),
            ],
            enable_managed_feature: true,
        }
    );
    assert!(config.sdk.is_auto_managing());
    assert!(config.logging.json);
    assert_eq!(config.logging.level, "cloudsdk.lock=trace,info");
}

#[test]
fn accepts_uppercase_management_names() {
    let managed = CloudToolsConfig::load_from_str("[sdk]\nmanagement = \"MANAGED\"\n").unwrap();
    assert_eq!(managed.sdk.management, SdkManagement::Managed);

    let custom = CloudToolsConfig::load_from_str(
        "[sdk]\nmanagement = \"CUSTOM\"\npath = \"/usr/lib/google-cloud-sdk\"\n",
    )
    .unwrap();
    assert_eq!(custom.sdk.management, SdkManagement::Custom);
    assert_eq!(
        custom.sdk.path,
        Some(PathBuf::from("/usr/lib/google-cloud-sdk"))
    );
}

#[test]
fn unknown_keys_are_rejected() {
    let err = CloudToolsConfig::load_from_str("[sdk]\nmanagment = \"managed\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
    assert!(err.to_string().contains("managment"));
}

#[test]
fn parse_errors_do_not_echo_values() {
    let err =
        CloudToolsConfig::load_from_str("[sdk]\nauto_update = \"super-secret-value\"\n").unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, ConfigError::Toml(_)));
    assert!(
        !message.contains("super-secret-value"),
        "expected the value to be redacted, got {message}"
    );
}

#[test]
fn env_filter_accepts_level_synonyms() {
    let logging = LoggingConfig {
        level: "WARNING".to_owned(),
        ..LoggingConfig::default()
    };
    // Only checks that a filter is produced; the exact directive set depends on RUST_LOG.
    let _ = logging.env_filter();
}
