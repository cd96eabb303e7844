use std::ffi::OsString;
use std::sync::Mutex;

use cloudsdk_config::{
    discover_config_path, load_for_dir, with_config_env_lock, CloudToolsConfig, SdkManagement,
    CONFIG_ENV_VAR,
};
use tempfile::tempdir;

static ENV_LOCK: Mutex<()> = Mutex::new(());

struct EnvVarGuard {
    key: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: &std::path::Path) -> Self {
        let prev = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, prev }
    }

    fn unset(key: &'static str) -> Self {
        let prev = std::env::var_os(key);
        std::env::remove_var(key);
        Self { key, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

#[test]
fn discovers_cloudsdk_toml_in_base_dir() {
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK mutex poisoned");
    let _env = EnvVarGuard::unset(CONFIG_ENV_VAR);

    let dir = tempdir().unwrap();
    let config_path = dir.path().join("cloudsdk.toml");
    std::fs::write(&config_path, "[sdk]\nauto_update = false\n").unwrap();

    let discovered = discover_config_path(dir.path())
        .expect("cloudsdk.toml should be discovered when present");
    assert_eq!(
        discovered,
        config_path.canonicalize().unwrap_or(config_path)
    );
}

#[test]
fn falls_back_to_dotfile() {
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK mutex poisoned");
    let _env = EnvVarGuard::unset(CONFIG_ENV_VAR);

    let dir = tempdir().unwrap();
    let config_path = dir.path().join(".cloudsdk.toml");
    std::fs::write(&config_path, "").unwrap();

    let discovered = discover_config_path(dir.path()).expect("dotfile should be discovered");
    assert_eq!(
        discovered,
        config_path.canonicalize().unwrap_or(config_path)
    );
}

#[test]
fn env_override_wins_over_base_dir_file() {
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK mutex poisoned");

    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("cloudsdk.toml"),
        "[sdk]\nmanagement = \"custom\"\n",
    )
    .unwrap();

    let override_path = dir.path().join("override.toml");
    std::fs::write(
        &override_path,
        "[sdk]\nmanagement = \"managed\"\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let (config, path) = with_config_env_lock(|| {
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, &override_path);
        load_for_dir(dir.path()).expect("override config should load")
    });

    assert_eq!(
        path,
        Some(override_path.canonicalize().unwrap_or(override_path))
    );
    assert_eq!(config.sdk.management, SdkManagement::Managed);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn relative_env_override_resolves_against_base_dir() {
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK mutex poisoned");

    let dir = tempdir().unwrap();
    let config_path = dir.path().join("custom.toml");
    std::fs::write(&config_path, "").unwrap();

    let discovered = with_config_env_lock(|| {
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, std::path::Path::new("custom.toml"));
        discover_config_path(dir.path())
    });

    assert_eq!(
        discovered,
        Some(config_path.canonicalize().unwrap_or(config_path))
    );
}

#[test]
fn missing_file_yields_defaults() {
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK mutex poisoned");
    let _env = EnvVarGuard::unset(CONFIG_ENV_VAR);

    let dir = tempdir().unwrap();
    let (config, path) = load_for_dir(dir.path()).unwrap();

    assert_eq!(path, None);
    assert_eq!(config, CloudToolsConfig::default());
}

#[test]
fn missing_override_file_is_an_io_error() {
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK mutex poisoned");

    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = with_config_env_lock(|| {
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, &missing);
        load_for_dir(dir.path()).unwrap_err()
    });

    assert!(matches!(err, cloudsdk_config::ConfigError::Io { .. }));
    assert!(err.to_string().contains("nope.toml"));
}
