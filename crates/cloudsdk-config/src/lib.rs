use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::ReentrantMutex;
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Who owns the lifecycle of the Cloud SDK installation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkManagement {
    /// The tools install and update the SDK under [`SdkConfig::managed_root`].
    #[serde(alias = "MANAGED", alias = "automatic", alias = "AUTOMATIC")]
    Managed,
    /// The user points at (or relies on discovery of) their own installation.
    #[default]
    #[serde(alias = "CUSTOM", alias = "manual", alias = "MANUAL")]
    Custom,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdkConfig {
    #[serde(default)]
    pub management: SdkManagement,

    /// Whether a managed SDK is kept up to date in the background.
    #[serde(default = "SdkConfig::default_auto_update")]
    pub auto_update: bool,

    /// Custom SDK installation root. Only consulted in `custom` mode.
    #[serde(default, alias = "cloud_sdk_path")]
    pub path: Option<PathBuf>,

    /// Where the managed SDK lives. Defaults to a per-user data directory.
    #[serde(default)]
    pub managed_root: Option<PathBuf>,

    /// Bootstrap installer for the managed SDK: program followed by its arguments. The managed
    /// root is appended as `--install-dir=<root>`.
    #[serde(default)]
    pub installer: Vec<String>,

    /// Persisted switch for the managed-SDK feature. Off unless explicitly enabled.
    #[serde(default)]
    pub enable_managed_feature: bool,
}

impl SdkConfig {
    fn default_auto_update() -> bool {
        true
    }

    pub fn is_auto_managing(&self) -> bool {
        self.management == SdkManagement::Managed
    }

    /// The managed root, falling back to the per-user default location.
    pub fn managed_root_or_default(&self) -> Option<PathBuf> {
        self.managed_root.clone().or_else(default_managed_root)
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            management: SdkManagement::default(),
            auto_update: Self::default_auto_update(),
            path: None,
            managed_root: None,
            installer: Vec::new(),
            enable_managed_feature: false,
        }
    }
}

fn default_managed_root() -> Option<PathBuf> {
    let base = if cfg!(windows) {
        PathBuf::from(std::env::var_os("LOCALAPPDATA")?).join("google")
    } else if cfg!(target_os = "macos") {
        PathBuf::from(std::env::var_os("HOME")?)
            .join("Library")
            .join("Application Support")
            .join("google-cloud-tools")
    } else {
        match std::env::var_os("XDG_CACHE_HOME") {
            Some(cache) if !cache.is_empty() => PathBuf::from(cache).join("google-cloud-tools"),
            _ => PathBuf::from(std::env::var_os("HOME")?)
                .join(".cache")
                .join("google-cloud-tools"),
        }
    };
    Some(base.join("managed-cloud-sdk").join("google-cloud-sdk"))
}

/// Top-level configuration file.
///
/// ```toml
/// [sdk]
/// management = "managed"
/// auto_update = true
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudToolsConfig {
    #[serde(default)]
    pub sdk: SdkConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

/// `toml` messages can echo user values (`invalid type: string "..."`); keep the location and
/// shape of the error but not the value.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = QUOTED_STRING_RE.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok());
    match re {
        Some(re) => re.replace_all(message, r#""<redacted>""#).into_owned(),
        None => message.to_owned(),
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl CloudToolsConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(target: "cloudsdk.config", path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: CloudToolsConfig = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        // An empty path is how "unset" tends to get written by hand.
        if self
            .sdk
            .path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            self.sdk.path = None;
        }
        if self.sdk.management == SdkManagement::Managed && self.sdk.path.is_some() {
            tracing::warn!(
                target: "cloudsdk.config",
                "sdk.path is ignored while sdk.management = \"managed\""
            );
        }
    }
}

pub const CONFIG_ENV_VAR: &str = "CLOUDSDK_TOOLS_CONFIG";

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Tests that set [`CONFIG_ENV_VAR`] wrap the mutation and the discovery call in this so other
/// threads never observe the temporary value.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Find the configuration file for `base_dir`.
///
/// Search order:
/// 1) `CLOUDSDK_TOOLS_CONFIG` (absolute or relative to `base_dir`)
/// 2) `cloudsdk.toml` in `base_dir`
/// 3) `.cloudsdk.toml` in `base_dir`
pub fn discover_config_path(base_dir: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            base_dir.join(candidate)
        };
        return Some(path.canonicalize().unwrap_or(path));
    }

    ["cloudsdk.toml", ".cloudsdk.toml"]
        .into_iter()
        .map(|name| base_dir.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the configuration for `base_dir`, or the defaults when no file exists.
pub fn load_for_dir(base_dir: &Path) -> Result<(CloudToolsConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(base_dir) else {
        return Ok((CloudToolsConfig::default(), None));
    };

    let config = CloudToolsConfig::load_from_path(&path)?;
    Ok((config, Some(path)))
}
