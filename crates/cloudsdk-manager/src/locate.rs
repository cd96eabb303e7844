use std::path::{Path, PathBuf};

use cloudsdk_config::{SdkConfig, SdkManagement};
use thiserror::Error;

pub const CLOUDSDK_ROOT_ENV_VAR: &str = "CLOUDSDK_ROOT_DIR";

const GCLOUD_EXE: &str = if cfg!(windows) { "gcloud.cmd" } else { "gcloud" };

/// `<root>/bin/gcloud` (or `gcloud.cmd` on Windows).
pub fn gcloud_path(root: &Path) -> PathBuf {
    root.join("bin").join(GCLOUD_EXE)
}

/// A Cloud SDK installation that has been checked to contain `gcloud`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkInstallation {
    root: PathBuf,
    gcloud: PathBuf,
}

impl SdkInstallation {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gcloud(&self) -> &Path {
        &self.gcloud
    }

    pub fn from_root(root: impl AsRef<Path>) -> Result<Self, SdkDiscoveryError> {
        let root = root.as_ref().to_path_buf();
        let gcloud = gcloud_path(&root);
        if !gcloud.is_file() {
            return Err(SdkDiscoveryError::MissingGcloud { root });
        }
        Ok(Self { root, gcloud })
    }

    /// Resolve the SDK installation for `config`.
    ///
    /// In managed mode only the managed root is considered. Otherwise a configured custom path
    /// wins, and discovery falls back to:
    /// 1. `CLOUDSDK_ROOT_DIR`
    /// 2. `gcloud` on `PATH` (symlinks resolved; the root is the parent of `bin/`)
    pub fn discover(config: &SdkConfig) -> Result<Self, SdkDiscoveryError> {
        if config.management == SdkManagement::Managed {
            let root = config
                .managed_root_or_default()
                .ok_or(SdkDiscoveryError::NotFound)?;
            return Self::from_root(root);
        }

        if let Some(path) = config.path.as_deref() {
            return Self::from_root(path);
        }

        let discovered = discover_from_env()
            .and_then(|root| Self::from_root(root).ok())
            .or_else(|| discover_from_path().and_then(|root| Self::from_root(root).ok()));

        match &discovered {
            Some(sdk) => tracing::debug!(
                target: "cloudsdk.manager",
                root = %sdk.root.display(),
                "discovered Cloud SDK"
            ),
            None => tracing::debug!(target: "cloudsdk.manager", "no Cloud SDK found"),
        }
        discovered.ok_or(SdkDiscoveryError::NotFound)
    }
}

#[derive(Debug, Error)]
pub enum SdkDiscoveryError {
    #[error(
        "could not find a Cloud SDK installation (tried sdk.path, CLOUDSDK_ROOT_DIR and `gcloud` on PATH)"
    )]
    NotFound,

    #[error("Cloud SDK root `{root}` does not contain `bin/gcloud`")]
    MissingGcloud { root: PathBuf },
}

fn discover_from_env() -> Option<PathBuf> {
    std::env::var_os(CLOUDSDK_ROOT_ENV_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn discover_from_path() -> Option<PathBuf> {
    let gcloud = find_gcloud_on_path()?;
    let gcloud = gcloud.canonicalize().unwrap_or(gcloud);
    Some(gcloud.parent()?.parent()?.to_path_buf())
}

fn find_gcloud_on_path() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(GCLOUD_EXE))
        .find(|candidate| candidate.is_file())
}
