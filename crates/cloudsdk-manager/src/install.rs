use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::ModifyError;
use crate::job::{ModifyContext, SdkModifier};

pub const INSTALL_JOB_NAME: &str = "Install Google Cloud SDK";
pub const UPDATE_JOB_NAME: &str = "Update Google Cloud SDK";

/// SDK components the tools depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkComponent {
    AppEngineJava,
}

impl SdkComponent {
    /// Identifier understood by `gcloud components`.
    pub fn id(self) -> &'static str {
        match self {
            SdkComponent::AppEngineJava => "app-engine-java",
        }
    }
}

impl fmt::Display for SdkComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// An SDK installation the tools are allowed to install and update.
///
/// Every mutating call happens inside a modify job, so implementations never need their own
/// locking against concurrent SDK use.
pub trait ManagedSdk: Send + Sync {
    /// Installation root (the directory containing `bin/`).
    fn root(&self) -> &Path;

    fn is_installed(&self) -> bool;

    fn install(&self, cx: &ModifyContext) -> Result<(), ModifyError>;

    fn has_component(
        &self,
        component: SdkComponent,
        cx: &ModifyContext,
    ) -> Result<bool, ModifyError>;

    fn install_component(
        &self,
        component: SdkComponent,
        cx: &ModifyContext,
    ) -> Result<(), ModifyError>;

    fn update(&self, cx: &ModifyContext) -> Result<(), ModifyError>;
}

/// Makes sure the managed SDK and the App Engine Java component are installed.
pub struct InstallModifier {
    sdk: Arc<dyn ManagedSdk>,
}

impl InstallModifier {
    pub fn new(sdk: Arc<dyn ManagedSdk>) -> Self {
        Self { sdk }
    }
}

impl SdkModifier for InstallModifier {
    fn modify_sdk(&mut self, cx: &ModifyContext) -> Result<(), ModifyError> {
        if !self.sdk.is_installed() {
            cx.check_cancelled()?;
            cx.println(&format!(
                "Installing the Cloud SDK into {}",
                self.sdk.root().display()
            ));
            self.sdk.install(cx)?;
        }

        let component = SdkComponent::AppEngineJava;
        cx.check_cancelled()?;
        if !self.sdk.has_component(component, cx)? {
            cx.check_cancelled()?;
            cx.println(&format!("Installing the {component} component"));
            self.sdk.install_component(component, cx)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("the managed Cloud SDK is not installed at {root}")]
pub struct NotInstalled {
    pub root: String,
}

/// Brings an installed managed SDK up to date.
pub struct UpdateModifier {
    sdk: Arc<dyn ManagedSdk>,
}

impl UpdateModifier {
    pub fn new(sdk: Arc<dyn ManagedSdk>) -> Self {
        Self { sdk }
    }
}

impl SdkModifier for UpdateModifier {
    fn modify_sdk(&mut self, cx: &ModifyContext) -> Result<(), ModifyError> {
        if !self.sdk.is_installed() {
            return Err(ModifyError::failed(NotInstalled {
                root: self.sdk.root().display().to_string(),
            }));
        }
        cx.check_cancelled()?;
        cx.println("Updating the Cloud SDK components");
        self.sdk.update(cx)
    }
}
