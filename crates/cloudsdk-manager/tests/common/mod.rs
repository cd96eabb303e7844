#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cloudsdk_config::{SdkConfig, SdkManagement};
use cloudsdk_manager::{CloudSdkManager, ManagedSdk, ModifyContext, ModifyError, SdkComponent};
use parking_lot::Mutex;

/// In-memory SDK that records every call made against it.
#[derive(Default)]
pub struct FakeSdk {
    root: PathBuf,
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    installed: bool,
    components: HashSet<SdkComponent>,
    calls: Vec<String>,
    fail_install: Option<String>,
}

impl FakeSdk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            root: PathBuf::from("/fake/google-cloud-sdk"),
            state: Mutex::default(),
        })
    }

    pub fn installed_with(components: &[SdkComponent]) -> Arc<Self> {
        let sdk = Self::new();
        {
            let mut state = sdk.state.lock();
            state.installed = true;
            state.components.extend(components.iter().copied());
        }
        sdk
    }

    pub fn fail_install_with(&self, message: &str) {
        self.state.lock().fail_install = Some(message.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

impl ManagedSdk for FakeSdk {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_installed(&self) -> bool {
        self.state.lock().installed
    }

    fn install(&self, cx: &ModifyContext) -> Result<(), ModifyError> {
        self.record("install".to_owned());
        cx.println("fake installer output");
        let mut state = self.state.lock();
        if let Some(message) = state.fail_install.clone() {
            return Err(ModifyError::failed(message));
        }
        state.installed = true;
        Ok(())
    }

    fn has_component(
        &self,
        component: SdkComponent,
        _cx: &ModifyContext,
    ) -> Result<bool, ModifyError> {
        self.record(format!("has_component {component}"));
        Ok(self.state.lock().components.contains(&component))
    }

    fn install_component(
        &self,
        component: SdkComponent,
        _cx: &ModifyContext,
    ) -> Result<(), ModifyError> {
        self.record(format!("install_component {component}"));
        self.state.lock().components.insert(component);
        Ok(())
    }

    fn update(&self, _cx: &ModifyContext) -> Result<(), ModifyError> {
        self.record("update".to_owned());
        Ok(())
    }
}

pub fn managed_config() -> SdkConfig {
    SdkConfig {
        management: SdkManagement::Managed,
        ..SdkConfig::default()
    }
}

pub fn manager(config: SdkConfig) -> (CloudSdkManager, Arc<FakeSdk>) {
    let sdk = FakeSdk::new();
    let manager = CloudSdkManager::new(config, sdk.clone());
    (manager, sdk)
}

/// Polls `cond` until it holds or five seconds pass.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
