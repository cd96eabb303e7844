use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cloudsdk_config::SdkConfig;
use cloudsdk_scheduler::{Cancelled, CancellationToken, SerialQueue};

use crate::error::SdkError;
use crate::install::{
    InstallModifier, ManagedSdk, UpdateModifier, INSTALL_JOB_NAME, UPDATE_JOB_NAME,
};
use crate::job::{ModifyJob, ModifyJobHandle};
use crate::locate::{SdkDiscoveryError, SdkInstallation};
use crate::lock::{UseGuard, UseModifyLock};
use crate::output::SharedSink;

/// Coordinates use and modification of one Cloud SDK installation.
///
/// Modify jobs run one at a time on a dedicated worker thread and each holds the write side of
/// the [`UseModifyLock`] while it runs. Code that shells out to the SDK brackets the call with
/// [`prevent_modifying_sdk`](Self::prevent_modifying_sdk) and
/// [`allow_modifying_sdk`](Self::allow_modifying_sdk).
///
/// Construct one per process and share it (`Arc<CloudSdkManager>`). Dropping it cancels pending
/// jobs and joins the worker.
pub struct CloudSdkManager {
    config: SdkConfig,
    sdk: Arc<dyn ManagedSdk>,
    lock: UseModifyLock,
    queue: SerialQueue,
    root_token: CancellationToken,
    force_feature: AtomicBool,
}

impl std::fmt::Debug for CloudSdkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSdkManager")
            .field("config", &self.config)
            .field("root", &self.sdk.root())
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl CloudSdkManager {
    pub fn new(config: SdkConfig, sdk: Arc<dyn ManagedSdk>) -> Self {
        Self::with_lock(config, sdk, UseModifyLock::new())
    }

    /// Like [`new`](Self::new), but gating on an existing lock (for example one shared with
    /// another manager over the same installation).
    pub fn with_lock(config: SdkConfig, sdk: Arc<dyn ManagedSdk>, lock: UseModifyLock) -> Self {
        Self {
            config,
            sdk,
            lock,
            queue: SerialQueue::new("cloudsdk-modify"),
            root_token: CancellationToken::new(),
            force_feature: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn lock(&self) -> &UseModifyLock {
        &self.lock
    }

    pub fn managed_sdk(&self) -> &Arc<dyn ManagedSdk> {
        &self.sdk
    }

    pub fn is_managed_sdk_feature_enabled(&self) -> bool {
        self.force_feature.load(Ordering::Acquire) || self.config.enable_managed_feature
    }

    /// Overrides the persisted feature option for the lifetime of this manager.
    pub fn force_managed_sdk_feature(&self, enabled: bool) {
        self.force_feature.store(enabled, Ordering::Release);
    }

    /// Blocks SDK modification until the returned guard is handed to
    /// [`allow_modifying_sdk`](Self::allow_modifying_sdk) or dropped.
    ///
    /// Waits while a modify job holds the SDK. Any number of callers may prevent modification at
    /// once, and a caller that already prevents it can do so again without blocking.
    pub fn prevent_modifying_sdk(&self, token: &CancellationToken) -> Result<UseGuard, SdkError> {
        match self.lock.acquire_read(token) {
            Ok(guard) => Ok(guard),
            Err(Cancelled) => {
                tracing::debug!(
                    target: "cloudsdk.manager",
                    "interrupted while waiting to use the Cloud SDK"
                );
                Err(SdkError::LockAcquisitionInterrupted)
            }
        }
    }

    pub fn allow_modifying_sdk(&self, usage: UseGuard) {
        usage.release();
    }

    /// Queues `job` behind any other modify jobs of this manager.
    pub fn schedule(&self, job: ModifyJob) -> ModifyJobHandle {
        let lock = self.lock.clone();
        let name = job.name().to_owned();
        tracing::debug!(target: "cloudsdk.manager", job = %name, "scheduling modify job");
        let handle = self
            .queue
            .schedule(name, self.root_token.child_token(), move |cx| job.run(&lock, cx));
        ModifyJobHandle::new(handle)
    }

    /// Schedules `job` and waits for it. Anything but success is returned as an error.
    pub fn run(&self, job: ModifyJob) -> Result<(), SdkError> {
        self.schedule(job).join()
    }

    /// Schedules installation of the managed SDK without an output sink.
    ///
    /// Returns `None` when the feature is off or the SDK is not managed by these tools.
    pub fn install_managed_sdk_async(&self) -> Option<ModifyJobHandle> {
        if let Err(err) = self.check_managed() {
            tracing::debug!(target: "cloudsdk.manager", reason = %err, "not installing managed SDK");
            return None;
        }
        Some(self.schedule(self.install_job(None)))
    }

    /// Installs the managed SDK and waits for the result.
    pub fn install_managed_sdk(&self, output: Option<SharedSink>) -> Result<(), SdkError> {
        self.check_managed()?;
        self.run(self.install_job(output))
    }

    /// Schedules an update of the managed SDK. Also requires `sdk.auto_update`.
    pub fn update_managed_sdk_async(&self) -> Option<ModifyJobHandle> {
        if let Err(err) = self.check_managed() {
            tracing::debug!(target: "cloudsdk.manager", reason = %err, "not updating managed SDK");
            return None;
        }
        if !self.config.auto_update {
            tracing::debug!(target: "cloudsdk.manager", "auto update disabled; not updating managed SDK");
            return None;
        }
        Some(self.schedule(self.update_job(None)))
    }

    /// Updates the managed SDK and waits for the result. An explicit request, so `auto_update`
    /// is not consulted.
    pub fn update_managed_sdk(&self, output: Option<SharedSink>) -> Result<(), SdkError> {
        self.check_managed()?;
        self.run(self.update_job(output))
    }

    pub fn locate_sdk(&self) -> Result<SdkInstallation, SdkDiscoveryError> {
        SdkInstallation::discover(&self.config)
    }

    /// Cancels queued and running jobs and joins the worker. Later jobs finish as cancelled.
    pub fn shutdown(&self) {
        if !self.root_token.is_cancelled() {
            tracing::debug!(target: "cloudsdk.manager", "shutting down");
        }
        self.root_token.cancel();
        self.queue.shutdown();
    }

    fn check_managed(&self) -> Result<(), SdkError> {
        if !self.is_managed_sdk_feature_enabled() {
            return Err(SdkError::FeatureDisabled);
        }
        if !self.config.is_auto_managing() {
            return Err(SdkError::NotManaged);
        }
        Ok(())
    }

    fn install_job(&self, output: Option<SharedSink>) -> ModifyJob {
        ModifyJob::new(INSTALL_JOB_NAME, InstallModifier::new(Arc::clone(&self.sdk)))
            .with_optional_output(output)
    }

    fn update_job(&self, output: Option<SharedSink>) -> ModifyJob {
        ModifyJob::new(UPDATE_JOB_NAME, UpdateModifier::new(Arc::clone(&self.sdk)))
            .with_optional_output(output)
    }
}

impl Drop for CloudSdkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
