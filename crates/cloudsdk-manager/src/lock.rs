use std::sync::Arc;
use std::time::Duration;

use cloudsdk_scheduler::{Cancelled, CancellationToken};
use parking_lot::{Condvar, Mutex};

/// How often a blocked acquisition re-checks its cancellation token.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct LockInner {
    state: Mutex<LockState>,
    changed: Condvar,
}

/// Readers/writer gate over an SDK installation.
///
/// The read side ("use") is held while something runs SDK tools, the write side ("modify") while
/// something installs or upgrades the SDK. Readers share; a writer excludes everyone.
///
/// There is no writer preference: a new reader is admitted whenever no writer holds the lock,
/// even if a writer is waiting. That makes nested read acquisition on one thread safe, at the cost
/// that a steady stream of readers can starve a writer.
///
/// Cloning yields another handle to the same lock.
#[derive(Debug, Clone, Default)]
pub struct UseModifyLock {
    inner: Arc<LockInner>,
}

impl UseModifyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no writer holds the lock, or until `token` is cancelled.
    pub fn acquire_read(&self, token: &CancellationToken) -> Result<UseGuard, Cancelled> {
        let mut state = self.inner.state.lock();
        loop {
            if !state.writer {
                state.readers += 1;
                tracing::trace!(target: "cloudsdk.lock", readers = state.readers, "read acquired");
                return Ok(UseGuard::new(Arc::clone(&self.inner)));
            }
            if token.is_cancelled() {
                tracing::debug!(target: "cloudsdk.lock", "read acquisition interrupted");
                return Err(Cancelled);
            }
            self.inner.changed.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    /// Blocks until neither readers nor a writer hold the lock, or until `token` is cancelled.
    pub fn acquire_write(&self, token: &CancellationToken) -> Result<ModifyGuard, Cancelled> {
        let mut state = self.inner.state.lock();
        loop {
            if !state.writer && state.readers == 0 {
                state.writer = true;
                tracing::trace!(target: "cloudsdk.lock", "write acquired");
                return Ok(ModifyGuard::new(Arc::clone(&self.inner)));
            }
            if token.is_cancelled() {
                tracing::debug!(
                    target: "cloudsdk.lock",
                    readers = state.readers,
                    "write acquisition interrupted"
                );
                return Err(Cancelled);
            }
            self.inner.changed.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    pub fn try_acquire_read(&self) -> Option<UseGuard> {
        let mut state = self.inner.state.lock();
        if state.writer {
            return None;
        }
        state.readers += 1;
        Some(UseGuard::new(Arc::clone(&self.inner)))
    }

    pub fn try_acquire_write(&self) -> Option<ModifyGuard> {
        let mut state = self.inner.state.lock();
        if state.writer || state.readers > 0 {
            return None;
        }
        state.writer = true;
        Some(ModifyGuard::new(Arc::clone(&self.inner)))
    }

    /// Number of read guards currently alive.
    pub fn readers(&self) -> usize {
        self.inner.state.lock().readers
    }

    pub fn is_write_locked(&self) -> bool {
        self.inner.state.lock().writer
    }
}

/// Read side of a [`UseModifyLock`]. Released on drop.
#[derive(Debug)]
#[must_use = "the SDK may be modified as soon as the guard is dropped"]
pub struct UseGuard {
    inner: Option<Arc<LockInner>>,
}

impl UseGuard {
    fn new(inner: Arc<LockInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock();
            debug_assert!(state.readers > 0, "read guard released twice");
            state.readers = state.readers.saturating_sub(1);
            tracing::trace!(target: "cloudsdk.lock", readers = state.readers, "read released");
            drop(state);
            inner.changed.notify_all();
        }
    }
}

impl Drop for UseGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Write side of a [`UseModifyLock`]. Released on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ModifyGuard {
    inner: Option<Arc<LockInner>>,
}

impl ModifyGuard {
    fn new(inner: Arc<LockInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock();
            debug_assert!(state.writer, "write guard released twice");
            state.writer = false;
            tracing::trace!(target: "cloudsdk.lock", "write released");
            drop(state);
            inner.changed.notify_all();
        }
    }
}

impl Drop for ModifyGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}
