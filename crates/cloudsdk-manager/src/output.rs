use std::sync::Arc;

use parking_lot::Mutex;

/// Append-only destination for progress text.
pub trait OutputSink: Send + Sync {
    fn println(&self, line: &str);
}

pub type SharedSink = Arc<dyn OutputSink>;

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl OutputSink for MemorySink {
    fn println(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }
}

/// Writes lines to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn println(&self, line: &str) {
        println!("{line}");
    }
}

/// Forwards lines as `info` events.
#[derive(Debug, Clone)]
pub struct TracingSink {
    job: String,
}

impl TracingSink {
    pub fn new(job: impl Into<String>) -> Self {
        Self { job: job.into() }
    }
}

impl OutputSink for TracingSink {
    fn println(&self, line: &str) {
        tracing::info!(target: "cloudsdk.job", job = %self.job, "{line}");
    }
}
