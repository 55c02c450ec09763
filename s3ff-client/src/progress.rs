use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Coarse phase reported to progress sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Initializing,
    Sending,
    Finalizing,
}

/// Transient status update; `loaded`/`total` are only set while sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "state")]
    pub phase: UploadPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ProgressEvent {
    pub fn initializing() -> Self {
        Self {
            phase: UploadPhase::Initializing,
            loaded: None,
            total: None,
        }
    }

    pub fn sending(loaded: u64, total: u64) -> Self {
        Self {
            phase: UploadPhase::Sending,
            loaded: Some(loaded),
            total: Some(total),
        }
    }

    pub fn finalizing() -> Self {
        Self {
            phase: UploadPhase::Finalizing,
            loaded: None,
            total: None,
        }
    }
}

/// Passive receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Per-run reporter that keeps `loaded` non-decreasing.
///
/// Transports may re-read a body (redirects, connection reuse); without the
/// high-water mark a sink could see bytes go backwards.
pub(crate) struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    total: u64,
    high_water: AtomicU64,
}

impl ProgressReporter {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>, total: u64) -> Self {
        Self {
            sink,
            total,
            high_water: AtomicU64::new(0),
        }
    }

    pub(crate) fn sent(&self, loaded: u64) {
        let previous = self.high_water.fetch_max(loaded, Ordering::AcqRel);
        self.sink
            .on_progress(ProgressEvent::sending(previous.max(loaded), self.total));
    }
}
