//! Recording helpers for handler tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Entry {
    /// What happened.
    pub label: String,
    /// When it happened.
    pub at: Instant,
}

/// Records labelled calls from handlers, in order.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call.
    pub fn record(&self, label: impl Into<String>) {
        self.entries.lock().push(Entry {
            label: label.into(),
            at: Instant::now(),
        });
    }

    /// Returns every label in recording order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.label.clone()).collect()
    }

    /// Returns every entry in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    /// Returns the times at which `label` was recorded.
    #[must_use]
    pub fn times_of(&self, label: &str) -> Vec<Instant> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.label == label)
            .map(|e| e.at)
            .collect()
    }

    /// Returns how many times `label` was recorded.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.label == label).count()
    }

    /// Returns the number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Tracks how many handlers run at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    state: Arc<ProbeState>,
}

#[derive(Debug, Default)]
struct ProbeState {
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Creates an idle probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a handler as running until the guard drops.
    #[must_use]
    pub fn enter(&self) -> ProbeGuard {
        let now = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Returns the highest number of handlers seen running at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Returns the number of handlers currently running.
    #[must_use]
    pub fn current(&self) -> usize {
        self.state.current.load(Ordering::SeqCst)
    }

    /// Returns the number of handlers that finished.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }
}

/// Leaves the probe on drop.
#[derive(Debug)]
pub struct ProbeGuard {
    state: Arc<ProbeState>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.state.current.fetch_sub(1, Ordering::SeqCst);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_shares_log_between_clones() {
        let recorder = Recorder::new();
        let clone = recorder.clone();

        recorder.record("a");
        clone.record("b");
        clone.record("a");

        assert_eq!(recorder.labels(), vec!["a", "b", "a"]);
        assert_eq!(recorder.count("a"), 2);
        assert_eq!(recorder.times_of("b").len(), 1);
    }

    #[test]
    fn test_probe_tracks_peak() {
        let probe = ConcurrencyProbe::new();

        let a = probe.enter();
        let b = probe.enter();
        drop(a);
        let c = probe.enter();
        drop(b);
        drop(c);

        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.current(), 0);
        assert_eq!(probe.completed(), 3);
    }
}
