//! Scan progress reporting.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Receives `(fraction_complete, status)` after each finished ticker.
///
/// Failures are logged by the scanner and never abort a scan.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, message: &str) -> anyhow::Result<()>;
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str) -> anyhow::Result<()> + Send + Sync,
{
    fn report(&self, fraction: f64, message: &str) -> anyhow::Result<()> {
        self(fraction, message)
    }
}

/// Maps a sink's `[0, 1]` range onto a sub-range of another sink.
///
/// Used when several segment scans feed one overall progress bar.
pub struct ScaledProgress {
    inner: Arc<dyn ProgressSink>,
    start: f64,
    span: f64,
}

impl ScaledProgress {
    pub fn new(inner: Arc<dyn ProgressSink>, start: f64, end: f64) -> Self {
        Self {
            inner,
            start,
            span: end - start,
        }
    }

    /// Slot `index` of `count` equal slots.
    pub fn segment(inner: Arc<dyn ProgressSink>, index: usize, count: usize) -> Self {
        let count = count.max(1) as f64;
        Self::new(inner, index as f64 / count, (index + 1) as f64 / count)
    }
}

impl ProgressSink for ScaledProgress {
    fn report(&self, fraction: f64, message: &str) -> anyhow::Result<()> {
        self.inner
            .report(self.start + fraction.clamp(0.0, 1.0) * self.span, message)
    }
}

/// Invoke `sink`, swallowing errors and panics.
pub(crate) fn notify(sink: Option<&dyn ProgressSink>, fraction: f64, message: &str) {
    let Some(sink) = sink else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| sink.report(fraction, message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Progress callback failed"),
        Err(_) => warn!("Progress callback panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_scaled_progress_maps_segments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |f: f64, _: &str| {
            sink_seen.lock().unwrap().push(f);
            Ok(())
        });

        let second = ScaledProgress::segment(sink, 1, 2);
        second.report(0.0, "").unwrap();
        second.report(0.5, "").unwrap();
        second.report(1.0, "").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_notify_swallows_errors_and_panics() {
        let failing = |_: f64, _: &str| -> anyhow::Result<()> { anyhow::bail!("ui closed") };
        notify(Some(&failing), 0.5, "half");

        let panicking = |_: f64, _: &str| -> anyhow::Result<()> { panic!("boom") };
        notify(Some(&panicking), 0.5, "half");

        notify(None, 1.0, "done");
    }
}
