//! Progress reporting abstraction for long-running operations.
//!
//! Decouples the trainer from the terminal. The CLI hands in a
//! [`BarProgressReporter`]; library callers and tests use
//! [`NoopProgressReporter`].

use indicatif::{ProgressBar, ProgressStyle};

/// Reports progress for long-running operations.
///
/// `current` goes from 0.0 to `total`. Messages provide human-readable step
/// descriptions.
pub trait ProgressReporter: Send + Sync {
    /// Report progress. Implementations must never fail the caller.
    fn report(&self, current: f64, total: f64, message: Option<String>);

    /// Convenience: report a step out of N total steps.
    fn step(&self, step: usize, total_steps: usize, message: &str) {
        self.report(step as f64, total_steps as f64, Some(message.to_string()));
    }

    /// Called once when the operation ends.
    fn finish(&self, _message: &str) {}
}

/// No-op reporter for tests and non-interactive callers.
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn report(&self, _current: f64, _total: f64, _message: Option<String>) {}
}

/// Terminal progress bar.
pub struct BarProgressReporter {
    bar: ProgressBar,
}

impl BarProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl Default for BarProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarProgressReporter {
    fn report(&self, current: f64, total: f64, message: Option<String>) {
        self.bar.set_length(total.max(0.0) as u64);
        self.bar.set_position(current.max(0.0) as u64);
        if let Some(message) = message {
            self.bar.set_message(message);
        }
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test reporter that counts calls.
    struct CountingReporter {
        count: AtomicUsize,
    }

    impl ProgressReporter for CountingReporter {
        fn report(&self, _current: f64, _total: f64, _message: Option<String>) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_noop_reporter_does_nothing() {
        let reporter = NoopProgressReporter;
        reporter.report(0.5, 1.0, Some("test".into()));
        reporter.step(1, 3, "step one");
        reporter.finish("done");
    }

    #[test]
    fn test_step_convenience() {
        let reporter = CountingReporter {
            count: AtomicUsize::new(0),
        };
        reporter.step(1, 5, "step 1");
        reporter.step(2, 5, "step 2");
        assert_eq!(reporter.count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_bar_reporter_tracks_position() {
        let reporter = BarProgressReporter::new();
        reporter.step(3, 10, "epoch 1");
        assert_eq!(reporter.bar.position(), 3);
        assert_eq!(reporter.bar.length(), Some(10));
        reporter.finish("done");
    }

    #[test]
    fn test_reporter_usable_as_trait_object() {
        let reporters: Vec<Box<dyn ProgressReporter>> =
            vec![Box::new(NoopProgressReporter), Box::new(BarProgressReporter::new())];
        for reporter in &reporters {
            reporter.step(1, 2, "halfway");
            reporter.finish("done");
        }
    }
}
