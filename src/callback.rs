use crate::tracker::Tracker;
use std::collections::BTreeMap;

/// Metric values of a finished epoch, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochLogs {
    metrics: BTreeMap<String, f64>,
}

impl EpochLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.metrics
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }
}

impl std::fmt::Display for EpochLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{name} {value:.4}")?;
            first = false;
        }

        Ok(())
    }
}

/// Hooks invoked by the training loop at its lifecycle points.
///
/// Every hook does nothing by default. Epoch indices start at 0.
pub trait TrainingCallback {
    /// Called once before the first epoch.
    fn on_train_begin(&mut self) {}

    /// Called before every epoch.
    fn on_epoch_begin(&mut self, _epoch: usize) {}

    /// Called after every epoch with the metrics of that epoch.
    fn on_epoch_end(&mut self, _epoch: usize, _logs: Option<&EpochLogs>) {}

    /// Called once after the last epoch with the metrics of that epoch.
    fn on_train_end(&mut self, _logs: Option<&EpochLogs>) {}
}

/// Flushes a [tracker](Tracker) at the end of every epoch.
///
/// The callback never starts nor stops the tracker; the caller owns that.
pub struct CarbonCallback<T: Tracker> {
    tracker: T,
}

impl<T: Tracker> CarbonCallback<T> {
    pub fn new(tracker: T) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    pub fn into_inner(self) -> T {
        self.tracker
    }
}

impl<T: Tracker> TrainingCallback for CarbonCallback<T> {
    fn on_epoch_end(&mut self, epoch: usize, _logs: Option<&EpochLogs>) {
        if let Err(err) = self.tracker.flush() {
            log::warn!("Failed to flush the tracker after epoch {epoch}: {err}");
        }
    }
}
