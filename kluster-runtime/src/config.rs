//! Operator level settings
use std::time::Duration;

/// Settings shared by every cluster the controller reconciles
///
/// Constructed with [`OperatorConfig::default`] and adjusted through the builder
/// methods:
///
/// ```
/// use kluster_runtime::OperatorConfig;
/// use std::time::Duration;
///
/// let config = OperatorConfig::default()
///     .concurrency(4)
///     .resync(Duration::from_secs(600));
/// assert_eq!(config.finalizer, "kluster.dev/cleanup");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Marker the finalizer guard keeps on every `Cluster`
    pub finalizer: String,
    /// Field manager for status patches and server side applies
    pub field_manager: String,
    /// Clusters reconciled in parallel, `0` for unbounded
    pub concurrency: u16,
    /// Requeue delay when a component waits on a dependency
    pub dependency_requeue: Duration,
    /// Requeue delay once everything converged
    pub resync: Duration,
    /// First retry delay after a failed pass
    pub backoff_min: Duration,
    /// Cap on the retry delay
    pub backoff_max: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            finalizer: "kluster.dev/cleanup".into(),
            field_manager: "kluster".into(),
            concurrency: 8,
            dependency_requeue: Duration::from_secs(10),
            resync: Duration::from_secs(300),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl OperatorConfig {
    /// Use `marker` as finalizer
    #[must_use]
    pub fn finalizer(mut self, marker: impl Into<String>) -> Self {
        self.finalizer = marker.into();
        self
    }

    /// Patch as `manager`
    #[must_use]
    pub fn field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    /// Reconcile at most `n` clusters at once
    #[must_use]
    pub fn concurrency(mut self, n: u16) -> Self {
        self.concurrency = n;
        self
    }

    /// Requeue blocked components after `delay`
    #[must_use]
    pub fn dependency_requeue(mut self, delay: Duration) -> Self {
        self.dependency_requeue = delay;
        self
    }

    /// Revisit converged clusters after `interval`
    #[must_use]
    pub fn resync(mut self, interval: Duration) -> Self {
        self.resync = interval;
        self
    }

    /// Retry failed passes between `min` and `max`, doubling in between
    ///
    /// `max` is raised to `min` if smaller.
    #[must_use]
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max.max(min);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_bounds_stay_ordered() {
        let config = OperatorConfig::default().backoff(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(config.backoff_min, Duration::from_secs(30));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
    }
}
