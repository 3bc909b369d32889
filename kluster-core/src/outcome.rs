//! The result of driving one component, or a whole pass, one step forward
use kube::runtime::controller::Action;
use std::time::Duration;

/// What a reconcile step asks of the delivery system
///
/// A zero `Outcome` ([`Outcome::done`]) means the step reached its terminal
/// state and nothing more is needed. Anything else means "not yet done,
/// check back": either immediately (`requeue`) or after a delay.
///
/// Outcomes of several steps are combined with [`Outcome::merge`], which keeps
/// the strictest request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Retry as soon as possible
    pub requeue: bool,
    /// Retry after this delay
    pub requeue_after: Option<Duration>,
}

impl Outcome {
    /// The step is finished
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// The step needs another pass right away
    #[must_use]
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// The step needs another pass after `duration`
    ///
    /// A zero duration is treated as an immediate requeue.
    #[must_use]
    pub fn requeue_after(duration: Duration) -> Self {
        if duration.is_zero() {
            return Self::requeue();
        }
        Self {
            requeue: false,
            requeue_after: Some(duration),
        }
    }

    /// Whether this is the zero outcome
    pub fn is_done(&self) -> bool {
        !self.requeue && self.requeue_after.is_none()
    }

    /// Combine two outcomes, keeping the strictest request
    ///
    /// `requeue` wins over a bare delay, and between two delays the smallest wins.
    #[must_use]
    pub fn merge(self, other: Outcome) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            requeue: self.requeue || other.requeue,
            requeue_after,
        }
    }

    /// Translate into an [`Action`] for the controller runtime
    ///
    /// A finished pass still resyncs after `resync` so drift in the cloud gets noticed.
    pub fn into_action(self, resync: Duration) -> Action {
        if self.requeue {
            Action::requeue(Duration::ZERO)
        } else if let Some(after) = self.requeue_after {
            Action::requeue(after)
        } else {
            Action::requeue(resync)
        }
    }
}
