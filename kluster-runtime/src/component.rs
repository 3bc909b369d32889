//! The contract every reconcilable unit implements
use crate::Result;
use async_trait::async_trait;
use kluster_core::{ComponentStatus, Outcome};
use std::any::Any;

/// One reconcilable wrapper around a single external resource
///
/// Components are built fresh every pass and hold no state across passes besides
/// what they read back from the resource they wrap. Each component is the only
/// writer of its resource's desired state.
///
/// # Contract
///
/// [`reconcile`](Component::reconcile) and [`delete`](Component::delete) must be
/// idempotent: they are re-run on every delivered event, including after a failed
/// or cancelled pass. A zero [`Outcome`] means the resource reached its terminal
/// state; anything else means "check back later".
///
/// Cancellation happens by dropping the future, at any `.await`.
#[async_trait]
pub trait Component: AsAny + Send + Sync {
    /// Stable display name, used in status records and logs
    fn name(&self) -> String;

    /// Move the wrapped resource one step closer to its desired state
    async fn reconcile(&mut self) -> Result<Outcome>;

    /// Begin or continue removal of the wrapped resource
    async fn delete(&mut self) -> Result<Outcome>;

    /// Enrich the status record written for this component
    fn set_status(&self, _status: &mut ComponentStatus) {}

    /// Optional confirmation that the resource is really gone
    fn deletion_status(&self) -> Option<&dyn WithDeletionStatus> {
        None
    }
}

/// Components that must block finalizer removal until absence is confirmed
#[async_trait]
pub trait WithDeletionStatus: Send + Sync {
    /// Whether the resource is gone
    async fn is_deleted(&self) -> Result<bool>;
}

/// Downcasting support so providers can reach their typed components
pub trait AsAny: Any {
    /// `&self` as [`Any`]
    fn as_any(&self) -> &dyn Any;
    /// `&mut self` as [`Any`]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
