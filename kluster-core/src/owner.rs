use crate::{cluster::Cluster, status::ComponentStatus};
use kube::Resource;

/// An object whose external resources are driven by a component collection
///
/// The engine reads `metadata.deletionTimestamp` and `metadata.finalizers`
/// through [`Resource`], and writes the records of each pass through
/// [`ComponentOwner::set_component_statuses`].
pub trait ComponentOwner: Resource<DynamicType = ()> {
    /// Replace `status.components` with the records of the latest pass
    fn set_component_statuses(&mut self, statuses: Vec<ComponentStatus>);

    /// Records written by the latest pass
    fn component_statuses(&self) -> &[ComponentStatus];

    /// Whether the owner is being deleted
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Whether `marker` is in `metadata.finalizers`
    fn has_finalizer(&self, marker: &str) -> bool {
        self.meta().finalizers.iter().flatten().any(|f| f == marker)
    }
}

impl ComponentOwner for Cluster {
    fn set_component_statuses(&mut self, statuses: Vec<ComponentStatus>) {
        self.status_mut().components = statuses;
    }

    fn component_statuses(&self) -> &[ComponentStatus] {
        self.status.as_ref().map(|s| s.components.as_slice()).unwrap_or_default()
    }
}
