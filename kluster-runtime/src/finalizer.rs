//! Finalizer component guarding the owner object
use crate::{
    component::{Component, WithDeletionStatus},
    Error, Result,
};
use async_trait::async_trait;
use kluster_core::{ComponentStatus, Outcome};
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use tracing::{debug, info};

/// Keeps a marker in the owner's `metadata.finalizers` while its external resources exist
///
/// Registered as the guard of a [`ClusterComponents`](crate::ClusterComponents), so it is the
/// first entry to reconcile and the last to delete.
///
/// # State machine
///
/// 1. Owner is created without the marker
/// 2. [`reconcile`](Component::reconcile) adds it and asks for an immediate requeue, so no
///    other component runs in the same pass and the owner cannot disappear mid-provisioning
/// 3. Later passes find the marker present and succeed without calls
/// 4. Owner is deleted; every other component gets torn down first
/// 5. [`delete`](Component::delete) removes the marker and Kubernetes garbage collects the owner
///
/// # Assumptions
///
/// The marker must be unique among the controllers touching the owner. Patches are
/// guarded by a JSON patch `test`, so a concurrent change to the finalizer list makes
/// the patch fail instead of clobbering another controller's marker; the next pass retries.
pub struct Finalizer<K> {
    api: Api<K>,
    name: Option<String>,
    marker: String,
    finalizers: Vec<String>,
}

impl<K> Finalizer<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    /// Finalizer for `owner`, patched through `api`
    pub fn new(api: Api<K>, owner: &K, marker: impl Into<String>) -> Self {
        Self {
            api,
            name: owner.meta().name.clone(),
            marker: marker.into(),
            finalizers: owner.finalizers().to_vec(),
        }
    }

    fn position(&self) -> Option<usize> {
        self.finalizers.iter().position(|f| *f == self.marker)
    }

    fn owner_name(&self) -> Result<&str> {
        self.name.as_deref().ok_or(Error::UnnamedObject)
    }

    async fn add(&mut self) -> Result<()> {
        let ops = if self.finalizers.is_empty() {
            json!([
                { "op": "test", "path": "/metadata/finalizers", "value": null },
                { "op": "add", "path": "/metadata/finalizers", "value": [self.marker] },
            ])
        } else {
            // Kubernetes doesn't deduplicate finalizers, so fail and retry if anyone
            // else changed the list in the meantime
            json!([
                { "op": "test", "path": "/metadata/finalizers", "value": self.finalizers },
                { "op": "add", "path": "/metadata/finalizers/-", "value": self.marker },
            ])
        };
        let patch: json_patch::Patch = serde_json::from_value(ops).map_err(Error::InvalidFinalizer)?;
        let updated = self
            .api
            .patch::<K>(self.owner_name()?, &PatchParams::default(), &Patch::Json(patch))
            .await
            .map_err(Error::AddFinalizer)?;
        self.finalizers = updated.finalizers().to_vec();
        Ok(())
    }

    async fn remove(&mut self, index: usize) -> Result<()> {
        let path = format!("/metadata/finalizers/{index}");
        // `test` makes sure we never remove someone else's finalizer by index
        let patch: json_patch::Patch = serde_json::from_value(json!([
            { "op": "test", "path": path, "value": self.marker },
            { "op": "remove", "path": path },
        ]))
        .map_err(Error::InvalidFinalizer)?;
        self.api
            .patch::<K>(self.owner_name()?, &PatchParams::default(), &Patch::Json(patch))
            .await
            .map_err(Error::RemoveFinalizer)?;
        self.finalizers.remove(index);
        Ok(())
    }
}

#[async_trait]
impl<K> Component for Finalizer<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    fn name(&self) -> String {
        "Finalizer".to_string()
    }

    async fn reconcile(&mut self) -> Result<Outcome> {
        if self.position().is_some() {
            debug!(marker = %self.marker, "finalizer present");
            return Ok(Outcome::done());
        }
        self.add().await?;
        info!(marker = %self.marker, "added finalizer");
        Ok(Outcome::requeue())
    }

    async fn delete(&mut self) -> Result<Outcome> {
        if let Some(index) = self.position() {
            self.remove(index).await?;
            info!(marker = %self.marker, "removed finalizer");
        }
        Ok(Outcome::done())
    }

    fn set_status(&self, status: &mut ComponentStatus) {
        if self.position().is_none() {
            status.message = Some(format!("{} not set", self.marker));
        }
    }

    fn deletion_status(&self) -> Option<&dyn WithDeletionStatus> {
        Some(self)
    }
}

#[async_trait]
impl<K> WithDeletionStatus for Finalizer<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    /// `true` when the marker is absent, i.e. it would still need adding
    async fn is_deleted(&self) -> Result<bool> {
        Ok(self.position().is_none())
    }
}
