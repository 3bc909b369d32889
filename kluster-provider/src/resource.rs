//! Generic convergence loop for one cloud resource
use crate::cloud::{CloudApi, CloudError, CloudResource, Convergence};
use async_trait::async_trait;
use futures::FutureExt;
use kluster_core::{Cluster, ComponentStatus, Outcome};
use kluster_runtime::{
    bootstrap::{BootstrapFactory, Bootstrapper},
    ClusterAccess, Component, Error, Result, WithDeletionStatus,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Default delay before looking at a resource again
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);

/// Component converging one external resource of type `R`
///
/// Each reconcile looks the resource up by its external name:
///
/// - absent: create it (unless [`CloudResource::precondition`] says not yet) and requeue,
///   since the cloud only accepted the request
/// - present and succeeded: done, without further calls
/// - present and anything else: requeue, or fail on a terminal failure state
///
/// Delete mirrors this: absent is done, present gets a delete call and a requeue until a
/// later lookup no longer finds it.
pub struct ResourceComponent<R: CloudResource> {
    name: String,
    external_name: String,
    api: Arc<dyn CloudApi<R>>,
    spec: R::Spec,
    observed: Option<R::Status>,
    note: Option<String>,
    gone: bool,
    create_requeue: Duration,
    poll_requeue: Duration,
}

impl<R: CloudResource> ResourceComponent<R> {
    /// Component displayed as `name`, converging `external_name` towards `spec`
    pub fn new(
        name: impl Into<String>,
        external_name: impl Into<String>,
        api: Arc<dyn CloudApi<R>>,
        spec: R::Spec,
    ) -> Self {
        Self {
            name: name.into(),
            external_name: external_name.into(),
            api,
            spec,
            observed: None,
            note: None,
            gone: false,
            create_requeue: DEFAULT_REQUEUE,
            poll_requeue: DEFAULT_REQUEUE,
        }
    }

    /// Requeue after `create` once a create call was accepted, after `poll` while converging
    #[must_use]
    pub fn requeue(mut self, create: Duration, poll: Duration) -> Self {
        self.create_requeue = create;
        self.poll_requeue = poll;
        self
    }

    /// Name of the resource in the cloud
    pub fn external_name(&self) -> &str {
        &self.external_name
    }

    /// Desired state
    pub fn spec(&self) -> &R::Spec {
        &self.spec
    }

    /// Desired state, for `before_components_update`
    pub fn spec_mut(&mut self) -> &mut R::Spec {
        &mut self.spec
    }

    /// State read by the last lookup of this pass
    pub fn observed(&self) -> Option<&R::Status> {
        self.observed.as_ref()
    }

    async fn lookup(&mut self) -> Result<Option<R::Status>> {
        match self.api.get(&self.external_name).await {
            Ok(status) => {
                self.observed = Some(status.clone());
                Ok(Some(status))
            }
            Err(err) if R::is_not_found(&err) => {
                self.observed = None;
                Ok(None)
            }
            Err(err) => Err(cloud(err)),
        }
    }
}

fn cloud(err: CloudError) -> Error {
    Error::Cloud(Box::new(err))
}

#[async_trait]
impl<R: CloudResource> Component for ResourceComponent<R> {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn reconcile(&mut self) -> Result<Outcome> {
        let Some(status) = self.lookup().await? else {
            if let Some(reason) = R::precondition(&self.spec) {
                debug!(kind = R::KIND, name = %self.external_name, %reason, "not ready to create");
                self.note = Some(format!("waiting: {reason}"));
                return Ok(Outcome::requeue_after(self.poll_requeue));
            }
            self.api
                .create_or_update(&self.external_name, &self.spec)
                .await
                .map_err(cloud)?;
            info!(kind = R::KIND, name = %self.external_name, "requested creation");
            self.note = Some("creating".into());
            return Ok(Outcome::requeue_after(self.create_requeue));
        };

        match R::classify(&status) {
            Convergence::Succeeded => {
                self.note = None;
                Ok(Outcome::done())
            }
            Convergence::Failed(reason) => {
                self.note = Some(R::state(&status).to_string());
                Err(Error::ProvisioningFailed {
                    kind: R::KIND,
                    name: self.external_name.clone(),
                    reason,
                })
            }
            Convergence::InProgress | Convergence::Deleting => {
                debug!(kind = R::KIND, name = %self.external_name, state = R::state(&status), "converging");
                self.note = Some(format!("state {}", R::state(&status)));
                Ok(Outcome::requeue_after(self.poll_requeue))
            }
        }
    }

    async fn delete(&mut self) -> Result<Outcome> {
        let Some(status) = self.lookup().await? else {
            self.gone = true;
            self.note = None;
            return Ok(Outcome::done());
        };
        if R::classify(&status) == Convergence::Deleting {
            debug!(kind = R::KIND, name = %self.external_name, "deletion in progress");
        } else {
            self.api.delete(&self.external_name).await.map_err(cloud)?;
            info!(kind = R::KIND, name = %self.external_name, "requested deletion");
        }
        self.note = Some(format!("state {}", R::state(&status)));
        Ok(Outcome::requeue_after(self.poll_requeue))
    }

    fn set_status(&self, status: &mut ComponentStatus) {
        if let Some(note) = &self.note {
            status.message = Some(note.clone());
        }
    }

    fn deletion_status(&self) -> Option<&dyn WithDeletionStatus> {
        Some(self)
    }
}

#[async_trait]
impl<R: CloudResource> WithDeletionStatus for ResourceComponent<R> {
    async fn is_deleted(&self) -> Result<bool> {
        Ok(self.gone)
    }
}

/// Bootstrap factory that looks up `name` when run and connects with its access details
///
/// The lookup happens when the bootstrap component reconciles, that is after the
/// resource it depends on converged in the same pass.
pub fn lazy_bootstrap<R: CloudResource>(
    api: Arc<dyn CloudApi<R>>,
    name: String,
    access: fn(&R::Status) -> Option<ClusterAccess>,
    bootstrapper: Bootstrapper,
    owner: Cluster,
) -> BootstrapFactory {
    Box::new(move || {
        let (api, name) = (api.clone(), name.clone());
        let (bootstrapper, owner) = (bootstrapper.clone(), owner.clone());
        async move {
            let status = api.get(&name).await.map_err(cloud)?;
            let access = access(&status)
                .ok_or_else(|| Error::Connect(format!("{} {name} reports no endpoint", R::KIND)))?;
            bootstrapper(owner, access).await
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{tests::Widget, MemoryCloud, Op};
    use http::StatusCode;

    fn component(cloud: &MemoryCloud<Widget>) -> ResourceComponent<Widget> {
        ResourceComponent::new("Widget", "w-1", cloud.api(), "blue".to_string())
    }

    #[tokio::test]
    async fn creates_then_polls_until_succeeded() {
        let cloud = MemoryCloud::<Widget>::new();
        let mut widget = component(&cloud);

        assert_eq!(widget.reconcile().await.unwrap(), Outcome::requeue_after(DEFAULT_REQUEUE));
        assert_eq!(cloud.calls(Op::CreateOrUpdate), 1);
        let mut status = ComponentStatus::new("Widget", kluster_core::ComponentState::Pending);
        widget.set_status(&mut status);
        assert_eq!(status.message.as_deref(), Some("creating"));

        // Building -> Ready
        assert_eq!(widget.reconcile().await.unwrap(), Outcome::requeue_after(DEFAULT_REQUEUE));
        assert_eq!(widget.reconcile().await.unwrap(), Outcome::done());
        assert_eq!(widget.observed().map(|s| s.state.as_str()), Some("Ready"));
        assert_eq!(cloud.calls(Op::CreateOrUpdate), 1);
    }

    #[tokio::test]
    async fn converged_resource_is_left_alone() {
        let cloud = MemoryCloud::<Widget>::new();
        cloud.seed("w-1", "blue".to_string());
        let mut widget = component(&cloud);

        assert_eq!(widget.reconcile().await.unwrap(), Outcome::done());
        assert_eq!(widget.reconcile().await.unwrap(), Outcome::done());
        assert_eq!(cloud.calls(Op::Get), 2);
        assert_eq!(cloud.calls(Op::CreateOrUpdate), 0);
    }

    #[tokio::test]
    async fn failure_state_is_fatal() {
        let cloud = MemoryCloud::<Widget>::new();
        cloud.seed("w-1", "blue".to_string());
        cloud.set_state("w-1", "Broken");
        let err = component(&cloud).reconcile().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProvisioningFailed { kind: "Widget", reason, .. } if reason == "Broken"
        ));
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let cloud = MemoryCloud::<Widget>::new();
        cloud.fail_next(Op::Get, CloudError::new(StatusCode::FORBIDDEN, "Denied", "no access"));
        let err = component(&cloud).reconcile().await.unwrap_err();
        assert_eq!(err.to_string(), "cloud api: Denied (403 Forbidden): no access");
    }

    #[tokio::test]
    async fn precondition_defers_creation() {
        let cloud = MemoryCloud::<Widget>::new();
        let mut widget = ResourceComponent::new("Widget", "w-1", cloud.api(), String::new());
        assert_eq!(widget.reconcile().await.unwrap(), Outcome::requeue_after(DEFAULT_REQUEUE));
        assert_eq!(cloud.calls(Op::CreateOrUpdate), 0);

        widget.spec_mut().push_str("red");
        widget.reconcile().await.unwrap();
        assert_eq!(cloud.calls(Op::CreateOrUpdate), 1);
    }

    #[tokio::test]
    async fn delete_requeues_until_absent() {
        let cloud = MemoryCloud::<Widget>::new();
        cloud.seed("w-1", "blue".to_string());
        let mut widget = component(&cloud);

        assert_eq!(widget.delete().await.unwrap(), Outcome::requeue_after(DEFAULT_REQUEUE));
        assert!(!widget.is_deleted().await.unwrap());
        // observed as Deleting: no second delete call
        assert_eq!(widget.delete().await.unwrap(), Outcome::requeue_after(DEFAULT_REQUEUE));
        assert_eq!(cloud.calls(Op::Delete), 1);
        assert_eq!(widget.delete().await.unwrap(), Outcome::done());
        assert!(widget.is_deleted().await.unwrap());
        assert_eq!(cloud.calls(Op::Delete), 1);
    }

    #[tokio::test]
    async fn deleting_an_absent_resource_is_a_noop() {
        let cloud = MemoryCloud::<Widget>::new();
        let mut widget = component(&cloud);
        assert_eq!(widget.delete().await.unwrap(), Outcome::done());
        assert_eq!(cloud.calls(Op::Delete), 0);
    }
}
