//! The `Cluster` controller: one engine pass per delivered reconcile request
use crate::{
    components::ClusterComponents,
    config::OperatorConfig,
    engine::Components,
    finalizer::Finalizer,
    provider::{ClusterContext, ProviderRegistry},
    Error, Result,
};
use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use futures::StreamExt;
use kluster_core::{Cluster, ClusterPhase, ClusterStatus, ComponentOwner, ComponentState, Outcome};
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::{
        controller::{self, Action},
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use parking_lot::Mutex;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, info_span, warn, Instrument};

/// Event reasons published on `Cluster` objects
pub mod reasons {
    /// A pass failed
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// The spec was rejected before any component ran
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// The cluster moved to another phase
    pub const PHASE_CHANGED: &str = "PhaseChanged";
}

/// Where the controller publishes Kubernetes Events
///
/// Publishing is fire-and-forget: failures are logged and never fail a pass.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event about `cluster`
    async fn publish(&self, cluster: &Cluster, type_: EventType, reason: &str, note: Option<String>);
}

/// [`EventSink`] backed by a [`Recorder`]
pub struct RecorderSink {
    recorder: Recorder,
}

impl RecorderSink {
    /// Report events as `controller`
    pub fn new(client: Client, controller: impl Into<String>) -> Self {
        let reporter = Reporter {
            controller: controller.into(),
            instance: std::env::var("CONTROLLER_POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for RecorderSink {
    async fn publish(&self, cluster: &Cluster, type_: EventType, reason: &str, note: Option<String>) {
        let event = Event {
            type_,
            reason: reason.into(),
            note,
            action: "Reconcile".into(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, &cluster.object_ref(&())).await {
            warn!(reason, error = %err, "failed to publish event");
        }
    }
}

/// State shared by every reconcile
pub struct Context {
    /// Client for the management cluster
    pub client: Client,
    /// Providers by type name
    pub registry: ProviderRegistry,
    /// Operator settings
    pub config: OperatorConfig,
    engine: Components,
    events: Arc<dyn EventSink>,
    backoff: Mutex<HashMap<ObjectRef<Cluster>, ExponentialBackoff>>,
}

impl Context {
    /// Context publishing events through a [`RecorderSink`]
    pub fn new(client: Client, registry: ProviderRegistry, config: OperatorConfig) -> Self {
        let events = Arc::new(RecorderSink::new(client.clone(), config.field_manager.clone()));
        Self {
            engine: Components::new(config.dependency_requeue),
            client,
            registry,
            config,
            events,
            backoff: Mutex::new(HashMap::new()),
        }
    }

    /// Publish events to `events` instead
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    fn backoff_builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.config.backoff_min)
            .with_max_delay(self.config.backoff_max)
            .with_factor(2.0)
            .without_max_times()
    }

    /// Delay before retrying `cluster` after another failure
    fn next_backoff(&self, cluster: &ObjectRef<Cluster>) -> std::time::Duration {
        let mut backoff = self.backoff.lock();
        backoff
            .entry(cluster.clone())
            .or_insert_with(|| self.backoff_builder().build())
            .next()
            .unwrap_or(self.config.backoff_max)
    }

    fn reset_backoff(&self, cluster: &ObjectRef<Cluster>) {
        self.backoff.lock().remove(cluster);
    }
}

/// Reconcile one `Cluster`
///
/// Looks up its provider, validates the spec, assembles the components behind the
/// finalizer guard, runs one engine pass and writes the status back. Errors are
/// returned after the status has been persisted, leaving retries to [`error_policy`].
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = cluster.namespace().ok_or(Error::UnnamespacedObject)?;
    let span = info_span!(
        "reconcile",
        cluster = %cluster.name_any(),
        namespace = %namespace,
        provider = %cluster.spec.provider,
    );
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut cluster = (*cluster).clone();
    let previous = cluster.status.as_ref().map(|s| s.phase).unwrap_or_default();

    let result = pass(&api, &mut cluster, &ctx).instrument(span.clone()).await;
    let outcome = finish(&api, &mut cluster, previous, result, &ctx).instrument(span).await;
    let key = ObjectRef::from_obj(&cluster);
    match outcome {
        Ok(outcome) => {
            ctx.reset_backoff(&key);
            Ok(outcome.into_action(ctx.config.resync))
        }
        Err(err) => Err(err),
    }
}

/// Provider lookup, validation, component assembly and the engine pass
async fn pass(api: &Api<Cluster>, cluster: &mut Cluster, ctx: &Context) -> Result<Outcome> {
    let provider = ctx.registry.get(&cluster.spec.provider)?;
    let cluster_ctx = ClusterContext::new(&*provider, cluster, ctx.client.clone())?;
    if !cluster.is_deleting() {
        provider.validate(&cluster_ctx).await?;
    }

    let mut components = ClusterComponents::new();
    components.add_guard(Finalizer::new(api.clone(), &*cluster, ctx.config.finalizer.clone()))?;
    provider.set_components(&cluster_ctx, &mut components).await?;
    provider.before_components_update(&cluster_ctx, &mut components).await?;
    debug!(components = ?components.names(), "assembled components");

    let outcome = ctx.engine.reconcile(&mut components, cluster).await?;
    if !cluster.is_deleting() {
        provider.set_provider_data(&components, cluster).await?;
    }
    Ok(outcome)
}

/// Derive the phase, persist the status and publish events for a finished pass
async fn finish(
    api: &Api<Cluster>,
    cluster: &mut Cluster,
    previous: ClusterPhase,
    result: Result<Outcome>,
    ctx: &Context,
) -> Result<Outcome> {
    let deleting = cluster.is_deleting();
    let generation = cluster.metadata.generation;
    let status = cluster.status_mut();
    status.observed_generation = generation;
    status.phase = phase_after(deleting, &result);
    status.message = match &result {
        Ok(outcome) if outcome.is_done() => None,
        Ok(_) => pending_message(status),
        Err(err) => Some(err.to_string()),
    };
    let phase = status.phase;
    let message = status.message.clone();

    let stored = match persist_status(api, cluster, &ctx.config).await {
        Ok(stored) => stored,
        Err(err) => {
            warn!(error = %err, "failed to persist status");
            if result.is_ok() {
                return Err(err);
            }
            true
        }
    };

    if phase != previous {
        info!(from = %previous, to = %phase, "phase changed");
        ctx.events
            .publish(
                cluster,
                EventType::Normal,
                reasons::PHASE_CHANGED,
                Some(format!("{previous} -> {phase}")),
            )
            .await;
    }
    if let Err(err) = &result {
        let reason = if err.is_validation() {
            reasons::VALIDATION_FAILED
        } else {
            reasons::RECONCILE_FAILED
        };
        ctx.events.publish(cluster, EventType::Warning, reason, message).await;
    }
    if !stored {
        // nothing left to retry against
        if let Err(err) = &result {
            debug!(error = %err, "cluster is gone, dropping the error");
        }
        return Ok(result.unwrap_or_else(|_| Outcome::done()));
    }
    result
}

fn phase_after(deleting: bool, result: &Result<Outcome>) -> ClusterPhase {
    match result {
        Err(err) if err.is_terminal() => ClusterPhase::Failed,
        _ if deleting => ClusterPhase::Deleting,
        Ok(outcome) if outcome.is_done() => ClusterPhase::Ready,
        _ => ClusterPhase::Provisioning,
    }
}

/// Describe the last component that has not converged
fn pending_message(status: &ClusterStatus) -> Option<String> {
    status
        .components
        .iter()
        .rev()
        .find(|c| !matches!(c.status, ComponentState::Ok | ComponentState::Deleted))
        .map(|c| match &c.message {
            Some(message) => format!("{}: {message}", c.name),
            None => format!("{} {}", c.name, c.status),
        })
}

/// Merge-patch the status subresource, returning whether the cluster still exists
///
/// A cluster whose finalizer was just removed may already be gone; that is not an error.
async fn persist_status(api: &Api<Cluster>, cluster: &Cluster, config: &OperatorConfig) -> Result<bool> {
    let name = cluster.meta().name.as_deref().ok_or(Error::UnnamedObject)?;
    let patch = json!({ "status": cluster.status });
    let params = PatchParams {
        field_manager: Some(config.field_manager.clone()),
        ..PatchParams::default()
    };
    match api.patch_status(name, &params, &Patch::Merge(&patch)).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            debug!("cluster gone before status could be written");
            Ok(false)
        }
        Err(err) => Err(Error::PatchStatus(err)),
    }
}

/// Retry delay after a failed pass, growing exponentially per cluster
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.next_backoff(&ObjectRef::from_obj(&*cluster));
    warn!(cluster = %cluster.name_any(), error = %error, ?delay, "reconcile failed");
    Action::requeue(delay)
}

/// Run the controller until a termination signal arrives
///
/// # Errors
///
/// Fails early when the `Cluster` CRD is not installed.
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let clusters = Api::<Cluster>::all(ctx.client.clone());
    clusters
        .list(&ListParams::default().limit(1))
        .await
        .map_err(Error::Kube)?;
    info!(
        providers = ?ctx.registry.types(),
        concurrency = ctx.config.concurrency,
        "starting cluster controller"
    );

    let config = controller::Config::default().concurrency(ctx.config.concurrency);
    Controller::new(clusters, watcher::Config::default().any_semantic())
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((cluster, action)) => debug!(%cluster, ?action, "reconciled"),
                Err(err) => debug!(error = %err, "reconcile failed"),
            }
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock_tests::{cluster, cluster_json, testcontext},
        provider::tests::Fake,
    };
    use http::StatusCode;
    use std::time::Duration;

    const MARKER: &str = "kluster.dev/cleanup";

    #[derive(Default)]
    struct Captured(Mutex<Vec<(String, Option<String>)>>);

    #[async_trait]
    impl EventSink for Captured {
        async fn publish(&self, _cluster: &Cluster, _type_: EventType, reason: &str, note: Option<String>) {
            self.0.lock().push((reason.to_string(), note));
        }
    }

    fn context(client: Client, shape: Vec<&'static str>) -> (Arc<Context>, Arc<Captured>) {
        let registry = ProviderRegistry::new().with(Fake { name: "test", shape }).unwrap();
        let events = Arc::new(Captured::default());
        let config = OperatorConfig::default().backoff(Duration::from_secs(1), Duration::from_secs(4));
        let ctx = Context::new(client, registry, config).with_events(events.clone());
        (Arc::new(ctx), events)
    }

    #[tokio::test]
    async fn converged_cluster_is_ready() {
        let (client, mut apiserver) = testcontext();
        let (ctx, events) = context(client, vec!["network", "cluster"]);
        let owner = Arc::new(cluster(&[MARKER], false));

        let (action, ()) = tokio::join!(reconcile(owner, ctx), async {
            let seen = apiserver.next().await;
            assert_eq!(seen.method, http::Method::PATCH);
            assert!(seen
                .uri
                .starts_with("/apis/kluster.dev/v1alpha1/namespaces/default/clusters/c1/status?"));
            assert_eq!(seen.content_type.as_deref(), Some("application/merge-patch+json"));
            let status = &seen.body["status"];
            assert_eq!(status["phase"], "Ready");
            assert_eq!(status["observedGeneration"], 2);
            let names: Vec<_> = status["components"]
                .as_array()
                .unwrap()
                .iter()
                .map(|c| (c["name"].as_str().unwrap().to_string(), c["status"].as_str().unwrap().to_string()))
                .collect();
            assert_eq!(names, vec![
                ("Finalizer".to_string(), "Ok".to_string()),
                ("network".to_string(), "Ok".to_string()),
                ("cluster".to_string(), "Ok".to_string()),
            ]);
            seen.respond(cluster_json(&[MARKER], false));
        });
        assert_eq!(action.unwrap(), Action::requeue(Duration::from_secs(300)));
        assert_eq!(events.0.lock()[0].0, reasons::PHASE_CHANGED);
    }

    #[tokio::test]
    async fn new_cluster_gets_finalizer_first() {
        let (client, mut apiserver) = testcontext();
        let (ctx, _events) = context(client, vec!["network", "cluster"]);
        let owner = Arc::new(cluster(&[], false));

        let (action, ()) = tokio::join!(reconcile(owner, ctx), async {
            let seen = apiserver.next().await;
            assert!(seen.uri.starts_with("/apis/kluster.dev/v1alpha1/namespaces/default/clusters/c1?"));
            assert_eq!(seen.body[1]["value"], json!([MARKER]));
            seen.respond(cluster_json(&[MARKER], false));

            let seen = apiserver.next().await;
            assert!(seen.uri.contains("/clusters/c1/status"));
            assert_eq!(seen.body["status"]["phase"], "Provisioning");
            assert_eq!(seen.body["status"]["components"].as_array().unwrap().len(), 1);
            assert_eq!(seen.body["status"]["components"][0]["status"], "Pending");
            seen.respond(cluster_json(&[MARKER], false));
        });
        assert_eq!(action.unwrap(), Action::requeue(Duration::ZERO));
    }

    #[tokio::test]
    async fn unknown_provider_fails_the_cluster() {
        let (client, mut apiserver) = testcontext();
        let (ctx, events) = context(client, vec![]);
        let mut owner = cluster(&[MARKER], false);
        owner.spec.provider = "openstack".into();

        let (result, ()) = tokio::join!(reconcile(Arc::new(owner), ctx), async {
            let seen = apiserver.next().await;
            assert_eq!(seen.body["status"]["phase"], "Failed");
            assert_eq!(seen.body["status"]["message"], r#"no provider registered for "openstack""#);
            seen.respond(cluster_json(&[MARKER], false));
        });
        assert!(matches!(result, Err(Error::UnknownProvider(_))));
        let events = events.0.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0, reasons::RECONCILE_FAILED);
    }

    #[tokio::test]
    async fn rejected_config_never_builds_components() {
        let (client, mut apiserver) = testcontext();
        let (ctx, events) = context(client, vec!["network"]);
        let mut owner = cluster(&[], false);
        owner.spec.config.insert("size".into(), "xxl".into());

        let (result, ()) = tokio::join!(reconcile(Arc::new(owner), ctx), async {
            // no finalizer patch: validation happens first
            let seen = apiserver.next().await;
            assert!(seen.uri.contains("/clusters/c1/status"));
            assert_eq!(seen.body["status"]["phase"], "Failed");
            assert_eq!(seen.body["status"]["components"], json!([]));
            seen.respond(cluster_json(&[], false));
        });
        assert!(result.unwrap_err().is_validation());
        assert_eq!(events.0.lock()[1].0, reasons::VALIDATION_FAILED);
    }

    #[tokio::test]
    async fn deleted_cluster_drops_finalizer_and_tolerates_404() {
        let (client, mut apiserver) = testcontext();
        let (ctx, _events) = context(client, vec!["network", "cluster"]);
        let owner = Arc::new(cluster(&[MARKER], true));

        let (action, ()) = tokio::join!(reconcile(owner, ctx), async {
            let seen = apiserver.next().await;
            assert_eq!(seen.body[1], json!({ "op": "remove", "path": "/metadata/finalizers/0" }));
            seen.respond(cluster_json(&[], true));

            let seen = apiserver.next().await;
            assert!(seen.uri.contains("/clusters/c1/status"));
            assert_eq!(seen.body["status"]["phase"], "Deleting");
            seen.fail(StatusCode::NOT_FOUND);
        });
        assert_eq!(action.unwrap(), Action::requeue(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn recovered_cluster_clears_the_old_error() {
        let (client, mut apiserver) = testcontext();
        let (ctx, _events) = context(client, vec!["network"]);
        let mut owner = cluster(&[MARKER], false);
        owner.status_mut().phase = ClusterPhase::Provisioning;
        owner.status_mut().message = Some("component network: cloud api: boom".into());
        let mut stored = serde_json::to_value(&owner).unwrap();

        let (action, ()) = tokio::join!(reconcile(Arc::new(owner), ctx), async {
            let seen = apiserver.next().await;
            assert_eq!(seen.body["status"].get("message"), Some(&serde_json::Value::Null));
            json_patch::merge(&mut stored, &seen.body);
            assert_eq!(stored["status"]["phase"], "Ready");
            assert!(stored["status"].get("message").is_none());
            seen.respond(stored.clone());
        });
        assert_eq!(action.unwrap(), Action::requeue(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn vanished_cluster_forgets_its_backoff() {
        let (client, mut apiserver) = testcontext();
        let (ctx, _events) = context(client, vec![]);
        let mut owner = cluster(&[MARKER], false);
        owner.spec.provider = "openstack".into();
        let owner = Arc::new(owner);
        error_policy(owner.clone(), &Error::UnknownProvider("openstack".into()), ctx.clone());
        assert_eq!(ctx.backoff.lock().len(), 1);

        let (action, ()) = tokio::join!(reconcile(owner, ctx.clone()), async {
            let seen = apiserver.next().await;
            assert!(seen.uri.contains("/clusters/c1/status"));
            seen.fail(StatusCode::NOT_FOUND);
        });
        assert_eq!(action.unwrap(), Action::requeue(Duration::from_secs(300)));
        assert!(ctx.backoff.lock().is_empty());
    }

    #[tokio::test]
    async fn backoff_grows_per_cluster_and_resets() {
        let (client, _apiserver) = testcontext();
        let (ctx, _events) = context(client, vec![]);
        let owner = Arc::new(cluster(&[MARKER], false));
        let err = Error::Validation("boom".into());

        let delays: Vec<Action> = (0..4)
            .map(|_| error_policy(owner.clone(), &err, ctx.clone()))
            .collect();
        assert_eq!(delays, vec![
            Action::requeue(Duration::from_secs(1)),
            Action::requeue(Duration::from_secs(2)),
            Action::requeue(Duration::from_secs(4)),
            Action::requeue(Duration::from_secs(4)),
        ]);

        ctx.reset_backoff(&ObjectRef::from_obj(&*owner));
        assert_eq!(
            error_policy(owner, &err, ctx),
            Action::requeue(Duration::from_secs(1))
        );
    }
}
