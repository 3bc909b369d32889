// ------------------------------------------------------------------------
// whole passes over provider collections against the in-memory clouds
// ------------------------------------------------------------------------
use crate::{
    aws::EksProvider,
    azure::{AksProvider, ResourceGroupSpec},
    memory::Op,
    mock_tests::{cluster_json, probe, testcontext, ApiServerVerifier},
    CloudError, SimulatedClouds,
};
use http::StatusCode;
use kluster_core::{Cluster, ComponentOwner, ComponentState, Outcome};
use kluster_runtime::{
    bootstrap::Bootstrapper, ClusterComponents, ClusterContext, Components, Finalizer, Provider, Result,
};
use kube::{Api, Client};
use parking_lot::Mutex;
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

const MARKER: &str = "kluster.dev/cleanup";

struct Harness {
    clouds: SimulatedClouds,
    client: Client,
    bootstrapper: Bootstrapper,
    bootstraps: Arc<Mutex<Vec<String>>>,
    engine: Components,
}

impl Harness {
    /// Harness and the apiserver behind its client
    fn new() -> (Self, ApiServerVerifier) {
        let (client, apiserver) = testcontext();
        let (bootstrapper, bootstraps) = probe(client.clone());
        let harness = Self {
            clouds: SimulatedClouds::new(),
            client,
            bootstrapper,
            bootstraps,
            engine: Components::new(Duration::from_secs(10)),
        };
        (harness, apiserver)
    }

    fn aks(&self) -> AksProvider {
        AksProvider::new(
            self.clouds.resource_groups.api(),
            self.clouds.managed_clusters.api(),
            self.bootstrapper.clone(),
        )
    }

    fn eks(&self) -> EksProvider {
        EksProvider::new(
            self.clouds.vpcs.api(),
            self.clouds.eks_clusters.api(),
            self.clouds.node_groups.api(),
            self.bootstrapper.clone(),
        )
    }

    /// One controller pass without the status write
    async fn pass(&self, provider: &dyn Provider, owner: &mut Cluster) -> Result<Outcome> {
        let ctx = ClusterContext::new(provider, owner, self.client.clone())?;
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), "default");
        let mut components = ClusterComponents::new();
        components.add_guard(Finalizer::new(api, &*owner, MARKER))?;
        provider.set_components(&ctx, &mut components).await?;
        provider.before_components_update(&ctx, &mut components).await?;
        let outcome = self.engine.reconcile(&mut components, owner).await?;
        if !owner.is_deleting() {
            provider.set_provider_data(&components, owner).await?;
        }
        Ok(outcome)
    }
}

/// `c1` already carrying our finalizer
fn guarded(provider: &str, deleting: bool) -> Cluster {
    let mut obj = cluster_json(provider, &[]);
    obj["metadata"]["finalizers"] = json!([MARKER]);
    if deleting {
        obj["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
    }
    serde_json::from_value(obj).unwrap()
}

fn statuses(owner: &Cluster) -> Vec<(String, ComponentState, Option<String>)> {
    owner
        .status
        .as_ref()
        .map(|s| {
            s.components
                .iter()
                .map(|c| (c.name.clone(), c.status, c.message.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn first_pass_creates_the_resource_group_only() {
    let (harness, _apiserver) = Harness::new();
    let mut owner = guarded("aks", false);

    let outcome = harness.pass(&harness.aks(), &mut owner).await.unwrap();

    assert_eq!(outcome, Outcome::requeue_after(Duration::from_secs(10)));
    assert!(harness.clouds.resource_groups.contains("rg-default-c1"));
    assert_eq!(statuses(&owner), vec![
        ("Finalizer".to_string(), ComponentState::Ok, None),
        ("ResourceGroup".to_string(), ComponentState::Pending, Some("creating".to_string())),
    ]);
    assert_eq!(harness.clouds.managed_clusters.calls(Op::Get), 0);
    assert!(harness.bootstraps.lock().is_empty());
}

#[tokio::test]
async fn ready_group_lets_the_cluster_be_created() {
    let (harness, _apiserver) = Harness::new();
    harness.clouds.resource_groups.seed("rg-default-c1", ResourceGroupSpec {
        location: "westeurope".into(),
        tags: BTreeMap::new(),
    });
    let mut owner = guarded("aks", false);

    let outcome = harness.pass(&harness.aks(), &mut owner).await.unwrap();

    assert!(!outcome.is_done());
    assert!(harness.clouds.managed_clusters.contains("aks-default-c1"));
    assert_eq!(harness.clouds.managed_clusters.calls(Op::CreateOrUpdate), 1);
    let names: Vec<String> = statuses(&owner).into_iter().map(|(name, ..)| name).collect();
    assert_eq!(names, vec!["Finalizer", "ResourceGroup", "ManagedCluster"]);
    assert!(harness.bootstraps.lock().is_empty());
    assert!(owner.provider_data("resourceGroupId").is_some());
}

#[tokio::test]
async fn deleting_with_nothing_left_releases_the_owner() {
    let (harness, mut apiserver) = Harness::new();
    let mut owner = guarded("aks", true);
    let aks = harness.aks();

    let released = cluster_json("aks", &[]);
    let (outcome, (method, uri, body)) =
        tokio::join!(harness.pass(&aks, &mut owner), apiserver.respond(released));

    assert_eq!(outcome.unwrap(), Outcome::done());
    assert_eq!(method, http::Method::PATCH);
    assert!(uri.starts_with("/apis/kluster.dev/v1alpha1/namespaces/default/clusters/c1?"));
    assert_eq!(body[1], json!({ "op": "remove", "path": "/metadata/finalizers/0" }));
    assert_eq!(harness.clouds.resource_groups.calls(Op::Delete), 0);
    assert_eq!(harness.clouds.managed_clusters.calls(Op::Delete), 0);
    let states: Vec<ComponentState> = statuses(&owner).into_iter().map(|(_, state, _)| state).collect();
    assert_eq!(states, vec![ComponentState::Deleted; 4]);
}

#[tokio::test]
async fn create_failure_stops_the_pass() {
    let (harness, _apiserver) = Harness::new();
    harness.clouds.resource_groups.fail_next(
        Op::CreateOrUpdate,
        CloudError::new(StatusCode::FORBIDDEN, "AuthorizationFailed", "no write access"),
    );
    let mut owner = guarded("aks", false);

    let err = harness.pass(&harness.aks(), &mut owner).await.unwrap_err();

    let message = "component ResourceGroup: cloud api: AuthorizationFailed (403 Forbidden): no write access";
    assert_eq!(err.to_string(), message);
    assert!(!err.is_terminal());
    assert_eq!(statuses(&owner), vec![
        ("Finalizer".to_string(), ComponentState::Ok, None),
        ("ResourceGroup".to_string(), ComponentState::Error, Some(message.to_string())),
    ]);
    assert_eq!(harness.clouds.managed_clusters.calls(Op::Get), 0);
}

#[tokio::test]
async fn eks_converges_through_provider_data() {
    let (harness, _apiserver) = Harness::new();
    let eks = harness.eks();
    let mut owner = guarded("eks", false);

    let mut passes = 0;
    loop {
        passes += 1;
        assert!(passes <= 15, "no convergence: {:?}", statuses(&owner));
        if harness.pass(&eks, &mut owner).await.unwrap().is_done() {
            break;
        }
    }

    assert_eq!(harness.clouds.vpcs.calls(Op::CreateOrUpdate), 1);
    assert_eq!(harness.clouds.eks_clusters.calls(Op::CreateOrUpdate), 1);
    assert_eq!(harness.clouds.node_groups.calls(Op::CreateOrUpdate), 1);
    let sent = harness.clouds.eks_clusters.spec("eks-default-c1").unwrap();
    assert_eq!(sent.subnet_ids.len(), 2);
    assert_eq!(owner.provider_data("accountId"), Some("123456789012"));

    let bootstraps = harness.bootstraps.lock().clone();
    assert_eq!(bootstraps.len(), 1);
    assert!(bootstraps[0].ends_with(" simulated-token-1"));
    assert!(statuses(&owner).iter().all(|(_, state, _)| *state == ComponentState::Ok));
}
