//! GKE: project, cluster, bootstrap
use crate::{
    cloud::{CloudApi, CloudError, CloudResource, Convergence},
    memory::{simulated_access, Simulate},
    owner_tags,
    resource::{lazy_bootstrap, ResourceComponent},
};
use async_trait::async_trait;
use http::StatusCode;
use kluster_core::{
    naming::{resource_name, resource_name_within},
    Cluster, Plan, PlanPolicy,
};
use kluster_runtime::{
    bootstrap::Bootstrapper, ClusterAccess, ClusterBootstrap, ClusterComponents, ClusterContext, Error,
    Provider, Result,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Longest project ID GCP accepts
pub const MAX_PROJECT_ID_LEN: usize = 30;

fn is_not_found(err: &CloudError) -> bool {
    err.status == StatusCode::NOT_FOUND || err.code == "NOT_FOUND"
}

/// A GCP project dedicated to one cluster
pub struct Project;

/// Desired project
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectSpec {
    /// Billing account to link, `XXXXXX-XXXXXX-XXXXXX`
    pub billing_account: Option<String>,
    /// Resource labels
    pub labels: BTreeMap<String, String>,
}

/// Observed project
#[derive(Clone, Debug)]
pub struct ProjectStatus {
    /// Project ID
    pub project_id: String,
    /// Numeric project number
    pub project_number: String,
    /// `ACTIVE`, `DELETE_REQUESTED`, ...
    pub lifecycle_state: String,
}

impl CloudResource for Project {
    const KIND: &'static str = "Project";
    type Spec = ProjectSpec;
    type Status = ProjectStatus;

    fn state(status: &ProjectStatus) -> &str {
        &status.lifecycle_state
    }

    fn classify(status: &ProjectStatus) -> Convergence {
        match status.lifecycle_state.as_str() {
            "ACTIVE" => Convergence::Succeeded,
            "DELETE_REQUESTED" | "DELETE_IN_PROGRESS" => Convergence::Deleting,
            _ => Convergence::InProgress,
        }
    }

    fn is_not_found(err: &CloudError) -> bool {
        is_not_found(err)
    }
}

/// A GKE cluster
pub struct GkeCluster;

/// Desired GKE cluster
#[derive(Clone, Debug, PartialEq)]
pub struct GkeClusterSpec {
    /// Project hosting the cluster
    pub project_id: String,
    /// Zone or region
    pub location: String,
    /// `RAPID`, `REGULAR` or `STABLE`
    pub release_channel: String,
    /// Nodes in the default pool, per zone
    pub node_count: u32,
    /// Machine type of the default pool
    pub machine_type: String,
    /// Resource labels
    pub labels: BTreeMap<String, String>,
}

/// Observed GKE cluster
#[derive(Clone, Debug)]
pub struct GkeClusterStatus {
    /// Resource URL
    pub self_link: String,
    /// `PROVISIONING`, `RUNNING`, `RECONCILING`, `STOPPING`, `ERROR` or `DEGRADED`
    pub status: String,
    /// API server address
    pub endpoint: Option<String>,
    /// Credentials, once running
    pub access: Option<ClusterAccess>,
}

impl CloudResource for GkeCluster {
    const KIND: &'static str = "GkeCluster";
    type Spec = GkeClusterSpec;
    type Status = GkeClusterStatus;

    fn state(status: &GkeClusterStatus) -> &str {
        &status.status
    }

    fn classify(status: &GkeClusterStatus) -> Convergence {
        match status.status.as_str() {
            "RUNNING" => Convergence::Succeeded,
            "STOPPING" => Convergence::Deleting,
            "ERROR" => Convergence::Failed("cluster status ERROR".into()),
            _ => Convergence::InProgress,
        }
    }

    fn is_not_found(err: &CloudError) -> bool {
        is_not_found(err)
    }
}

/// Plan parameters understood by [`GkeProvider`]
#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GkeParameters {
    /// Zone or region, e.g. `europe-west1-b`
    pub location: String,
    /// `RAPID`, `REGULAR` or `STABLE`
    pub release_channel: String,
    /// Nodes in the default pool, per zone
    #[schemars(range(min = 1))]
    pub node_count: u32,
    /// Machine type of the default pool
    pub machine_type: String,
    /// Billing account linked to the project
    pub billing_account: Option<String>,
}

/// Provider for Google Kubernetes Engine
///
/// Every cluster lives in its own project, named after the `Cluster`.
pub struct GkeProvider {
    projects: Arc<dyn CloudApi<Project>>,
    clusters: Arc<dyn CloudApi<GkeCluster>>,
    bootstrapper: Bootstrapper,
}

impl GkeProvider {
    /// Provider using the given cloud handles, bootstrapping through `bootstrapper`
    pub fn new(
        projects: Arc<dyn CloudApi<Project>>,
        clusters: Arc<dyn CloudApi<GkeCluster>>,
        bootstrapper: Bootstrapper,
    ) -> Self {
        Self {
            projects,
            clusters,
            bootstrapper,
        }
    }
}

/// Project ID for `cluster`, within GCP's length limit
pub fn project_id(cluster: &Cluster) -> Result<String> {
    Ok(resource_name_within("kl", cluster, MAX_PROJECT_ID_LEN)?)
}

fn valid_billing_account(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split('-').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| p.len() == 6 && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[async_trait]
impl Provider for GkeProvider {
    fn type_name(&self) -> &'static str {
        "gke"
    }

    fn plan_json_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(GkeParameters)).unwrap_or_default()
    }

    fn default_plans(&self) -> Vec<Plan> {
        vec![
            Plan::new("zonal", "single zone, one node")
                .param("location", "europe-west1-b")
                .param("releaseChannel", "REGULAR")
                .param("nodeCount", "1")
                .param("machineType", "e2-standard-2"),
            Plan::new("regional", "three zones, one node per zone")
                .param("location", "europe-west1")
                .param("releaseChannel", "STABLE")
                .param("nodeCount", "1")
                .param("machineType", "e2-standard-4"),
        ]
    }

    fn default_plan_policy(&self) -> PlanPolicy {
        PlanPolicy::new("zonal")
            .editable("location")
            .editable("releaseChannel")
            .editable("nodeCount")
            .editable("billingAccount")
    }

    async fn validate(&self, ctx: &ClusterContext) -> Result<()> {
        let params = &ctx.parameters;
        if params.parse::<u32>("nodeCount")?.unwrap_or(1) == 0 {
            return Err(Error::Validation("nodeCount must be at least 1".into()));
        }
        let channel = params.get_or("releaseChannel", "REGULAR");
        if !matches!(channel, "RAPID" | "REGULAR" | "STABLE") {
            return Err(Error::Validation(format!("unknown release channel {channel:?}")));
        }
        if let Some(account) = params.get("billingAccount") {
            if !valid_billing_account(account) {
                return Err(Error::Validation(format!(
                    "billingAccount {account:?} is not of the form XXXXXX-XXXXXX-XXXXXX"
                )));
            }
        }
        Ok(())
    }

    async fn set_components(&self, ctx: &ClusterContext, components: &mut ClusterComponents) -> Result<()> {
        let params = &ctx.parameters;
        let labels = gcp_labels(&ctx.cluster);
        let project_id = project_id(&ctx.cluster)?;

        let project = components.add(
            ResourceComponent::<Project>::new("Project", &project_id, self.projects.clone(), ProjectSpec {
                billing_account: params.get("billingAccount").map(String::from),
                labels: labels.clone(),
            }),
            &[],
        )?;

        let cluster = components.add_provider(
            ResourceComponent::<GkeCluster>::new(
                "GkeCluster",
                resource_name("gke", &ctx.cluster)?,
                self.clusters.clone(),
                GkeClusterSpec {
                    project_id,
                    location: params.require("location")?.to_string(),
                    release_channel: params.get_or("releaseChannel", "REGULAR").to_string(),
                    node_count: params.parse("nodeCount")?.unwrap_or(1),
                    machine_type: params.get_or("machineType", "e2-standard-2").to_string(),
                    labels,
                },
            )
            .requeue(crate::DEFAULT_REQUEUE * 3, crate::DEFAULT_REQUEUE * 3),
            &[project],
        )?;

        components.add(ClusterBootstrap::new(ctx.client.clone()), &[cluster])?;
        Ok(())
    }

    async fn before_components_update(
        &self,
        ctx: &ClusterContext,
        components: &mut ClusterComponents,
    ) -> Result<()> {
        let name = components
            .require_provider_mut::<ResourceComponent<GkeCluster>>()?
            .external_name()
            .to_string();
        for bootstrap in components.iter_of_mut::<ClusterBootstrap>() {
            bootstrap.set_factory(lazy_bootstrap(
                self.clusters.clone(),
                name.clone(),
                |status: &GkeClusterStatus| status.access.clone(),
                self.bootstrapper.clone(),
                ctx.cluster.clone(),
            ));
        }
        Ok(())
    }

    async fn set_provider_data(&self, components: &ClusterComponents, cluster: &mut Cluster) -> Result<()> {
        let data = &mut cluster.status_mut().provider_data;
        if let Some(project) = components.iter_of::<ResourceComponent<Project>>().find_map(|c| c.observed()) {
            data.insert("projectId".into(), project.project_id.clone());
            data.insert("projectNumber".into(), project.project_number.clone());
        }
        if let Some(endpoint) = components
            .provider::<ResourceComponent<GkeCluster>>()
            .and_then(|c| c.observed())
            .and_then(|s| s.endpoint.clone())
        {
            data.insert("endpoint".into(), endpoint);
        }
        Ok(())
    }
}

/// GCP label keys may not contain `.` or `/`
fn gcp_labels(cluster: &Cluster) -> BTreeMap<String, String> {
    owner_tags(cluster)
        .into_iter()
        .map(|(k, v)| (k.replace(['.', '/'], "_"), v.replace('/', "_")))
        .collect()
}

impl Simulate for Project {
    const DELETING: &'static str = "DELETE_REQUESTED";
    const PROGRESS: &'static [&'static str] = &["LIFECYCLE_STATE_UNSPECIFIED", "ACTIVE"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Project {name} not found."))
    }

    fn render(name: &str, _spec: &ProjectSpec, state: &str, serial: u64) -> ProjectStatus {
        ProjectStatus {
            project_id: name.to_string(),
            project_number: (100_000_000_000 + serial).to_string(),
            lifecycle_state: state.to_string(),
        }
    }
}

impl Simulate for GkeCluster {
    const DELETING: &'static str = "STOPPING";
    const PROGRESS: &'static [&'static str] = &["PROVISIONING", "PROVISIONING", "RUNNING"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Not found: cluster {name}."))
    }

    fn render(name: &str, spec: &GkeClusterSpec, state: &str, serial: u64) -> GkeClusterStatus {
        let endpoint = format!("https://34.{}.{}.{}", serial / 65536 % 256, serial / 256 % 256, serial % 256);
        GkeClusterStatus {
            self_link: format!(
                "https://container.googleapis.com/v1/projects/{}/locations/{}/clusters/{name}",
                spec.project_id, spec.location
            ),
            status: state.to_string(),
            access: (state == "RUNNING").then(|| simulated_access(&endpoint, serial)),
            endpoint: Some(endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryCloud,
        mock_tests::{cluster, provider_context},
    };
    use kluster_runtime::{bootstrap::manifests, Component};

    fn provider(projects: &MemoryCloud<Project>, clusters: &MemoryCloud<GkeCluster>) -> GkeProvider {
        GkeProvider::new(projects.api(), clusters.api(), manifests("kluster"))
    }

    #[tokio::test]
    async fn project_then_cluster_then_bootstrap() {
        let (projects, clusters) = (MemoryCloud::new(), MemoryCloud::new());
        let provider = provider(&projects, &clusters);
        let ctx = provider_context(&provider, cluster("gke", &[("billingAccount", "0A1B2C-3D4E5F-6A7B8C")]));
        provider.validate(&ctx).await.unwrap();
        let mut components = ClusterComponents::new();
        provider.set_components(&ctx, &mut components).await.unwrap();

        assert_eq!(components.names(), vec!["Project", "GkeCluster", "Bootstrap"]);
        let gke = components.provider::<ResourceComponent<GkeCluster>>().unwrap();
        assert_eq!(gke.spec().project_id, "kl-default-c1");
        assert_eq!(gke.spec().labels.get("kluster_dev_cluster").map(String::as_str), Some("default_c1"));
        let project = components.iter_of::<ResourceComponent<Project>>().next().unwrap();
        assert_eq!(project.spec().billing_account.as_deref(), Some("0A1B2C-3D4E5F-6A7B8C"));
    }

    #[tokio::test]
    async fn rejects_malformed_settings() {
        let (projects, clusters) = (MemoryCloud::new(), MemoryCloud::new());
        let provider = provider(&projects, &clusters);
        for config in [
            [("billingAccount", "12345")],
            [("releaseChannel", "NIGHTLY")],
            [("nodeCount", "0")],
        ] {
            let ctx = provider_context(&provider, cluster("gke", &config));
            assert!(provider.validate(&ctx).await.unwrap_err().is_validation(), "{config:?}");
        }
    }

    #[test]
    fn project_ids_fit_gcp_limits() {
        let mut long = cluster("gke", &[]);
        long.metadata.name = Some("a-very-long-cluster-name-for-a-project".into());
        let id = project_id(&long).unwrap();
        assert!(id.len() <= MAX_PROJECT_ID_LEN);
        assert!(!id.ends_with('-'));
        assert!(id.starts_with("kl-default-"));

        let mut sibling = long.clone();
        sibling.metadata.name = Some("a-very-long-cluster-name-for-a-product".into());
        assert_ne!(project_id(&sibling).unwrap(), id);
    }

    #[tokio::test]
    async fn provider_data_records_project() {
        let (projects, clusters) = (MemoryCloud::new(), MemoryCloud::new());
        let provider = provider(&projects, &clusters);
        let ctx = provider_context(&provider, cluster("gke", &[]));
        let mut components = ClusterComponents::new();
        provider.set_components(&ctx, &mut components).await.unwrap();
        projects.seed("kl-default-c1", ProjectSpec {
            billing_account: None,
            labels: BTreeMap::new(),
        });
        components.find_mut::<ResourceComponent<Project>>("Project").unwrap().reconcile().await.unwrap();

        let mut owner = cluster("gke", &[]);
        provider.set_provider_data(&components, &mut owner).await.unwrap();
        assert_eq!(owner.provider_data("projectId"), Some("kl-default-c1"));
        assert_eq!(owner.provider_data("projectNumber"), Some("100000000001"));
        assert_eq!(owner.provider_data("endpoint"), None);
    }
}
