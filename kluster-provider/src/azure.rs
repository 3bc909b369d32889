//! AKS: resource group, managed cluster, bootstrap
use crate::{
    cloud::{CloudApi, CloudError, CloudResource, Convergence},
    memory::{simulated_access, Simulate},
    owner_tags,
    resource::{lazy_bootstrap, ResourceComponent},
};
use async_trait::async_trait;
use http::StatusCode;
use kluster_core::{naming::resource_name, Cluster, Plan, PlanPolicy};
use kluster_runtime::{
    bootstrap::Bootstrapper, ClusterAccess, ClusterBootstrap, ClusterComponents, ClusterContext, Error,
    Provider, Result,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Azure reports missing resources (and missing parent groups) with these codes
fn is_not_found(err: &CloudError) -> bool {
    err.status == StatusCode::NOT_FOUND
        || matches!(err.code.as_str(), "ResourceNotFound" | "ResourceGroupNotFound")
}

fn classify_provisioning(state: &str) -> Convergence {
    match state {
        "Succeeded" => Convergence::Succeeded,
        "Deleting" => Convergence::Deleting,
        "Failed" | "Canceled" => Convergence::Failed(format!("provisioningState {state}")),
        _ => Convergence::InProgress,
    }
}

/// An Azure resource group
pub struct ResourceGroup;

/// Desired resource group
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceGroupSpec {
    /// Azure region
    pub location: String,
    /// Resource tags
    pub tags: BTreeMap<String, String>,
}

/// Observed resource group
#[derive(Clone, Debug)]
pub struct ResourceGroupStatus {
    /// ARM resource id
    pub id: String,
    /// ARM provisioning state
    pub provisioning_state: String,
}

impl CloudResource for ResourceGroup {
    const KIND: &'static str = "ResourceGroup";
    type Spec = ResourceGroupSpec;
    type Status = ResourceGroupStatus;

    fn state(status: &ResourceGroupStatus) -> &str {
        &status.provisioning_state
    }

    fn classify(status: &ResourceGroupStatus) -> Convergence {
        classify_provisioning(&status.provisioning_state)
    }

    fn is_not_found(err: &CloudError) -> bool {
        is_not_found(err)
    }
}

/// An AKS managed cluster
pub struct ManagedCluster;

/// Desired managed cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedClusterSpec {
    /// Azure region
    pub location: String,
    /// Resource group holding the cluster
    pub resource_group: String,
    /// Kubernetes version
    pub kubernetes_version: String,
    /// Nodes in the system pool
    pub node_count: u32,
    /// VM size of the system pool
    pub vm_size: String,
    /// DNS prefix of the API server
    pub dns_prefix: String,
    /// Resource tags
    pub tags: BTreeMap<String, String>,
}

/// Observed managed cluster
#[derive(Clone, Debug)]
pub struct ManagedClusterStatus {
    /// ARM resource id
    pub id: String,
    /// ARM provisioning state
    pub provisioning_state: String,
    /// API server FQDN, once assigned
    pub fqdn: Option<String>,
    /// Admin credentials, once the cluster is up
    pub access: Option<ClusterAccess>,
}

impl CloudResource for ManagedCluster {
    const KIND: &'static str = "ManagedCluster";
    type Spec = ManagedClusterSpec;
    type Status = ManagedClusterStatus;

    fn state(status: &ManagedClusterStatus) -> &str {
        &status.provisioning_state
    }

    fn classify(status: &ManagedClusterStatus) -> Convergence {
        classify_provisioning(&status.provisioning_state)
    }

    fn is_not_found(err: &CloudError) -> bool {
        is_not_found(err)
    }
}

/// Plan parameters understood by [`AksProvider`]
#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AksParameters {
    /// Azure region, e.g. `westeurope`
    pub location: String,
    /// Kubernetes version
    pub kubernetes_version: String,
    /// Nodes in the system pool
    #[schemars(range(min = 1, max = 100))]
    pub node_count: u32,
    /// VM size of the system pool
    pub vm_size: String,
}

/// Provider for Azure Kubernetes Service
pub struct AksProvider {
    resource_groups: Arc<dyn CloudApi<ResourceGroup>>,
    clusters: Arc<dyn CloudApi<ManagedCluster>>,
    bootstrapper: Bootstrapper,
}

impl AksProvider {
    /// Provider using the given cloud handles, bootstrapping through `bootstrapper`
    pub fn new(
        resource_groups: Arc<dyn CloudApi<ResourceGroup>>,
        clusters: Arc<dyn CloudApi<ManagedCluster>>,
        bootstrapper: Bootstrapper,
    ) -> Self {
        Self {
            resource_groups,
            clusters,
            bootstrapper,
        }
    }
}

#[async_trait]
impl Provider for AksProvider {
    fn type_name(&self) -> &'static str {
        "aks"
    }

    fn plan_json_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(AksParameters)).unwrap_or_default()
    }

    fn default_plans(&self) -> Vec<Plan> {
        vec![
            Plan::new("dev", "single node, burstable VM")
                .param("location", "westeurope")
                .param("kubernetesVersion", "1.30")
                .param("nodeCount", "1")
                .param("vmSize", "Standard_B2s"),
            Plan::new("prod", "three nodes, general purpose VMs")
                .param("location", "westeurope")
                .param("kubernetesVersion", "1.30")
                .param("nodeCount", "3")
                .param("vmSize", "Standard_D4s_v5"),
        ]
    }

    fn default_plan_policy(&self) -> PlanPolicy {
        PlanPolicy::new("dev")
            .editable("location")
            .editable("kubernetesVersion")
            .editable("nodeCount")
    }

    async fn validate(&self, ctx: &ClusterContext) -> Result<()> {
        let node_count: u32 = ctx.parameters.parse("nodeCount")?.unwrap_or(1);
        if !(1..=100).contains(&node_count) {
            return Err(Error::Validation(format!("nodeCount must be within 1..=100, got {node_count}")));
        }
        if ctx.parameters.require("location")?.is_empty() {
            return Err(Error::Validation("location must not be empty".into()));
        }
        Ok(())
    }

    async fn set_components(&self, ctx: &ClusterContext, components: &mut ClusterComponents) -> Result<()> {
        let params = &ctx.parameters;
        let location = params.require("location")?.to_string();
        let tags = owner_tags(&ctx.cluster);

        let group_name = resource_name("rg", &ctx.cluster)?;
        let group = components.add(
            ResourceComponent::<ResourceGroup>::new(
                "ResourceGroup",
                &group_name,
                self.resource_groups.clone(),
                ResourceGroupSpec {
                    location: location.clone(),
                    tags: tags.clone(),
                },
            ),
            &[],
        )?;

        let cluster_name = resource_name("aks", &ctx.cluster)?;
        let cluster = components.add_provider(
            ResourceComponent::<ManagedCluster>::new(
                "ManagedCluster",
                &cluster_name,
                self.clusters.clone(),
                ManagedClusterSpec {
                    location,
                    resource_group: group_name,
                    kubernetes_version: params.get_or("kubernetesVersion", "1.30").to_string(),
                    node_count: params.parse("nodeCount")?.unwrap_or(1),
                    vm_size: params.get_or("vmSize", "Standard_B2s").to_string(),
                    dns_prefix: cluster_name.clone(),
                    tags,
                },
            ),
            &[group],
        )?;

        components.add(ClusterBootstrap::new(ctx.client.clone()), &[cluster])?;
        Ok(())
    }

    async fn before_components_update(
        &self,
        ctx: &ClusterContext,
        components: &mut ClusterComponents,
    ) -> Result<()> {
        let cluster_name = components
            .require_provider_mut::<ResourceComponent<ManagedCluster>>()?
            .external_name()
            .to_string();
        for bootstrap in components.iter_of_mut::<ClusterBootstrap>() {
            bootstrap.set_factory(lazy_bootstrap(
                self.clusters.clone(),
                cluster_name.clone(),
                |status: &ManagedClusterStatus| status.access.clone(),
                self.bootstrapper.clone(),
                ctx.cluster.clone(),
            ));
        }
        Ok(())
    }

    async fn set_provider_data(&self, components: &ClusterComponents, cluster: &mut Cluster) -> Result<()> {
        let data = &mut cluster.status_mut().provider_data;
        let group = components
            .iter_of::<ResourceComponent<ResourceGroup>>()
            .find_map(|c| c.observed());
        if let Some(group) = group {
            data.insert("resourceGroupId".into(), group.id.clone());
        }
        let managed = components
            .provider::<ResourceComponent<ManagedCluster>>()
            .and_then(|c| c.observed());
        if let Some(managed) = managed {
            data.insert("clusterId".into(), managed.id.clone());
            if let Some(fqdn) = &managed.fqdn {
                data.insert("fqdn".into(), fqdn.clone());
            }
        }
        Ok(())
    }
}

fn arm_id(group: &str, provider: &str, name: &str) -> String {
    format!("/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/{group}{provider}/{name}")
}

impl Simulate for ResourceGroup {
    const DELETING: &'static str = "Deleting";
    const PROGRESS: &'static [&'static str] = &["Creating", "Succeeded"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(
            StatusCode::NOT_FOUND,
            "ResourceGroupNotFound",
            format!("Resource group '{name}' could not be found."),
        )
    }

    fn render(name: &str, _spec: &ResourceGroupSpec, state: &str, _serial: u64) -> ResourceGroupStatus {
        ResourceGroupStatus {
            id: arm_id(name, "", ""),
            provisioning_state: state.to_string(),
        }
    }
}

impl Simulate for ManagedCluster {
    const DELETING: &'static str = "Deleting";
    const PROGRESS: &'static [&'static str] = &["Creating", "Creating", "Succeeded"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(
            StatusCode::NOT_FOUND,
            "ResourceNotFound",
            format!("The Resource 'Microsoft.ContainerService/managedClusters/{name}' was not found."),
        )
    }

    fn render(name: &str, spec: &ManagedClusterSpec, state: &str, serial: u64) -> ManagedClusterStatus {
        let fqdn = format!("{}.hcp.{}.azmk8s.io", spec.dns_prefix, spec.location);
        let ready = state == "Succeeded";
        ManagedClusterStatus {
            id: arm_id(&spec.resource_group, "/providers/Microsoft.ContainerService/managedClusters", name),
            provisioning_state: state.to_string(),
            access: ready.then(|| simulated_access(&format!("https://{fqdn}:443"), serial)),
            fqdn: Some(fqdn),
        }
    }
}
