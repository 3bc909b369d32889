//! EKS: VPC, cluster, managed node groups, bootstrap
//!
//! The VPC is created first; its subnet and security group IDs land in
//! `status.providerData` at the end of the pass that saw it available, and are fed to
//! the cluster and node group specs on the next pass. Until then those two wait.
use crate::{
    cloud::{CloudApi, CloudError, CloudResource, Convergence},
    memory::{simulated_access, Simulate},
    owner_tags,
    resource::{lazy_bootstrap, ResourceComponent},
};
use async_trait::async_trait;
use http::StatusCode;
use kluster_core::{
    naming::{child_name, resource_name},
    Cluster, Plan, PlanPolicy,
};
use kluster_runtime::{
    bootstrap::Bootstrapper, ClusterAccess, ClusterBootstrap, ClusterComponents, ClusterContext, Error,
    Provider, Result,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

const ACCOUNT_ID: &str = "123456789012";

/// A VPC with one subnet per availability zone and a cluster security group
pub struct Vpc;

/// Desired VPC
#[derive(Clone, Debug, PartialEq)]
pub struct VpcSpec {
    /// AWS region
    pub region: String,
    /// IPv4 CIDR of the VPC
    pub cidr_block: String,
    /// Zones to create subnets in
    pub availability_zones: Vec<String>,
    /// Resource tags
    pub tags: BTreeMap<String, String>,
}

/// Observed VPC
#[derive(Clone, Debug)]
pub struct VpcStatus {
    /// `vpc-...`
    pub vpc_id: String,
    /// `pending` or `available`
    pub state: String,
    /// Subnets, once the VPC is available
    pub subnet_ids: Vec<String>,
    /// Cluster security group, once the VPC is available
    pub security_group_id: Option<String>,
}

impl CloudResource for Vpc {
    const KIND: &'static str = "Vpc";
    type Spec = VpcSpec;
    type Status = VpcStatus;

    fn state(status: &VpcStatus) -> &str {
        &status.state
    }

    fn classify(status: &VpcStatus) -> Convergence {
        match status.state.as_str() {
            "available" => Convergence::Succeeded,
            "deleting" => Convergence::Deleting,
            _ => Convergence::InProgress,
        }
    }

    /// EC2 answers lookups of unknown IDs with `400 InvalidVpcID.NotFound`
    fn is_not_found(err: &CloudError) -> bool {
        err.status == StatusCode::NOT_FOUND || err.code.ends_with(".NotFound")
    }
}

fn eks_not_found(err: &CloudError) -> bool {
    err.status == StatusCode::NOT_FOUND || err.code == "ResourceNotFoundException"
}

/// An EKS control plane
pub struct EksCluster;

/// Desired EKS control plane
#[derive(Clone, Debug, PartialEq)]
pub struct EksClusterSpec {
    /// AWS region
    pub region: String,
    /// Kubernetes version
    pub version: String,
    /// Subnets of the control plane ENIs
    pub subnet_ids: Vec<String>,
    /// Additional security groups
    pub security_group_ids: Vec<String>,
    /// Resource tags
    pub tags: BTreeMap<String, String>,
}

/// Observed EKS control plane
#[derive(Clone, Debug)]
pub struct EksClusterStatus {
    /// Cluster ARN
    pub arn: String,
    /// `CREATING`, `ACTIVE`, `UPDATING`, `DELETING` or `FAILED`
    pub status: String,
    /// API server URL, once assigned
    pub endpoint: Option<String>,
    /// Credentials, once the cluster is active
    pub access: Option<ClusterAccess>,
}

impl CloudResource for EksCluster {
    const KIND: &'static str = "EksCluster";
    type Spec = EksClusterSpec;
    type Status = EksClusterStatus;

    fn state(status: &EksClusterStatus) -> &str {
        &status.status
    }

    fn classify(status: &EksClusterStatus) -> Convergence {
        match status.status.as_str() {
            "ACTIVE" => Convergence::Succeeded,
            "DELETING" => Convergence::Deleting,
            "FAILED" => Convergence::Failed("cluster status FAILED".into()),
            _ => Convergence::InProgress,
        }
    }

    fn is_not_found(err: &CloudError) -> bool {
        eks_not_found(err)
    }

    fn precondition(spec: &EksClusterSpec) -> Option<String> {
        spec.subnet_ids.is_empty().then(|| "no subnets known yet".to_string())
    }
}

/// A managed node group
pub struct NodeGroup;

/// Desired node group
#[derive(Clone, Debug, PartialEq)]
pub struct NodeGroupSpec {
    /// AWS region
    pub region: String,
    /// EKS cluster the group joins
    pub cluster_name: String,
    /// EC2 instance type
    pub instance_type: String,
    /// Lower scaling bound
    pub min_size: u32,
    /// Upper scaling bound
    pub max_size: u32,
    /// Initial size
    pub desired_size: u32,
    /// Subnets the nodes are placed in
    pub subnet_ids: Vec<String>,
    /// Resource tags
    pub tags: BTreeMap<String, String>,
}

/// Observed node group
#[derive(Clone, Debug)]
pub struct NodeGroupStatus {
    /// Node group ARN
    pub arn: String,
    /// `CREATING`, `ACTIVE`, `DEGRADED`, `DELETING`, `CREATE_FAILED`, ...
    pub status: String,
}

impl CloudResource for NodeGroup {
    const KIND: &'static str = "NodeGroup";
    type Spec = NodeGroupSpec;
    type Status = NodeGroupStatus;

    fn state(status: &NodeGroupStatus) -> &str {
        &status.status
    }

    fn classify(status: &NodeGroupStatus) -> Convergence {
        match status.status.as_str() {
            "ACTIVE" => Convergence::Succeeded,
            "DELETING" => Convergence::Deleting,
            "CREATE_FAILED" | "DELETE_FAILED" => {
                Convergence::Failed(format!("node group status {}", status.status))
            }
            _ => Convergence::InProgress,
        }
    }

    fn is_not_found(err: &CloudError) -> bool {
        eks_not_found(err)
    }

    fn precondition(spec: &NodeGroupSpec) -> Option<String> {
        spec.subnet_ids.is_empty().then(|| "no subnets known yet".to_string())
    }
}

/// One entry of the `nodeGroups` parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupParameters {
    /// Unique within the cluster
    pub name: String,
    /// EC2 instance type
    pub instance_type: String,
    /// Lower scaling bound
    pub min_size: u32,
    /// Upper scaling bound
    pub max_size: u32,
    /// Initial size, within the bounds
    pub desired_size: u32,
}

/// Plan parameters understood by [`EksProvider`]
///
/// `availabilityZones` is comma separated and `nodeGroups` is a JSON array.
#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EksParameters {
    /// AWS region, e.g. `eu-west-1`
    pub region: String,
    /// Kubernetes version
    pub kubernetes_version: String,
    /// IPv4 CIDR of the cluster VPC
    pub vpc_cidr: String,
    /// Zones to spread subnets over
    pub availability_zones: String,
    /// Managed node groups
    pub node_groups: Vec<NodeGroupParameters>,
}

/// Provider for Amazon Elastic Kubernetes Service
pub struct EksProvider {
    vpcs: Arc<dyn CloudApi<Vpc>>,
    clusters: Arc<dyn CloudApi<EksCluster>>,
    node_groups: Arc<dyn CloudApi<NodeGroup>>,
    bootstrapper: Bootstrapper,
}

impl EksProvider {
    /// Provider using the given cloud handles, bootstrapping through `bootstrapper`
    pub fn new(
        vpcs: Arc<dyn CloudApi<Vpc>>,
        clusters: Arc<dyn CloudApi<EksCluster>>,
        node_groups: Arc<dyn CloudApi<NodeGroup>>,
        bootstrapper: Bootstrapper,
    ) -> Self {
        Self {
            vpcs,
            clusters,
            node_groups,
            bootstrapper,
        }
    }
}

fn node_groups(ctx: &ClusterContext) -> Result<Vec<NodeGroupParameters>> {
    Ok(ctx.parameters.json("nodeGroups")?.unwrap_or_default())
}

#[async_trait]
impl Provider for EksProvider {
    fn type_name(&self) -> &'static str {
        "eks"
    }

    fn plan_json_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(EksParameters)).unwrap_or_default()
    }

    fn default_plans(&self) -> Vec<Plan> {
        vec![
            Plan::new("standard", "two zones, one general purpose node group")
                .param("region", "us-east-1")
                .param("kubernetesVersion", "1.30")
                .param("vpcCidr", "10.0.0.0/16")
                .param("availabilityZones", "us-east-1a,us-east-1b")
                .param(
                    "nodeGroups",
                    concat!(
                        r#"[{"name":"default","instanceType":"t3.medium","#,
                        r#""minSize":1,"maxSize":3,"desiredSize":2}]"#,
                    ),
                ),
            Plan::new("ha", "three zones, system and workload node groups")
                .param("region", "us-east-1")
                .param("kubernetesVersion", "1.30")
                .param("vpcCidr", "10.0.0.0/16")
                .param("availabilityZones", "us-east-1a,us-east-1b,us-east-1c")
                .param(
                    "nodeGroups",
                    concat!(
                        r#"[{"name":"system","instanceType":"m6i.large","#,
                        r#""minSize":3,"maxSize":3,"desiredSize":3},"#,
                        r#"{"name":"workload","instanceType":"m6i.xlarge","#,
                        r#""minSize":3,"maxSize":12,"desiredSize":3}]"#,
                    ),
                ),
        ]
    }

    fn default_plan_policy(&self) -> PlanPolicy {
        PlanPolicy::new("standard")
            .editable("region")
            .editable("kubernetesVersion")
            .editable("availabilityZones")
            .editable("nodeGroups")
    }

    async fn validate(&self, ctx: &ClusterContext) -> Result<()> {
        if ctx.parameters.list("availabilityZones").is_empty() {
            return Err(Error::Validation("at least one availability zone is required".into()));
        }
        let cluster_name = resource_name("eks", &ctx.cluster)?;
        let mut seen = HashSet::new();
        for group in node_groups(ctx)? {
            if group.name.trim().is_empty() {
                return Err(Error::Validation("node group names must not be empty".into()));
            }
            // compare what reaches the cloud
            if !seen.insert(child_name(&cluster_name, &group.name)) {
                return Err(Error::Validation(format!("duplicate node group {:?}", group.name)));
            }
            if !(group.min_size <= group.desired_size && group.desired_size <= group.max_size) {
                return Err(Error::Validation(format!(
                    "node group {:?}: expected minSize <= desiredSize <= maxSize, got {} / {} / {}",
                    group.name, group.min_size, group.desired_size, group.max_size
                )));
            }
        }
        Ok(())
    }

    async fn set_components(&self, ctx: &ClusterContext, components: &mut ClusterComponents) -> Result<()> {
        let params = &ctx.parameters;
        let region = params.require("region")?.to_string();
        let tags = owner_tags(&ctx.cluster);

        let vpc = components.add(
            ResourceComponent::<Vpc>::new(
                "Vpc",
                resource_name("vpc", &ctx.cluster)?,
                self.vpcs.clone(),
                VpcSpec {
                    region: region.clone(),
                    cidr_block: params.get_or("vpcCidr", "10.0.0.0/16").to_string(),
                    availability_zones: params.list("availabilityZones"),
                    tags: tags.clone(),
                },
            ),
            &[],
        )?;

        let cluster_name = resource_name("eks", &ctx.cluster)?;
        let cluster = components.add_provider(
            ResourceComponent::<EksCluster>::new(
                "EksCluster",
                &cluster_name,
                self.clusters.clone(),
                EksClusterSpec {
                    region: region.clone(),
                    version: params.get_or("kubernetesVersion", "1.30").to_string(),
                    subnet_ids: Vec::new(),
                    security_group_ids: Vec::new(),
                    tags: tags.clone(),
                },
            ),
            &[vpc],
        )?;

        let mut ready_when = vec![cluster];
        for group in node_groups(ctx)? {
            let id = components.add(
                ResourceComponent::<NodeGroup>::new(
                    format!("NodeGroup/{}", group.name),
                    child_name(&cluster_name, &group.name),
                    self.node_groups.clone(),
                    NodeGroupSpec {
                        region: region.clone(),
                        cluster_name: cluster_name.clone(),
                        instance_type: group.instance_type,
                        min_size: group.min_size,
                        max_size: group.max_size,
                        desired_size: group.desired_size,
                        subnet_ids: Vec::new(),
                        tags: tags.clone(),
                    },
                ),
                &[cluster],
            )?;
            ready_when.push(id);
        }

        components.add(ClusterBootstrap::new(ctx.client.clone()), &ready_when)?;
        Ok(())
    }

    async fn before_components_update(
        &self,
        ctx: &ClusterContext,
        components: &mut ClusterComponents,
    ) -> Result<()> {
        let subnets: Vec<String> = ctx
            .cluster
            .provider_data("subnetIds")
            .map(|raw| raw.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        let security_groups: Vec<String> = ctx
            .cluster
            .provider_data("securityGroupId")
            .map(String::from)
            .into_iter()
            .collect();

        let eks = components.require_provider_mut::<ResourceComponent<EksCluster>>()?;
        eks.spec_mut().subnet_ids = subnets.clone();
        eks.spec_mut().security_group_ids = security_groups;
        let cluster_name = eks.external_name().to_string();

        for group in components.iter_of_mut::<ResourceComponent<NodeGroup>>() {
            group.spec_mut().subnet_ids = subnets.clone();
        }
        for bootstrap in components.iter_of_mut::<ClusterBootstrap>() {
            bootstrap.set_factory(lazy_bootstrap(
                self.clusters.clone(),
                cluster_name.clone(),
                |status: &EksClusterStatus| status.access.clone(),
                self.bootstrapper.clone(),
                ctx.cluster.clone(),
            ));
        }
        Ok(())
    }

    async fn set_provider_data(&self, components: &ClusterComponents, cluster: &mut Cluster) -> Result<()> {
        let data = &mut cluster.status_mut().provider_data;
        if let Some(vpc) = components.iter_of::<ResourceComponent<Vpc>>().find_map(|c| c.observed()) {
            data.insert("vpcId".into(), vpc.vpc_id.clone());
            if !vpc.subnet_ids.is_empty() {
                data.insert("subnetIds".into(), vpc.subnet_ids.join(","));
            }
            if let Some(sg) = &vpc.security_group_id {
                data.insert("securityGroupId".into(), sg.clone());
            }
        }
        if let Some(eks) = components.provider::<ResourceComponent<EksCluster>>().and_then(|c| c.observed()) {
            data.insert("clusterArn".into(), eks.arn.clone());
            // arn:aws:eks:<region>:<account>:cluster/<name>
            if let Some(account) = eks.arn.split(':').nth(4).filter(|a| !a.is_empty()) {
                data.insert("accountId".into(), account.to_string());
            }
        }
        Ok(())
    }
}

impl Simulate for Vpc {
    const DELETING: &'static str = "deleting";
    const PROGRESS: &'static [&'static str] = &["pending", "available"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(
            StatusCode::BAD_REQUEST,
            "InvalidVpcID.NotFound",
            format!("The vpc ID '{name}' does not exist"),
        )
    }

    fn render(_name: &str, spec: &VpcSpec, state: &str, serial: u64) -> VpcStatus {
        let available = state == "available";
        let subnet_ids = if available {
            (0..spec.availability_zones.len())
                .map(|i| format!("subnet-{serial:08x}{i:04x}"))
                .collect()
        } else {
            Vec::new()
        };
        VpcStatus {
            vpc_id: format!("vpc-{serial:012x}"),
            state: state.to_string(),
            subnet_ids,
            security_group_id: available.then(|| format!("sg-{serial:012x}")),
        }
    }
}

impl Simulate for EksCluster {
    const DELETING: &'static str = "DELETING";
    const PROGRESS: &'static [&'static str] = &["CREATING", "CREATING", "ACTIVE"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            format!("No cluster found for name: {name}."),
        )
    }

    fn render(name: &str, spec: &EksClusterSpec, state: &str, serial: u64) -> EksClusterStatus {
        let endpoint = format!("https://{serial:032X}.gr7.{}.eks.amazonaws.com", spec.region);
        EksClusterStatus {
            arn: format!("arn:aws:eks:{}:{ACCOUNT_ID}:cluster/{name}", spec.region),
            status: state.to_string(),
            access: (state == "ACTIVE").then(|| simulated_access(&endpoint, serial)),
            endpoint: Some(endpoint),
        }
    }
}

impl Simulate for NodeGroup {
    const DELETING: &'static str = "DELETING";
    const PROGRESS: &'static [&'static str] = &["CREATING", "ACTIVE"];

    fn not_found(name: &str) -> CloudError {
        CloudError::new(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            format!("No node group found for name: {name}."),
        )
    }

    fn render(name: &str, spec: &NodeGroupSpec, state: &str, serial: u64) -> NodeGroupStatus {
        NodeGroupStatus {
            arn: format!(
                "arn:aws:eks:{}:{ACCOUNT_ID}:nodegroup/{}/{name}/{serial}",
                spec.region, spec.cluster_name
            ),
            status: state.to_string(),
        }
    }
}
