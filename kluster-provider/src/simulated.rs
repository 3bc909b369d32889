use crate::{
    aws::{EksCluster, EksProvider, NodeGroup, Vpc},
    azure::{AksProvider, ManagedCluster, ResourceGroup},
    gcp::{GkeCluster, GkeProvider, Project},
    memory::MemoryCloud,
    unmanaged::UnmanagedProvider,
};
use kluster_runtime::{bootstrap::Bootstrapper, ProviderRegistry, Result};

/// One in-memory cloud per resource type, shared by every provider built from it
#[derive(Clone, Default)]
pub struct SimulatedClouds {
    /// Azure resource groups
    pub resource_groups: MemoryCloud<ResourceGroup>,
    /// AKS clusters
    pub managed_clusters: MemoryCloud<ManagedCluster>,
    /// AWS VPCs
    pub vpcs: MemoryCloud<Vpc>,
    /// EKS clusters
    pub eks_clusters: MemoryCloud<EksCluster>,
    /// EKS node groups
    pub node_groups: MemoryCloud<NodeGroup>,
    /// GCP projects
    pub projects: MemoryCloud<Project>,
    /// GKE clusters
    pub gke_clusters: MemoryCloud<GkeCluster>,
}

impl SimulatedClouds {
    /// Empty clouds
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider, backed by these clouds
    pub fn registry(&self, bootstrapper: Bootstrapper) -> Result<ProviderRegistry> {
        ProviderRegistry::new()
            .with(AksProvider::new(
                self.resource_groups.api(),
                self.managed_clusters.api(),
                bootstrapper.clone(),
            ))?
            .with(EksProvider::new(
                self.vpcs.api(),
                self.eks_clusters.api(),
                self.node_groups.api(),
                bootstrapper.clone(),
            ))?
            .with(GkeProvider::new(
                self.projects.api(),
                self.gke_clusters.api(),
                bootstrapper.clone(),
            ))?
            .with(UnmanagedProvider::new(bootstrapper))
    }
}
