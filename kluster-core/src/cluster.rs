//! The `Cluster` custom resource
use crate::status::ComponentStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Desired state of a provisioned Kubernetes cluster
///
/// `provider` selects the registered provider that turns this spec into components,
/// `plan` selects one of that provider's plans, and `config` overrides the plan's
/// editable parameters.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kluster.dev",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    shortname = "kc",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Registered provider type, e.g. `aks`, `eks`, `gke` or `unmanaged`
    pub provider: String,
    /// Plan name, the provider's default plan when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Parameter overrides on top of the plan
    ///
    /// Structured parameters (node groups for instance) are JSON strings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    /// Secret in the cluster's namespace holding cloud credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<String>,
}

/// Coarse lifecycle of a [`Cluster`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Components are converging
    Provisioning,
    /// Every component converged
    Ready,
    /// The cluster is being torn down
    Deleting,
    /// Validation or a component failed
    Failed,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observed state of a [`Cluster`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: ClusterPhase,
    /// Human readable detail for the phase
    ///
    /// Always serialized, as `null` when unset, so a merge patch clears a stale message.
    #[serde(default)]
    pub message: Option<String>,
    /// Generation of the spec that was last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// One record per component processed in the last pass, in processing order
    #[serde(default)]
    pub components: Vec<ComponentStatus>,
    /// Data derived by the provider, e.g. network IDs or the cloud account
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_data: BTreeMap<String, String>,
}

impl Cluster {
    /// Provider data written by a previous pass
    pub fn provider_data(&self, key: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.provider_data.get(key))
            .map(String::as_str)
    }

    /// Mutable status, created on first use
    pub fn status_mut(&mut self) -> &mut ClusterStatus {
        self.status.get_or_insert_with(ClusterStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, ResourceExt};

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = Cluster::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("clusters.kluster.dev"));
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
        assert_eq!(crd.spec.names.short_names, Some(vec!["kc".to_string()]));
    }

    #[test]
    fn status_round_trips_camel_case() {
        let cluster: Cluster = serde_yaml::from_str(
            r#"
apiVersion: kluster.dev/v1alpha1
kind: Cluster
metadata:
  name: prod
  namespace: team-a
spec:
  provider: aks
  config:
    location: westeurope
status:
  phase: Provisioning
  observedGeneration: 3
  components:
    - name: Finalizer
      status: Ok
    - name: ResourceGroup
      status: Pending
      message: provisioningState Creating
  providerData:
    accountId: "1234"
"#,
        )
        .unwrap();
        assert_eq!(cluster.name_any(), "prod");
        assert_eq!(cluster.spec.config.get("location").map(String::as_str), Some("westeurope"));
        let status = cluster.status.as_ref().unwrap();
        assert_eq!(status.phase, ClusterPhase::Provisioning);
        assert_eq!(status.components.len(), 2);
        assert_eq!(cluster.provider_data("accountId"), Some("1234"));
    }
}
