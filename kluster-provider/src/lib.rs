//! Cloud providers for the kluster engine
//!
//! Every provider turns a `Cluster` into a chain of [`ResourceComponent`]s, one per
//! cloud resource, followed by a bootstrap step once the cluster's API server answers:
//!
//! - [`azure::AksProvider`]: resource group, managed cluster
//! - [`aws::EksProvider`]: VPC, EKS cluster, node groups
//! - [`gcp::GkeProvider`]: project, GKE cluster
//! - [`unmanaged::UnmanagedProvider`]: an existing cluster, bootstrap only
//!
//! Cloud SDKs are reached through [`CloudApi`]. The [`memory`] module implements it in
//! memory, which the tests and the demo operator use in place of real clouds.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

use kluster_core::Cluster;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod unmanaged;

mod cloud;
pub use cloud::{CloudApi, CloudError, CloudResource, Convergence};

pub mod memory;
pub use memory::{MemoryCloud, Simulate};

mod resource;
pub use resource::{lazy_bootstrap, ResourceComponent, DEFAULT_REQUEUE};

mod simulated;
pub use simulated::SimulatedClouds;

/// Tag key pointing cloud resources back at their `Cluster`
pub const OWNER_TAG: &str = "kluster.dev/cluster";

/// Tags put on every cloud resource created for `cluster`
pub fn owner_tags(cluster: &Cluster) -> BTreeMap<String, String> {
    let owner = format!("{}/{}", cluster.namespace().unwrap_or_default(), cluster.name_any());
    BTreeMap::from([(OWNER_TAG.to_string(), owner)])
}

#[cfg(test)] mod scenario_tests;
