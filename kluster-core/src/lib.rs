//! Crate with the types and traits shared by every part of kluster
//!
//! This crate holds everything that does not need a Kubernetes client:
//! the [`Cluster`] custom resource, the status records the engine writes back,
//! the [`Outcome`] of a reconcile step, plans and parameters, and naming helpers.
//! The same information is re-exported from `kluster` under `kluster::core`.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

pub mod cluster;
pub use cluster::{Cluster, ClusterPhase, ClusterSpec, ClusterStatus};

pub mod naming;

mod outcome;
pub use outcome::Outcome;

mod owner;
pub use owner::ComponentOwner;

pub mod plan;
pub use plan::{Parameters, Plan, PlanPolicy};

pub mod status;
pub use status::{ComponentState, ComponentStatus};

mod error;
pub use error::Error;

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
