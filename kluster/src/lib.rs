//! Kluster provisions Kubernetes clusters on AKS, EKS and GKE, or adopts existing ones,
//! from a single `Cluster` custom resource.
//!
//! This crate is an umbrella over the workspace:
//!
//! - [`core`]: the `Cluster` resource, plans, status records and [`Outcome`]
//! - [`runtime`]: the component engine, finalizer, bootstrap and the controller
//! - [`provider`]: the cloud providers and an in-memory cloud for testing
//!
//! # Example
//!
//! Running the controller against simulated clouds:
//!
//! ```rust,no_run
//! use kluster::{provider::SimulatedClouds, runtime::{bootstrap, controller, Context, OperatorConfig}};
//! use kube::Client;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::try_default().await?;
//!     let config = OperatorConfig::default();
//!     let registry = SimulatedClouds::new().registry(bootstrap::manifests(&config.field_manager))?;
//!     let ctx = Arc::new(Context::new(client, registry, config));
//!     controller::run(ctx).await?;
//!     Ok(())
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

macro_rules! cfg_runtime {
    ($($item:item)*) => {
        $(
            #[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
            #[cfg(feature = "runtime")]
            $item
        )*
    }
}

macro_rules! cfg_providers {
    ($($item:item)*) => {
        $(
            #[cfg_attr(docsrs, doc(cfg(feature = "providers")))]
            #[cfg(feature = "providers")]
            $item
        )*
    }
}

cfg_runtime! {
    #[doc(inline)]
    pub use kluster_runtime as runtime;

    #[doc(inline)]
    pub use runtime::{Component, Components, ClusterComponents, Error, Provider, ProviderRegistry};
    /// Convenient alias for `Result<T, Error>`
    pub type Result<T, E = Error> = std::result::Result<T, E>;
}

cfg_providers! {
    #[doc(inline)]
    pub use kluster_provider as provider;
}

#[doc(inline)]
pub use kluster_core as core;
pub use crate::core::{Cluster, ClusterPhase, ClusterSpec, ClusterStatus, Outcome};
