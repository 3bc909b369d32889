//! Crate with the component reconciliation engine and the cluster controller
//!
//! Every provider describes a cluster as a [`ClusterComponents`] collection: one
//! [`Component`] per external resource, each listing the entries it depends on.
//! The [`Components`] engine walks that collection forward to create and converge,
//! and backward to delete, writing one status record per component onto the owner.
//!
//! Newcomers should generally get started with [`controller::run`], which wires a
//! [`ProviderRegistry`] into a `kube` controller for the `Cluster` resource.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

pub mod bootstrap;
pub use bootstrap::{BootCluster, Bootstrap, ClusterAccess, ClusterBootstrap};

mod component;
pub use component::{AsAny, Component, WithDeletionStatus};

mod components;
pub use components::{ClusterComponentEntry, ClusterComponents, ComponentId};

mod config;
pub use config::OperatorConfig;

pub mod controller;
pub use controller::Context;

mod engine;
pub use engine::Components;

pub mod finalizer;
pub use finalizer::Finalizer;

pub mod provider;
pub use provider::{ClusterContext, Provider, ProviderRegistry};

mod error;
pub use error::{BoxError, Error, Result};

#[cfg(test)] mod mock_tests;
