//! Post-provisioning setup against a freshly created cluster
use crate::{component::Component, Error, Result};
use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kluster_core::{Cluster, ComponentStatus, Outcome};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// Namespace created in every bootstrapped cluster
pub const SYSTEM_NAMESPACE: &str = "kluster-system";

/// ConfigMap recording which `Cluster` object owns the bootstrapped cluster
pub const IDENTITY_CONFIGMAP: &str = "kluster-identity";

/// How to reach a provisioned cluster, as reported by its cloud
#[derive(Clone, Debug)]
pub struct ClusterAccess {
    /// API server URL
    pub endpoint: String,
    /// PEM bundle of the cluster CA
    pub ca_pem: String,
    /// Bearer token
    pub token: SecretString,
}

/// A connected workload cluster
#[derive(Clone)]
pub struct BootCluster {
    /// API server URL
    pub endpoint: String,
    /// Name of the owning `Cluster`
    pub name: String,
    /// Namespace of the owning `Cluster`
    pub namespace: String,
    /// Client for the workload cluster
    pub client: Client,
}

impl BootCluster {
    /// Build a client for the cluster behind `access`
    ///
    /// Only certificates are taken from the CA bundle; other PEM blocks are skipped.
    pub fn connect(owner: &Cluster, access: &ClusterAccess) -> Result<Self> {
        let uri: http::Uri = access
            .endpoint
            .parse()
            .map_err(|err: http::uri::InvalidUri| Error::Connect(format!("{}: {err}", access.endpoint)))?;
        let roots: Vec<Vec<u8>> = pem::parse_many(&access.ca_pem)
            .map_err(|err| Error::Connect(format!("invalid CA bundle: {err}")))?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| block.into_contents())
            .collect();
        if roots.is_empty() {
            return Err(Error::Connect("CA bundle contains no certificate".into()));
        }

        let mut config = kube::Config::new(uri);
        config.root_cert = Some(roots);
        config.auth_info.token = Some(access.token.clone());
        let client = Client::try_from(config).map_err(|err| Error::Connect(err.to_string()))?;
        Ok(Self {
            endpoint: access.endpoint.clone(),
            name: owner.name_any(),
            namespace: owner.namespace().ok_or(Error::UnnamespacedObject)?,
            client,
        })
    }
}

/// One-shot setup run once the cluster's main resource is ready
#[async_trait]
pub trait Bootstrap: Send + Sync {
    /// Perform the setup; `management` talks to the cluster hosting the `Cluster` objects
    ///
    /// Re-run on every pass while the bootstrap component is reconciled, so it has to be
    /// idempotent.
    async fn run(&self, management: Client) -> Result<()>;

    /// The workload cluster being set up
    fn cluster(&self) -> &BootCluster;

    /// The owning `Cluster` object
    fn cluster_obj(&self) -> &Cluster;

    /// Span the run is instrumented with
    fn span(&self) -> tracing::Span {
        let cluster = self.cluster();
        info_span!(
            "bootstrap",
            endpoint = %cluster.endpoint,
            cluster = %cluster.name,
            namespace = %cluster.namespace
        )
    }
}

/// Builds the [`Bootstrap`] for one pass, capturing its connection details
pub type BootstrapFactory = Box<dyn Fn() -> BoxFuture<'static, Result<Box<dyn Bootstrap>>> + Send + Sync>;

/// Turns connection details into a [`Bootstrap`]; held by providers
pub type Bootstrapper =
    Arc<dyn Fn(Cluster, ClusterAccess) -> BoxFuture<'static, Result<Box<dyn Bootstrap>>> + Send + Sync>;

/// [`Bootstrapper`] connecting for real and applying [`ManifestBootstrap`]
pub fn manifests(field_manager: impl Into<String>) -> Bootstrapper {
    let field_manager = field_manager.into();
    Arc::new(move |owner: Cluster, access: ClusterAccess| {
        let field_manager = field_manager.clone();
        async move {
            let boot = BootCluster::connect(&owner, &access)?;
            Ok(Box::new(ManifestBootstrap::new(boot, owner, field_manager)) as Box<dyn Bootstrap>)
        }
        .boxed()
    })
}

/// Component running a [`Bootstrap`] once the cluster it depends on is ready
///
/// Providers add it depending on their main resource and hand it a factory in
/// `before_components_update`, once the connection details are known.
pub struct ClusterBootstrap {
    management: Client,
    factory: Option<BootstrapFactory>,
}

impl ClusterBootstrap {
    /// Bootstrap component without connection details yet
    pub fn new(management: Client) -> Self {
        Self {
            management,
            factory: None,
        }
    }

    /// Set the factory used by the next reconcile
    pub fn set_factory(&mut self, factory: BootstrapFactory) {
        self.factory = Some(factory);
    }

    /// Set a factory handing `owner` and `access` to `bootstrapper`
    pub fn connect_with(&mut self, bootstrapper: &Bootstrapper, owner: &Cluster, access: ClusterAccess) {
        let bootstrapper = bootstrapper.clone();
        let owner = owner.clone();
        self.set_factory(Box::new(move || bootstrapper(owner.clone(), access.clone())));
    }

    /// Whether connection details were provided
    pub fn is_configured(&self) -> bool {
        self.factory.is_some()
    }
}

#[async_trait]
impl Component for ClusterBootstrap {
    fn name(&self) -> String {
        "Bootstrap".to_string()
    }

    async fn reconcile(&mut self) -> Result<Outcome> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| Error::Bootstrap("no connection details for the cluster".into()))?;
        let bootstrap = factory().await?;
        let span = bootstrap.span();
        bootstrap
            .run(self.management.clone())
            .instrument(span)
            .await
            .map_err(|err| match err {
                Error::Bootstrap(_) | Error::Connect(_) => err,
                other => Error::Bootstrap(Box::new(other)),
            })?;
        Ok(Outcome::done())
    }

    async fn delete(&mut self) -> Result<Outcome> {
        Ok(Outcome::done())
    }

    fn set_status(&self, status: &mut ComponentStatus) {
        if !self.is_configured() {
            status.message = Some("waiting for cluster endpoint".into());
        }
    }
}

/// Default bootstrap: applies the system namespace and an identity ConfigMap
pub struct ManifestBootstrap {
    boot: BootCluster,
    owner: Cluster,
    field_manager: String,
}

impl ManifestBootstrap {
    /// Bootstrap `boot` on behalf of `owner`, applying as `field_manager`
    pub fn new(boot: BootCluster, owner: Cluster, field_manager: impl Into<String>) -> Self {
        Self {
            boot,
            owner,
            field_manager: field_manager.into(),
        }
    }

    fn identity(&self) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": IDENTITY_CONFIGMAP,
                "namespace": SYSTEM_NAMESPACE,
            },
            "data": {
                "cluster": self.owner.name_any(),
                "namespace": self.owner.namespace().unwrap_or_default(),
                "uid": self.owner.uid().unwrap_or_default(),
                "provider": self.owner.spec.provider,
            }
        })
    }
}

#[async_trait]
impl Bootstrap for ManifestBootstrap {
    async fn run(&self, _management: Client) -> Result<()> {
        let params = PatchParams::apply(&self.field_manager).force();

        let namespaces: Api<Namespace> = Api::all(self.boot.client.clone());
        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": SYSTEM_NAMESPACE },
        });
        namespaces
            .patch(SYSTEM_NAMESPACE, &params, &Patch::Apply(&namespace))
            .await
            .map_err(|err| Error::Bootstrap(Box::new(err)))?;

        let configmaps: Api<ConfigMap> = Api::namespaced(self.boot.client.clone(), SYSTEM_NAMESPACE);
        configmaps
            .patch(IDENTITY_CONFIGMAP, &params, &Patch::Apply(&self.identity()))
            .await
            .map_err(|err| Error::Bootstrap(Box::new(err)))?;
        info!("applied system manifests");
        Ok(())
    }

    fn cluster(&self) -> &BootCluster {
        &self.boot
    }

    fn cluster_obj(&self) -> &Cluster {
        &self.owner
    }
}
