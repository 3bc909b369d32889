//! Existing clusters: nothing to provision, only the bootstrap
//!
//! The API server address and CA come from the plan parameters, the bearer token from
//! the `token` key of the Secret named by `spec.credentialsSecret`.
use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Secret;
use kluster_core::{Cluster, Plan, PlanPolicy};
use kluster_runtime::{
    bootstrap::{BootstrapFactory, Bootstrapper},
    ClusterAccess, ClusterBootstrap, ClusterComponents, ClusterContext, Error, Provider, Result,
};
use kube::{Api, Client, ResourceExt};
use schemars::JsonSchema;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Key of the bearer token in the credentials Secret
pub const TOKEN_KEY: &str = "token";

/// Plan parameters understood by [`UnmanagedProvider`]
#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnmanagedParameters {
    /// API server URL, `https://...`
    pub endpoint: String,
    /// PEM bundle of the cluster CA
    pub ca_certificate: String,
}

/// Provider adopting a cluster that already exists
pub struct UnmanagedProvider {
    bootstrapper: Bootstrapper,
}

impl UnmanagedProvider {
    /// Provider bootstrapping through `bootstrapper`
    pub fn new(bootstrapper: Bootstrapper) -> Self {
        Self { bootstrapper }
    }
}

async fn read_token(client: Client, namespace: &str, name: &str) -> Result<SecretString> {
    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    let secret = secrets.get(name).await.map_err(Error::Kube)?;
    let raw = secret
        .data
        .and_then(|mut data| data.remove(TOKEN_KEY))
        .ok_or_else(|| Error::Connect(format!("secret {name} has no {TOKEN_KEY:?} key")))?;
    let token =
        String::from_utf8(raw.0).map_err(|_| Error::Connect(format!("secret {name}: token is not UTF-8")))?;
    Ok(SecretString::from(token.trim().to_string()))
}

fn factory(
    bootstrapper: Bootstrapper,
    owner: Cluster,
    client: Client,
    endpoint: String,
    ca_pem: String,
    secret: String,
) -> BootstrapFactory {
    Box::new(move || {
        let (bootstrapper, owner, client) = (bootstrapper.clone(), owner.clone(), client.clone());
        let (endpoint, ca_pem, secret) = (endpoint.clone(), ca_pem.clone(), secret.clone());
        async move {
            let namespace = owner.namespace().ok_or(Error::UnnamespacedObject)?;
            let token = read_token(client, &namespace, &secret).await?;
            bootstrapper(owner, ClusterAccess {
                endpoint,
                ca_pem,
                token,
            })
            .await
        }
        .boxed()
    })
}

#[async_trait]
impl Provider for UnmanagedProvider {
    fn type_name(&self) -> &'static str {
        "unmanaged"
    }

    fn plan_json_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(UnmanagedParameters)).unwrap_or_default()
    }

    fn default_plans(&self) -> Vec<Plan> {
        vec![Plan::new("default", "connection details supplied in spec.config")]
    }

    fn default_plan_policy(&self) -> PlanPolicy {
        PlanPolicy::new("default").editable("endpoint").editable("caCertificate")
    }

    async fn validate(&self, ctx: &ClusterContext) -> Result<()> {
        let endpoint = ctx.parameters.require("endpoint")?;
        if !endpoint.starts_with("https://") {
            return Err(Error::Validation(format!("endpoint {endpoint:?} must use https")));
        }
        if ctx.parameters.require("caCertificate")?.trim().is_empty() {
            return Err(Error::Validation("caCertificate must not be empty".into()));
        }
        if ctx.cluster.spec.credentials_secret.is_none() {
            return Err(Error::Validation("credentialsSecret is required for unmanaged clusters".into()));
        }
        Ok(())
    }

    async fn set_components(&self, ctx: &ClusterContext, components: &mut ClusterComponents) -> Result<()> {
        components.add_provider(ClusterBootstrap::new(ctx.client.clone()), &[])?;
        Ok(())
    }

    async fn before_components_update(
        &self,
        ctx: &ClusterContext,
        components: &mut ClusterComponents,
    ) -> Result<()> {
        let params = &ctx.parameters;
        // deletion skips validation, leave the bootstrap unconfigured then
        let (Some(endpoint), Some(ca_pem), Some(secret)) = (
            params.get("endpoint"),
            params.get("caCertificate"),
            ctx.cluster.spec.credentials_secret.as_deref(),
        ) else {
            return Ok(());
        };
        let bootstrap = components.require_provider_mut::<ClusterBootstrap>()?;
        bootstrap.set_factory(factory(
            self.bootstrapper.clone(),
            ctx.cluster.clone(),
            ctx.client.clone(),
            endpoint.to_string(),
            ca_pem.to_string(),
            secret.to_string(),
        ));
        Ok(())
    }
}
