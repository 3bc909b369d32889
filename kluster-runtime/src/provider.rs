//! Cloud providers and the registry the controller looks them up in
use crate::{components::ClusterComponents, Error, Result};
use async_trait::async_trait;
use kluster_core::{
    plan::{deletion_parameters, resolve_parameters},
    Cluster, ComponentOwner, Parameters, Plan, PlanPolicy,
};
use kube::Client;
use std::{collections::HashMap, fmt, sync::Arc};

/// Everything a provider gets to see about the cluster it is assembling
#[derive(Clone)]
pub struct ClusterContext {
    /// Snapshot of the cluster as delivered to this pass
    pub cluster: Cluster,
    /// Plan parameters with the cluster's overrides applied
    pub parameters: Parameters,
    /// Client for the management cluster
    pub client: Client,
}

impl ClusterContext {
    /// Resolve the parameters `cluster` asks for from `provider`'s plans
    ///
    /// Clusters being deleted get [`deletion_parameters`], so a spec that stopped
    /// validating can still be torn down.
    pub fn new(provider: &dyn Provider, cluster: &Cluster, client: Client) -> Result<Self> {
        let plans = provider.default_plans();
        let policy = provider.default_plan_policy();
        let parameters = if cluster.is_deleting() {
            deletion_parameters(cluster, &plans, &policy)
        } else {
            resolve_parameters(cluster, &plans, &policy)?
        };
        Ok(Self {
            cluster: cluster.clone(),
            parameters,
            client,
        })
    }
}

/// One kind of cluster (AKS, EKS, ...), plugged into the generic engine
///
/// Each pass the controller calls [`set_components`](Provider::set_components) on an
/// empty collection that only holds the finalizer guard, then
/// [`before_components_update`](Provider::before_components_update), runs the engine,
/// and finally [`set_provider_data`](Provider::set_provider_data).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, matched against `spec.provider`
    fn type_name(&self) -> &'static str;

    /// JSON schema of the plan parameters
    fn plan_json_schema(&self) -> serde_json::Value;

    /// Plans offered out of the box
    fn default_plans(&self) -> Vec<Plan>;

    /// Default plan and the parameters users may override
    fn default_plan_policy(&self) -> PlanPolicy;

    /// Provider specific semantic checks, run before any component is built
    async fn validate(&self, _ctx: &ClusterContext) -> Result<()> {
        Ok(())
    }

    /// Declare the components and their dependencies
    async fn set_components(&self, ctx: &ClusterContext, components: &mut ClusterComponents) -> Result<()>;

    /// Patch component specs from the parameters and from data read back earlier
    async fn before_components_update(
        &self,
        _ctx: &ClusterContext,
        _components: &mut ClusterComponents,
    ) -> Result<()> {
        Ok(())
    }

    /// Copy data learned from the cloud onto `cluster.status.providerData`
    async fn set_provider_data(&self, _components: &ClusterComponents, _cluster: &mut Cluster) -> Result<()> {
        Ok(())
    }
}

/// Name-keyed set of providers, built at startup and handed to the controller
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its [`Provider::type_name`]
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateProvider`] when the name is taken.
    pub fn register(&mut self, provider: impl Provider + 'static) -> Result<()> {
        let name = provider.type_name();
        if self.providers.contains_key(name) {
            return Err(Error::DuplicateProvider(name.to_string()));
        }
        self.providers.insert(name.to_string(), Arc::new(provider));
        Ok(())
    }

    /// Builder flavour of [`ProviderRegistry::register`]
    pub fn with(mut self, provider: impl Provider + 'static) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    /// Provider registered as `name`
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))
    }

    /// Registered names, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry").field("types", &self.types()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{components::tests::Noop, mock_tests::cluster};

    /// Provider with one component per name in `shape`, the last one being the provider entry
    pub(crate) struct Fake {
        pub name: &'static str,
        pub shape: Vec<&'static str>,
    }

    #[async_trait]
    impl Provider for Fake {
        fn type_name(&self) -> &'static str {
            self.name
        }

        fn plan_json_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }

        fn default_plans(&self) -> Vec<Plan> {
            vec![Plan::new("basic", "").param("size", "s"), Plan::new("big", "").param("size", "l")]
        }

        fn default_plan_policy(&self) -> PlanPolicy {
            PlanPolicy::new("basic").editable("size")
        }

        async fn validate(&self, ctx: &ClusterContext) -> Result<()> {
            match ctx.parameters.get("size") {
                Some("s" | "l") => Ok(()),
                other => Err(Error::Validation(format!("unsupported size {other:?}"))),
            }
        }

        async fn set_components(
            &self,
            _ctx: &ClusterContext,
            components: &mut ClusterComponents,
        ) -> Result<()> {
            let mut previous = Vec::new();
            for (i, name) in self.shape.iter().enumerate() {
                let id = if i + 1 == self.shape.len() {
                    components.add_provider(Noop(*name), &previous)?
                } else {
                    components.add(Noop(*name), &previous)?
                };
                previous = vec![id];
            }
            Ok(())
        }
    }

    fn fake(name: &'static str) -> Fake {
        Fake { name, shape: vec![] }
    }

    #[test]
    fn registry_is_keyed_by_type_name() {
        let registry = ProviderRegistry::new().with(fake("gke")).unwrap().with(fake("aks")).unwrap();
        assert_eq!(registry.types(), vec!["aks", "gke"]);
        assert_eq!(registry.get("aks").unwrap().type_name(), "aks");
        assert!(matches!(registry.get("eks"), Err(Error::UnknownProvider(n)) if n == "eks"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();
        registry.register(fake("aks")).unwrap();
        let err = registry.register(fake("aks")).unwrap_err();
        assert!(matches!(err, Error::DuplicateProvider(n) if n == "aks"));
    }

    #[tokio::test]
    async fn context_resolves_plan_parameters() {
        let (client, _apiserver) = crate::mock_tests::testcontext();
        let provider = fake("test");

        let mut owner = cluster(&[], false);
        owner.spec.plan = Some("big".into());
        let ctx = ClusterContext::new(&provider, &owner, client.clone()).unwrap();
        assert_eq!(ctx.parameters.plan(), "big");
        assert_eq!(ctx.parameters.get("size"), Some("l"));

        owner.spec.plan = Some("gold".into());
        let err = ClusterContext::new(&provider, &owner, client.clone()).err().unwrap();
        assert!(err.is_validation());

        let mut deleting = cluster(&[], true);
        deleting.spec.plan = Some("gold".into());
        let ctx = ClusterContext::new(&provider, &deleting, client).unwrap();
        assert_eq!(ctx.parameters.plan(), "basic");
    }
}
