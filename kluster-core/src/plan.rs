//! Plans, plan policies and the parameters they resolve to
//!
//! A provider offers a set of named [`Plan`]s. A [`PlanPolicy`] names the default plan
//! and the parameters users may override through `spec.config`.
//! [`resolve_parameters`] combines the three into the [`Parameters`] that providers
//! build components from.
use crate::{cluster::Cluster, Error, Result};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};

/// A named set of parameters offered by a provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Plan name referenced from `spec.plan`
    pub name: String,
    /// What the plan is for
    #[serde(default)]
    pub description: String,
    /// Parameter values
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Plan {
    /// Plan without parameters
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter value
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Which plan applies by default, and what users may change
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanPolicy {
    /// Plan used when `spec.plan` is unset
    pub default_plan: String,
    /// Parameters `spec.config` may set
    #[serde(default)]
    pub editable: Vec<String>,
}

impl PlanPolicy {
    /// Policy with nothing editable
    pub fn new(default_plan: impl Into<String>) -> Self {
        Self {
            default_plan: default_plan.into(),
            editable: Vec::new(),
        }
    }

    /// Allow users to override `key`
    #[must_use]
    pub fn editable(mut self, key: impl Into<String>) -> Self {
        self.editable.push(key.into());
        self
    }

    fn allows(&self, key: &str) -> bool {
        self.editable.iter().any(|k| k == key)
    }
}

/// Resolved provider parameters for one cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    plan: String,
    values: BTreeMap<String, String>,
}

impl Parameters {
    /// Parameters from raw values
    pub fn new(plan: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        Self {
            plan: plan.into(),
            values,
        }
    }

    /// Name of the plan these came from
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Raw value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw value that must be present
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Error::MissingParameter(key.to_string()))
    }

    /// Raw value, or `default` when absent
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a scalar value, `None` when absent
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| Error::InvalidParameter {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Decode a JSON-valued parameter, `None` when absent
    pub fn json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| Error::InvalidParameter {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Comma separated list, empty when absent
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Resolve the parameters a cluster asks for
///
/// Picks `spec.plan` (or the policy default) from `plans`, then overlays every
/// `spec.config` entry. Overriding a parameter the policy does not list as editable
/// is rejected, so are unknown plans.
pub fn resolve_parameters(cluster: &Cluster, plans: &[Plan], policy: &PlanPolicy) -> Result<Parameters> {
    let wanted = cluster.spec.plan.as_deref().unwrap_or(&policy.default_plan);
    let plan = plans
        .iter()
        .find(|p| p.name == wanted)
        .ok_or_else(|| Error::UnknownPlan {
            provider: cluster.spec.provider.clone(),
            plan: wanted.to_string(),
        })?;

    let mut values = plan.parameters.clone();
    for (key, value) in &cluster.spec.config {
        if !policy.allows(key) {
            return Err(Error::NotEditable(key.clone()));
        }
        values.insert(key.clone(), value.clone());
    }
    Ok(Parameters::new(&plan.name, values))
}

/// Best-effort parameters for tearing a cluster down
///
/// Deletion must proceed even when the spec no longer passes validation, so unknown
/// plans fall back to the default plan and every `spec.config` entry is applied.
pub fn deletion_parameters(cluster: &Cluster, plans: &[Plan], policy: &PlanPolicy) -> Parameters {
    let wanted = cluster.spec.plan.as_deref().unwrap_or(&policy.default_plan);
    let plan = plans
        .iter()
        .find(|p| p.name == wanted)
        .or_else(|| plans.iter().find(|p| p.name == policy.default_plan));
    let mut values = plan.map(|p| p.parameters.clone()).unwrap_or_default();
    values.extend(cluster.spec.config.clone());
    Parameters::new(plan.map(|p| p.name.as_str()).unwrap_or(wanted), values)
}
