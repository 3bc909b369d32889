//! In-memory cloud with scripted provisioning progress
//!
//! Stands in for a cloud SDK in tests and in the demo operator's simulated mode.
//! A created resource walks through [`Simulate::PROGRESS`], one state per lookup,
//! and a deleted one is reported as [`Simulate::DELETING`] for one lookup before it
//! disappears.
use crate::cloud::{CloudApi, CloudError, CloudResource};
use async_trait::async_trait;
use kluster_runtime::ClusterAccess;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

/// Self-signed CA handed out with simulated cluster credentials
pub const SIMULATED_CA_PEM: &str =
    "-----BEGIN CERTIFICATE-----\nc2ltdWxhdGVkIGNsdXN0ZXIgY2E=\n-----END CERTIFICATE-----\n";

/// Access details for a simulated cluster at `endpoint`
pub fn simulated_access(endpoint: &str, serial: u64) -> ClusterAccess {
    ClusterAccess {
        endpoint: endpoint.to_string(),
        ca_pem: SIMULATED_CA_PEM.to_string(),
        token: SecretString::from(format!("simulated-token-{serial}")),
    }
}

/// How the in-memory cloud renders a resource of this type
pub trait Simulate: CloudResource {
    /// States a new resource goes through, the last one being terminal success
    const PROGRESS: &'static [&'static str];

    /// State reported while a deletion is in progress
    const DELETING: &'static str;

    /// The error this cloud returns for a missing resource
    fn not_found(name: &str) -> CloudError;

    /// Observed state of the resource `name`, the `serial`th one created
    fn render(name: &str, spec: &Self::Spec, state: &str, serial: u64) -> Self::Status;
}

/// The calls of a [`CloudApi`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// [`CloudApi::get`]
    Get,
    /// [`CloudApi::create_or_update`]
    CreateOrUpdate,
    /// [`CloudApi::delete`]
    Delete,
}

struct Stored<R: CloudResource> {
    spec: R::Spec,
    serial: u64,
    step: usize,
    state: Option<String>,
    deleting: Option<usize>,
}

struct Inner<R: CloudResource> {
    objects: BTreeMap<String, Stored<R>>,
    serial: u64,
    calls: HashMap<Op, usize>,
    failures: VecDeque<(Op, CloudError)>,
}

/// In-memory [`CloudApi`]; clones share the same state
pub struct MemoryCloud<R: CloudResource> {
    inner: Arc<Mutex<Inner<R>>>,
}

impl<R: CloudResource> Clone for MemoryCloud<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Simulate> Default for MemoryCloud<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Simulate> MemoryCloud<R> {
    /// Empty cloud
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: BTreeMap::new(),
                serial: 0,
                calls: HashMap::new(),
                failures: VecDeque::new(),
            })),
        }
    }

    /// Handle for components
    pub fn api(&self) -> Arc<dyn CloudApi<R>> {
        Arc::new(self.clone())
    }

    /// Add an already provisioned resource
    pub fn seed(&self, name: &str, spec: R::Spec) {
        let mut inner = self.inner.lock();
        inner.serial += 1;
        let serial = inner.serial;
        inner.objects.insert(name.to_string(), Stored {
            spec,
            serial,
            step: R::PROGRESS.len().saturating_sub(1),
            state: None,
            deleting: None,
        });
    }

    /// Pin the state reported for `name`
    pub fn set_state(&self, name: &str, state: &str) {
        if let Some(stored) = self.inner.lock().objects.get_mut(name) {
            stored.state = Some(state.to_string());
        }
    }

    /// Fail the next `op` call with `err`
    pub fn fail_next(&self, op: Op, err: CloudError) {
        self.inner.lock().failures.push_back((op, err));
    }

    /// Number of `op` calls so far
    pub fn calls(&self, op: Op) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Whether `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().objects.contains_key(name)
    }

    /// Desired state last sent for `name`
    pub fn spec(&self, name: &str) -> Option<R::Spec> {
        self.inner.lock().objects.get(name).map(|s| s.spec.clone())
    }
}

impl<R: CloudResource> Inner<R> {
    fn record(&mut self, op: Op) -> Result<(), CloudError> {
        *self.calls.entry(op).or_default() += 1;
        let injected = self.failures.iter().position(|(o, _)| *o == op);
        match injected.and_then(|i| self.failures.remove(i)) {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<R: Simulate> CloudApi<R> for MemoryCloud<R> {
    async fn get(&self, name: &str) -> Result<R::Status, CloudError> {
        let mut inner = self.inner.lock();
        inner.record(Op::Get)?;
        let Some(stored) = inner.objects.get_mut(name) else {
            return Err(R::not_found(name));
        };
        let state = match stored.deleting {
            Some(0) => {
                inner.objects.remove(name);
                return Err(R::not_found(name));
            }
            Some(left) => {
                stored.deleting = Some(left - 1);
                R::DELETING.to_string()
            }
            None => {
                let progress = R::PROGRESS[stored.step.min(R::PROGRESS.len() - 1)];
                stored.step += 1;
                stored.state.clone().unwrap_or_else(|| progress.to_string())
            }
        };
        Ok(R::render(name, &stored.spec, &state, stored.serial))
    }

    async fn create_or_update(&self, name: &str, spec: &R::Spec) -> Result<(), CloudError> {
        let mut inner = self.inner.lock();
        inner.record(Op::CreateOrUpdate)?;
        if let Some(stored) = inner.objects.get_mut(name) {
            stored.spec = spec.clone();
            return Ok(());
        }
        inner.serial += 1;
        let serial = inner.serial;
        inner.objects.insert(name.to_string(), Stored {
            spec: spec.clone(),
            serial,
            step: 0,
            state: None,
            deleting: None,
        });
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CloudError> {
        let mut inner = self.inner.lock();
        inner.record(Op::Delete)?;
        match inner.objects.get_mut(name) {
            Some(stored) => {
                stored.deleting.get_or_insert(1);
                Ok(())
            }
            None => Err(R::not_found(name)),
        }
    }
}
