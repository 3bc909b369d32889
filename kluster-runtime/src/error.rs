//! Error handling in [`kluster_runtime`][crate]
use thiserror::Error;

/// Boxed error returned by collaborators the runtime does not know the types of
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Possible errors when reconciling clusters
#[derive(Error, Debug)]
pub enum Error {
    /// A component failed to reconcile or delete its external resource
    ///
    /// The pass stops here; components processed before keep their progress.
    #[error("component {component}: {source}")]
    Component {
        /// Display name of the failing component
        component: String,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// A dependency handle does not belong to the collection it was passed to
    #[error("dependency #{dependency} of {component} is not part of this collection")]
    DanglingDependency {
        /// Component being added
        component: String,
        /// Offending handle
        dependency: usize,
    },

    /// A component a provider expected to find was not registered
    #[error("component {0} is missing from the collection")]
    MissingComponent(String),

    /// The cluster's configuration is rejected before any component is built
    #[error("invalid cluster configuration: {0}")]
    Validation(String),

    /// Plan resolution or parameter parsing failed
    #[error("invalid cluster configuration: {0}")]
    Plan(#[source] kluster_core::Error),

    /// No provider is registered for the requested type
    #[error("no provider registered for {0:?}")]
    UnknownProvider(String),

    /// A provider type was registered twice
    #[error("provider {0:?} is already registered")]
    DuplicateProvider(String),

    /// The external cloud API rejected a call
    #[error("cloud api: {0}")]
    Cloud(#[source] BoxError),

    /// The external resource reached a terminal failure state
    #[error("{kind} {name} failed: {reason}")]
    ProvisioningFailed {
        /// Resource kind
        kind: &'static str,
        /// External name
        name: String,
        /// State or message reported by the cloud
        reason: String,
    },

    /// Post-provisioning setup failed
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[source] BoxError),

    /// Could not build a client for a newly provisioned cluster
    #[error("failed to connect to cluster: {0}")]
    Connect(String),

    /// Adding the finalizer marker failed
    #[error("failed to add finalizer: {0}")]
    AddFinalizer(#[source] kube::Error),

    /// Removing the finalizer marker failed
    #[error("failed to remove finalizer: {0}")]
    RemoveFinalizer(#[source] kube::Error),

    /// Building the finalizer patch failed
    #[error("invalid finalizer patch: {0}")]
    InvalidFinalizer(#[source] serde_json::Error),

    /// Writing `status` back to the owner failed
    #[error("failed to patch status: {0}")]
    PatchStatus(#[source] kube::Error),

    /// A Kubernetes API call made by a component failed
    #[error("kube api: {0}")]
    Kube(#[source] kube::Error),

    /// The object has no name
    #[error("object has no name")]
    UnnamedObject,

    /// The object has no namespace
    #[error("object has no namespace")]
    UnnamespacedObject,
}

impl Error {
    /// Wrap with the name of the component it came from
    pub fn in_component(self, component: impl Into<String>) -> Self {
        Error::Component {
            component: component.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error was raised before any component ran
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Plan(_))
    }

    /// Whether retrying with the same spec cannot succeed
    pub fn is_terminal(&self) -> bool {
        match self {
            Error::Component { source, .. } => source.is_terminal(),
            Error::ProvisioningFailed { .. } | Error::UnknownProvider(_) => true,
            other => other.is_validation(),
        }
    }
}

impl From<kluster_core::Error> for Error {
    fn from(err: kluster_core::Error) -> Self {
        Error::Plan(err)
    }
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
