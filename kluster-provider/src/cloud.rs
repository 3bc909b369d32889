//! The boundary to cloud SDKs
//!
//! Every external resource type implements [`CloudResource`], and is reached through a
//! [`CloudApi`] offering the three calls the convergence loop needs. SDK errors are
//! flattened into [`CloudError`]; telling "not found" apart is left to each resource,
//! because clouds disagree on how they report it.
use async_trait::async_trait;
use http::StatusCode;
use std::fmt::Debug;

/// A failed cloud API call
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code} ({status}): {message}")]
pub struct CloudError {
    /// HTTP status of the response
    pub status: StatusCode,
    /// Provider specific error code, e.g. `ResourceGroupNotFound`
    pub code: String,
    /// Human readable message
    pub message: String,
}

impl CloudError {
    /// Error from its parts
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Where a resource stands according to its cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// Terminal success
    Succeeded,
    /// Creating, updating, or in a state we do not know
    InProgress,
    /// Removal in progress
    Deleting,
    /// Terminal failure, with the reported reason
    Failed(String),
}

/// One kind of external resource
pub trait CloudResource: Send + Sync + 'static {
    /// Kind used in messages, e.g. `ResourceGroup`
    const KIND: &'static str;

    /// Desired state sent on create
    type Spec: Clone + Debug + Send + Sync + 'static;

    /// Observed state returned by a lookup
    type Status: Clone + Debug + Send + Sync + 'static;

    /// Raw provisioning state, for status messages
    fn state(status: &Self::Status) -> &str;

    /// Map the provisioning state onto a [`Convergence`]
    fn classify(status: &Self::Status) -> Convergence;

    /// Whether `err` means the resource does not exist
    fn is_not_found(err: &CloudError) -> bool {
        err.status == StatusCode::NOT_FOUND
    }

    /// Why the resource cannot be created yet, if it cannot
    fn precondition(_spec: &Self::Spec) -> Option<String> {
        None
    }
}

/// The calls a cloud SDK offers for one resource type
///
/// Resources are addressed by their deterministic external name.
#[async_trait]
pub trait CloudApi<R: CloudResource>: Send + Sync {
    /// Look the resource up
    async fn get(&self, name: &str) -> Result<R::Status, CloudError>;

    /// Create the resource, or update it to `spec`; accepted is not ready
    async fn create_or_update(&self, name: &str, spec: &R::Spec) -> Result<(), CloudError>;

    /// Start removing the resource
    async fn delete(&self, name: &str) -> Result<(), CloudError>;
}
