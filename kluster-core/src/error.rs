use thiserror::Error;

/// Possible errors when resolving plans and reading parameters
///
/// All of these are validation errors: they describe a cluster whose
/// desired configuration cannot be turned into components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested plan is not offered by the provider
    #[error("unknown plan {plan:?} for provider {provider:?}")]
    UnknownPlan {
        /// Provider type the plan was looked up in
        provider: String,
        /// Requested plan name
        plan: String,
    },

    /// `spec.config` overrides a parameter the plan policy keeps fixed
    #[error("parameter {0:?} is not editable")]
    NotEditable(String),

    /// A parameter the provider requires is absent
    #[error("missing parameter {0:?}")]
    MissingParameter(String),

    /// A parameter is present but does not parse into the expected type
    #[error("invalid parameter {key:?}: {reason}")]
    InvalidParameter {
        /// Parameter name
        key: String,
        /// Parser message
        reason: String,
    },

    /// The object lacks a field needed to derive an external name
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),
}
