//! Per-component status records written back onto the owner
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a component stands after the pass that touched it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ComponentState {
    /// Converged, nothing left to do
    Ok,
    /// Still converging, the pass asked for a requeue
    Pending,
    /// Not attempted because a dependency (or dependent, when deleting) is unfinished
    Blocked,
    /// The last attempt failed, see the message
    Error,
    /// Removal was requested and is in progress
    Deleting,
    /// The external resource is gone
    Deleted,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Ok => "Ok",
            ComponentState::Pending => "Pending",
            ComponentState::Blocked => "Blocked",
            ComponentState::Error => "Error",
            ComponentState::Deleting => "Deleting",
            ComponentState::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// One entry of `status.components`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ComponentStatus {
    /// Display name of the component
    pub name: String,
    /// State reached during the last pass
    pub status: ComponentState,
    /// Free-form detail, the wrapped error text when `status` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentStatus {
    /// A record without a message
    pub fn new(name: impl Into<String>, status: ComponentState) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
        }
    }

    /// Attach a message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
