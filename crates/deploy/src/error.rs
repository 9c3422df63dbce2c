//! Error taxonomy for planning and running a deployment.

use std::time::Duration;

use crate::ledger::StepStatus;

/// Errors surfaced by the planning, orchestration and wiring phases.
///
/// Configuration errors are raised before any network call is made. Step errors halt the
/// run but leave the ledger intact so a later run can resume.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("unknown component `{name}` referenced by {referenced_by}")]
    UnknownComponent { name: String, referenced_by: String },

    #[error("component `{0}` is declared more than once")]
    DuplicateComponent(String),

    #[error("artifact `{0}` not found")]
    ArtifactNotFound(String),

    #[error("invalid artifact `{name}`: {reason}")]
    InvalidArtifact { name: String, reason: String },

    #[error("artifact `{artifact}` needs library `{library}` but no link dependency provides it")]
    UnlinkedLibrary { artifact: String, library: String },

    #[error(
        "proxied component `{0}` links external libraries; set `unsafe_allow_linking` to allow it"
    )]
    UnsafeLinking(String),

    #[error("invalid arguments for `{component}`: {reason}")]
    InvalidArguments { component: String, reason: String },

    #[error("failed to submit `{component}`: {reason}")]
    Submission { component: String, reason: String },

    #[error("timed out after {timeout:?} waiting for `{component}` to be confirmed")]
    ConfirmationTimeout { component: String, timeout: Duration },

    #[error("confirmation failed for `{component}`: {reason}")]
    ConfirmationFailed { component: String, reason: String },

    #[error("wiring `{edge}` failed: {reason}")]
    WiringFailed { edge: String, reason: String },

    #[error("timed out after {timeout:?} waiting for wiring `{edge}` to be confirmed")]
    WiringTimeout { edge: String, timeout: Duration },

    #[error("address of `{0}` is not confirmed in the ledger")]
    UnresolvedAddress(String),

    #[error("ledger entry for `{component}` cannot move from {from} to {to}")]
    InvalidTransition {
        component: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("`{0}` already has a submission in flight")]
    ConcurrentSubmission(String),

    #[error("deployment cancelled")]
    Cancelled,

    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

impl DeployError {
    /// Whether this error was raised while validating the configuration, before any
    /// transaction could have been sent.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. }
                | Self::UnknownComponent { .. }
                | Self::DuplicateComponent(_)
                | Self::ArtifactNotFound(_)
                | Self::InvalidArtifact { .. }
                | Self::UnlinkedLibrary { .. }
                | Self::UnsafeLinking(_)
                | Self::InvalidArguments { .. }
        )
    }

    /// The component a step-level error refers to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Submission { component, .. }
            | Self::ConfirmationTimeout { component, .. }
            | Self::ConfirmationFailed { component, .. }
            | Self::InvalidArguments { component, .. }
            | Self::InvalidTransition { component, .. } => Some(component),
            Self::UnresolvedAddress(name)
            | Self::ConcurrentSubmission(name)
            | Self::UnsafeLinking(name)
            | Self::DuplicateComponent(name) => Some(name),
            _ => None,
        }
    }
}
