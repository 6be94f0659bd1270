//! Error taxonomy shared by every kernel service.

use thiserror::Error;

/// Errors surfaced by the kernel and its services.
///
/// Access denials are deliberately absent: a failed RBAC check is a
/// structured result (`RunOutcome::Denied`), not an error.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Invalid construction parameters. Raised before any component exists.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A lookup that must fail loudly (unknown agent, unknown workflow).
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A registered completion handler failed. The handler's error is passed
    /// through untouched.
    #[error(transparent)]
    Provider(anyhow::Error),

    /// A cancellable completion was aborted before the provider answered.
    #[error("completion on provider '{provider}' was cancelled")]
    Cancelled { provider: String },

    /// A workflow prompt template referenced a variable that was not supplied.
    #[error("template error: {0}")]
    Template(String),

    /// A queued task's payload cannot be executed.
    #[error("invalid task payload: {0}")]
    InvalidTask(String),

    /// The submitter of a task lost its result channel.
    #[error("task '{0}' was dropped before completion")]
    Dispatch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KernelError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_transparent() {
        let err = KernelError::Provider(anyhow::anyhow!("backend offline"));
        assert_eq!(err.to_string(), "backend offline");
    }

    #[test]
    fn test_not_found_message() {
        let err = KernelError::not_found("workflow", "nightly");
        assert_eq!(err.to_string(), "workflow 'nightly' not found");
    }
}
