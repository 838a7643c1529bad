//! Error type shared by every waiter of a node.

use std::sync::Arc;

use cairn_common::InternalError;
use tokio_util::sync::CancellationToken;

/// Why a node did not produce a value.
///
/// Errors are `Clone` so that a single failure can be handed, unchanged, to
/// every waiter of a promise and to every dependent node.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComputeError {
    /// The computation, or the wait for it, was cancelled.
    #[error("computation cancelled")]
    Cancelled,

    /// A node's compute returned an error.
    #[error("{action}: {cause:#}")]
    Failed {
        /// Label of the failing action.
        action: String,
        /// Labels of the actions that led to the failing one, outermost first.
        chain: Vec<String>,
        /// The error returned by compute.
        cause: Arc<anyhow::Error>,
    },

    /// A node's input manifest could not be built or digested.
    #[error("{action}: invalid inputs: {reason}")]
    Inputs {
        /// Label of the action whose inputs are invalid.
        action: String,
        /// What went wrong.
        reason: String,
    },

    /// A node's compute panicked.
    #[error("{action}: compute panicked: {message}")]
    Panicked {
        /// Label of the panicking action.
        action: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// An engine invariant was violated.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl ComputeError {
    /// Returns `true` if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComputeError::Cancelled)
    }

    /// The label of the action the error originated in, if known.
    pub fn action(&self) -> Option<&str> {
        match self {
            ComputeError::Failed { action, .. }
            | ComputeError::Inputs { action, .. }
            | ComputeError::Panicked { action, .. } => Some(action),
            ComputeError::Cancelled | ComputeError::Internal(_) => None,
        }
    }

    /// Classifies an error returned by a node's compute.
    ///
    /// Errors that already are a [`ComputeError`] (typically a dependency
    /// failure forwarded with `?`) pass through unchanged. Anything else
    /// becomes [`ComputeError::Cancelled`] if the run was cancelled, and
    /// [`ComputeError::Failed`] otherwise.
    pub(crate) fn from_compute(
        err: anyhow::Error,
        action: &str,
        chain: &[String],
        cancel: &CancellationToken,
    ) -> Self {
        if let Some(inner) = err.downcast_ref::<ComputeError>() {
            return inner.clone();
        }
        if cancel.is_cancelled() {
            return ComputeError::Cancelled;
        }
        ComputeError::Failed {
            action: action.to_string(),
            chain: chain.to_vec(),
            cause: Arc::new(err),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ComputeError::Internal(InternalError::new(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_failed() {
        let err = ComputeError::Failed {
            action: "go.build".to_string(),
            chain: vec!["deploy".to_string(), "go.build".to_string()],
            cause: Arc::new(anyhow::anyhow!("exit status 2")),
        };
        assert_eq!(format!("{err}"), "go.build: exit status 2");
        assert_eq!(err.action(), Some("go.build"));
    }

    #[test]
    fn display_inputs_and_panicked() {
        let err = ComputeError::Inputs {
            action: "fetch".to_string(),
            reason: "bad json".to_string(),
        };
        assert_eq!(format!("{err}"), "fetch: invalid inputs: bad json");

        let err = ComputeError::Panicked {
            action: "fetch".to_string(),
            message: "oops".to_string(),
        };
        assert_eq!(format!("{err}"), "fetch: compute panicked: oops");
    }

    #[test]
    fn display_internal_is_transparent() {
        let err = ComputeError::internal("promise dropped");
        assert_eq!(format!("{err}"), "internal engine error: promise dropped");
        assert!(err.action().is_none());
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(ComputeError::Cancelled.is_cancelled());
        assert!(!ComputeError::internal("x").is_cancelled());
    }

    #[test]
    fn from_compute_passes_compute_errors_through() {
        let token = CancellationToken::new();
        let original = ComputeError::Inputs {
            action: "dep".to_string(),
            reason: "r".to_string(),
        };
        let wrapped = anyhow::Error::new(original.clone());
        let err = ComputeError::from_compute(wrapped, "parent", &[], &token);
        assert_eq!(err.to_string(), original.to_string());
    }

    #[test]
    fn from_compute_cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let err = ComputeError::from_compute(anyhow::anyhow!("io"), "a", &[], &token);
        assert!(err.is_cancelled());
    }

    #[test]
    fn from_compute_wraps_other_errors() {
        let token = CancellationToken::new();
        let chain = vec!["root".to_string(), "a".to_string()];
        match ComputeError::from_compute(anyhow::anyhow!("boom"), "a", &chain, &token) {
            ComputeError::Failed {
                action,
                chain: got,
                cause,
            } => {
                assert_eq!(action, "a");
                assert_eq!(got, chain);
                assert_eq!(cause.to_string(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
