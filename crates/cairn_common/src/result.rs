//! The engine's internal error type.

/// An internal error indicating a violated engine invariant.
///
/// These errors should never occur during normal operation. If one does
/// occur, a node or the engine itself is misusing the graph API. Build
/// failures travel as the compute crate's own error type instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("internal engine error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = InternalError::new("promise dropped");
        assert_eq!(format!("{err}"), "internal engine error: promise dropped");
    }

    #[test]
    fn from_string() {
        let err: InternalError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
