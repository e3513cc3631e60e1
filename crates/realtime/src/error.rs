/// Failures that end, or refuse to begin, a voice session.
///
/// Per-tool failures never appear here; they travel back to the model as
/// result frames.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A voice session is already active")]
    AlreadyActive,
    #[error("Microphone unavailable: {0}")]
    Acquisition(String),
    #[error("Connection negotiation failed: {0}")]
    Negotiation(String),
    #[error("Session start was cancelled")]
    Cancelled,
}

impl SessionError {
    pub(crate) fn negotiation(err: anyhow::Error) -> Self {
        Self::Negotiation(format!("{err:#}"))
    }

    /// Whether this error tore down a session that had begun connecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Acquisition(_) | Self::Negotiation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::Acquisition("permission denied".into()).to_string(),
            "Microphone unavailable: permission denied"
        );
        let err = SessionError::negotiation(anyhow::anyhow!("status 401").context("signaling"));
        assert_eq!(
            err.to_string(),
            "Connection negotiation failed: signaling: status 401"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::Negotiation("x".into()).is_fatal());
        assert!(!SessionError::AlreadyActive.is_fatal());
        assert!(!SessionError::Cancelled.is_fatal());
    }
}
