use thiserror::Error;

/// Failure while handling a signal or loading engine state.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Persisted pair state failed validation at startup.
    #[error("persisted pair state is corrupt: {0}")]
    CorruptState(String),

    /// Persisted pair state could not be read at startup.
    #[error("pair state could not be loaded: {0:#}")]
    StateUnavailable(anyhow::Error),

    /// Broker or in-memory state no longer matches the engine's model.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// A broker call failed; only the current signal is affected.
    #[error("broker call failed: {0:#}")]
    Broker(anyhow::Error),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),
}

impl EngineError {
    /// Fatal errors mean the process must stop handling signals.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::CorruptState(_)
                | EngineError::StateUnavailable(_)
                | EngineError::Consistency(_)
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(EngineError::CorruptState("x".into()).is_fatal());
        assert!(EngineError::Consistency("x".into()).is_fatal());
        assert!(!EngineError::Broker(anyhow::anyhow!("timeout")).is_fatal());
        assert!(!EngineError::InvalidSignal("x".into()).is_fatal());
    }

    #[test]
    fn test_broker_error_keeps_context_chain() {
        let err = EngineError::Broker(anyhow::anyhow!("503").context("GET /trades failed"));
        assert_eq!(err.to_string(), "broker call failed: GET /trades failed: 503");
    }
}
