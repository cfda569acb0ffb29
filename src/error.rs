use thiserror::Error;

/// The eight error kinds that the scheduling engine and agent orchestrator
/// surface. `ErrorKind` is serialized into `metrics.error_type` on
/// `ScheduleResponse` and into agent-facing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Infrastructure,
    Solver,
    Invariant,
    Dialog,
    Notification,
    Agent,
    SemanticVerification,
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("dialog error: {0}")]
    Dialog(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("agent error (recoverable={recoverable}): {message}")]
    Agent { message: String, recoverable: bool },

    #[error("semantic verification failed: {0}")]
    SemanticVerification(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Infrastructure(_) => ErrorKind::Infrastructure,
            Error::Solver(_) => ErrorKind::Solver,
            Error::Invariant(_) => ErrorKind::Invariant,
            Error::Dialog(_) => ErrorKind::Dialog,
            Error::Notification(_) => ErrorKind::Notification,
            Error::Agent { .. } => ErrorKind::Agent,
            Error::SemanticVerification(_) => ErrorKind::SemanticVerification,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Agent { recoverable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Infrastructure(format!("serialization error: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Infrastructure(format!("io error: {e}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Infrastructure(format!("sqlite error: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Infrastructure(format!("yaml error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            Error::Agent { message: "x".into(), recoverable: true }.kind(),
            ErrorKind::Agent
        );
    }

    #[test]
    fn test_agent_recoverable() {
        let recoverable = Error::Agent { message: "x".into(), recoverable: true };
        let fatal = Error::Agent { message: "x".into(), recoverable: false };
        assert!(recoverable.is_recoverable());
        assert!(!fatal.is_recoverable());
    }

    #[test]
    fn test_display() {
        let e = Error::Solver("infeasible".into());
        assert_eq!(e.to_string(), "solver error: infeasible");
    }

    #[test]
    fn test_result_alias() {
        let ok: Result<u32> = Ok(1);
        assert_eq!(ok.unwrap(), 1);
    }
}
