//! Error types for the CLI

use tracing::error;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Broker(#[from] tobs_common::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// Stored and live credentials no longer agree
    pub fn is_fatal_inconsistency(&self) -> bool {
        matches!(self, Error::Broker(e) if e.is_fatal_inconsistency())
    }

    /// Log the error for the operator.
    ///
    /// A diverged rotation gets its own CRITICAL line ahead of the details.
    pub fn report(&self) {
        if self.is_fatal_inconsistency() {
            error!(
                "CRITICAL: the stored credential and the running workload disagree and the \
                 rollback did not complete; set the password manually before retrying"
            );
        }
        error!("{}", self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tobs_common::ResourceRef;

    #[test]
    fn compensation_failure_is_fatal() {
        let resource = ResourceRef::new("ns", "tobs-grafana");
        let apply = tobs_common::Error::apply_failed(&resource, "admin-password", "exit 1");
        let compensation = tobs_common::Error::internal("conflict");
        let err: Error =
            tobs_common::Error::compensation_failed(&resource, "admin-password", apply, compensation)
                .into();
        assert!(err.is_fatal_inconsistency());
    }

    #[test]
    fn apply_failure_is_not_fatal() {
        let resource = ResourceRef::new("ns", "tobs-grafana");
        let err: Error = tobs_common::Error::apply_failed(&resource, "admin-password", "exit 1").into();
        assert!(!err.is_fatal_inconsistency());
        assert!(!Error::validation("empty").is_fatal_inconsistency());
    }

    #[test]
    fn broker_errors_display_transparently() {
        let resource = ResourceRef::new("ns", "tobs-credentials");
        let inner = tobs_common::Error::resource_not_found(&resource);
        let expected = inner.to_string();
        let err: Error = inner.into();
        assert_eq!(err.to_string(), expected);
    }
}
