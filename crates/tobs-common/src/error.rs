//! Error types for the tobs database access broker
//!
//! Every variant carries the identity of the resource involved and, where it
//! matters, the operation that was attempted, so callers can log or display
//! the failure without extra bookkeeping. Nothing in the broker retries these
//! errors; retry policy belongs to the caller.

use thiserror::Error;

use crate::ResourceRef;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for tobs operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// No running workload instance matched the selector
    #[error("no running instance in namespace {namespace} matches {selector}")]
    TargetNotFound {
        /// Namespace that was searched
        namespace: String,
        /// Label selector (or pod name) that matched nothing
        selector: String,
    },

    /// The forwarding session into a pod could not be established
    #[error("tunnel to {namespace}/{instance}:{remote_port} could not be established: {message}")]
    TunnelSetupFailed {
        /// Namespace of the target pod
        namespace: String,
        /// Target pod name
        instance: String,
        /// Port on the pod
        remote_port: u16,
        /// Description of what failed
        message: String,
    },

    /// The secret record exists but does not hold the requested key
    #[error("key {key} not found in secret {resource}")]
    CredentialNotFound {
        /// Secret record that was read
        resource: ResourceRef,
        /// Missing key
        key: String,
    },

    /// The secret record itself does not exist
    #[error("secret {resource} not found")]
    ResourceNotFound {
        /// Secret record that was requested
        resource: ResourceRef,
    },

    /// A stored credential could not be interpreted
    #[error("credential {key} in secret {resource} is invalid: {message}")]
    InvalidCredential {
        /// Secret record that was read
        resource: ResourceRef,
        /// Offending key
        key: String,
        /// Description of what is wrong
        message: String,
    },

    /// A connection URI could not be parsed or rebuilt
    #[error("invalid connection uri: {message}")]
    InvalidUri {
        /// Description of what is wrong
        message: String,
    },

    /// A command run inside a pod failed or could not be started
    #[error("exec in {namespace}/{instance} (container {container}) failed: {message}")]
    Exec {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        instance: String,
        /// Container the command ran in
        container: String,
        /// Description of what failed
        message: String,
    },

    /// The live service rejected a new credential or could not be reached
    #[error("applying {key} from {resource} to the live service failed: {message}")]
    ApplyFailed {
        /// Secret record being rotated
        resource: ResourceRef,
        /// Key being rotated
        key: String,
        /// Description of what failed
        message: String,
    },

    /// Restoring the previous credential after a failed apply also failed.
    ///
    /// Storage now holds the new value while the live service still uses the
    /// old one. No further automated recovery is attempted.
    #[error(
        "CRITICAL: stored credential {key} in {resource} no longer matches the live service; \
         {apply}; restoring the previous value also failed: {compensation}"
    )]
    CompensationFailed {
        /// Secret record being rotated
        resource: ResourceRef,
        /// Key being rotated
        key: String,
        /// The apply failure that triggered compensation (always `ApplyFailed`)
        apply: Box<Error>,
        /// The failure of the compensating write
        compensation: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

/// Discriminant of [`Error`] for matching without destructuring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// [`Error::Kube`]
    Kube,
    /// [`Error::TargetNotFound`]
    TargetNotFound,
    /// [`Error::TunnelSetupFailed`]
    TunnelSetupFailed,
    /// [`Error::CredentialNotFound`]
    CredentialNotFound,
    /// [`Error::ResourceNotFound`]
    ResourceNotFound,
    /// [`Error::InvalidCredential`]
    InvalidCredential,
    /// [`Error::InvalidUri`]
    InvalidUri,
    /// [`Error::Exec`]
    Exec,
    /// [`Error::ApplyFailed`]
    ApplyFailed,
    /// [`Error::CompensationFailed`]
    CompensationFailed,
    /// [`Error::Internal`]
    Internal,
}

impl Error {
    /// Create a target-not-found error
    pub fn target_not_found(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::TargetNotFound {
            namespace: namespace.into(),
            selector: selector.into(),
        }
    }

    /// Create a tunnel setup error
    pub fn tunnel_setup(
        namespace: impl Into<String>,
        instance: impl Into<String>,
        remote_port: u16,
        msg: impl Into<String>,
    ) -> Self {
        Self::TunnelSetupFailed {
            namespace: namespace.into(),
            instance: instance.into(),
            remote_port,
            message: msg.into(),
        }
    }

    /// Create a credential-not-found error
    pub fn credential_not_found(resource: &ResourceRef, key: impl Into<String>) -> Self {
        Self::CredentialNotFound {
            resource: resource.clone(),
            key: key.into(),
        }
    }

    /// Create a resource-not-found error
    pub fn resource_not_found(resource: &ResourceRef) -> Self {
        Self::ResourceNotFound {
            resource: resource.clone(),
        }
    }

    /// Create an invalid credential error
    pub fn invalid_credential(
        resource: &ResourceRef,
        key: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidCredential {
            resource: resource.clone(),
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid URI error
    pub fn invalid_uri(msg: impl Into<String>) -> Self {
        Self::InvalidUri {
            message: msg.into(),
        }
    }

    /// Create an exec error
    pub fn exec(
        namespace: impl Into<String>,
        instance: impl Into<String>,
        container: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Exec {
            namespace: namespace.into(),
            instance: instance.into(),
            container: container.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error for a rotation of `key` in `resource`
    pub fn apply_failed(
        resource: &ResourceRef,
        key: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ApplyFailed {
            resource: resource.clone(),
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a compensation error pairing the triggering apply failure with
    /// the failure of the compensating write
    pub fn compensation_failed(
        resource: &ResourceRef,
        key: impl Into<String>,
        apply: Error,
        compensation: Error,
    ) -> Self {
        Self::CompensationFailed {
            resource: resource.clone(),
            key: key.into(),
            apply: Box::new(apply),
            compensation: Box::new(compensation),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { .. } => ErrorKind::Kube,
            Error::TargetNotFound { .. } => ErrorKind::TargetNotFound,
            Error::TunnelSetupFailed { .. } => ErrorKind::TunnelSetupFailed,
            Error::CredentialNotFound { .. } => ErrorKind::CredentialNotFound,
            Error::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            Error::InvalidCredential { .. } => ErrorKind::InvalidCredential,
            Error::InvalidUri { .. } => ErrorKind::InvalidUri,
            Error::Exec { .. } => ErrorKind::Exec,
            Error::ApplyFailed { .. } => ErrorKind::ApplyFailed,
            Error::CompensationFailed { .. } => ErrorKind::CompensationFailed,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Every failure kind reported by this error.
    ///
    /// A compensation failure reports itself together with the apply failure
    /// that triggered it.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self {
            Error::CompensationFailed { apply, .. } => {
                let mut kinds = vec![ErrorKind::CompensationFailed];
                kinds.extend(apply.kinds());
                kinds
            }
            other => vec![other.kind()],
        }
    }

    /// True when stored and live credentials are known to have diverged
    pub fn is_fatal_inconsistency(&self) -> bool {
        matches!(self, Error::CompensationFailed { .. })
    }

    /// The secret record this error refers to, if any
    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            Error::CredentialNotFound { resource, .. }
            | Error::ResourceNotFound { resource }
            | Error::InvalidCredential { resource, .. }
            | Error::ApplyFailed { resource, .. }
            | Error::CompensationFailed { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
