//! Common types for tobs: errors, resource naming and Kubernetes helpers

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod labels;

pub use error::{Error, ErrorKind};

use std::fmt;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Helm release name used when none is configured
pub const DEFAULT_RELEASE_NAME: &str = "tobs";

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Secret key holding the database superuser password
pub const SUPERUSER_CREDENTIAL_KEY: &str = "PATRONI_SUPERUSER_PASSWORD";

/// Database role the superuser credential key maps to
pub const SUPERUSER_ROLE: &str = "postgres";

/// Key inside the published URI secret that holds the full connection URI
pub const DB_URI_KEY: &str = "db-uri";

/// Key inside the Grafana secret that holds the admin password
pub const GRAFANA_ADMIN_PASSWORD_KEY: &str = "admin-password";

/// Name of the secret holding database role passwords
pub fn credentials_secret_name(release: &str) -> String {
    format!("{}-credentials", release)
}

/// Name of the secret holding an externally provisioned connection URI
pub fn db_uri_secret_name(release: &str) -> String {
    format!("{}-timescaledb-uri", release)
}

/// Name of the secret holding the Grafana admin credentials
pub fn grafana_secret_name(release: &str) -> String {
    format!("{}-grafana", release)
}

/// Name of the secret holding the TimescaleDB TLS certificate
pub fn certificate_secret_name(release: &str) -> String {
    format!("{}-certificate", release)
}

/// Name of the secret holding the pgBackRest configuration
pub fn pgbackrest_secret_name(release: &str) -> String {
    format!("{}-pgbackrest", release)
}

/// Identity of a namespaced secret record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Namespace the record lives in
    pub namespace: String,
    /// Name of the record
    pub name: String,
}

impl ResourceRef {
    /// Create a reference to `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_names_derive_from_release() {
        assert_eq!(credentials_secret_name("obs"), "obs-credentials");
        assert_eq!(db_uri_secret_name("obs"), "obs-timescaledb-uri");
        assert_eq!(grafana_secret_name("obs"), "obs-grafana");
        assert_eq!(certificate_secret_name("obs"), "obs-certificate");
        assert_eq!(pgbackrest_secret_name("obs"), "obs-pgbackrest");
    }

    #[test]
    fn resource_ref_displays_as_path() {
        let resource = ResourceRef::new("monitoring", "db-creds");
        assert_eq!(resource.to_string(), "monitoring/db-creds");
    }
}
