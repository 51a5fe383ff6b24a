//! What the resolver connects to

use std::collections::BTreeMap;

use tobs_common::{labels, ResourceRef, SUPERUSER_CREDENTIAL_KEY, SUPERUSER_ROLE};

use crate::config::{DEFAULT_DATABASE, DEFAULT_DB_PORT};

/// A logical database target inside a release.
///
/// Immutable once built; use the `with_*` builders to derive variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    namespace: String,
    release: String,
    credential_key: String,
    database: String,
    remote_port: u16,
}

impl ConnectionTarget {
    /// Target the superuser on the default database of `release`
    pub fn new(namespace: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            release: release.into(),
            credential_key: SUPERUSER_CREDENTIAL_KEY.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            remote_port: DEFAULT_DB_PORT,
        }
    }

    /// Use the password stored under `key` in the credentials secret
    pub fn with_credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    /// Connect to `database`
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Port the database listens on inside the pod
    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn credential_key(&self) -> &str {
        &self.credential_key
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Database role the credential key authenticates as.
    ///
    /// The superuser key maps to the literal `postgres` role; every other key
    /// is the role name itself.
    pub fn role(&self) -> &str {
        role_for_key(&self.credential_key)
    }

    /// Secret record holding role passwords
    pub fn credentials_secret(&self) -> ResourceRef {
        ResourceRef::new(
            &self.namespace,
            tobs_common::credentials_secret_name(&self.release),
        )
    }

    /// Secret record holding an externally published URI
    pub fn uri_secret(&self) -> ResourceRef {
        ResourceRef::new(&self.namespace, tobs_common::db_uri_secret_name(&self.release))
    }

    /// Labels of the pods that can serve a tunnel
    pub fn database_labels(&self) -> BTreeMap<String, String> {
        labels::timescaledb_master_labels(&self.release)
    }

    /// Labels of the connector pod advertising the direct endpoint
    pub fn connector_labels(&self) -> BTreeMap<String, String> {
        labels::promscale_labels(&self.release)
    }
}

/// Map a credential key to the database role it belongs to
pub fn role_for_key(key: &str) -> &str {
    if key == SUPERUSER_CREDENTIAL_KEY {
        SUPERUSER_ROLE
    } else {
        key
    }
}
