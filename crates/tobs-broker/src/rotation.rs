//! Credential rotation with compensating rollback
//!
//! A rotation runs in two phases. Phase one persists the new value. Phase two
//! applies it to the live service. If phase two fails, the previous value is
//! written back; if that write fails too, stored and live credentials have
//! diverged and the caller gets [`Error::CompensationFailed`].
//!
//! Rotations of the same key are not serialized. Callers that may rotate one
//! credential concurrently must order those calls themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use tobs_common::{labels, Error, ErrorKind, ResourceRef, Result};

use crate::exec::RemoteExec;
use crate::secrets::SecretStore;
use crate::target::role_for_key;
use crate::workload::{first_instance, WorkloadQuery};

/// Container running Grafana in the Grafana pod
pub const GRAFANA_CONTAINER: &str = "grafana";
/// Container running PostgreSQL in the database pod
pub const TIMESCALEDB_CONTAINER: &str = "timescaledb";

/// Pushes a credential to the live service that consumes it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialApplier: Send + Sync {
    /// Make the live service accept `value` for `key`
    async fn apply(&self, resource: &ResourceRef, key: &str, value: &[u8]) -> Result<()>;
}

/// Administrative command that sets a password on a live service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyCommand {
    /// `grafana-cli admin reset-admin-password`
    GrafanaAdminPassword,
    /// `ALTER USER ... WITH PASSWORD` through psql as the superuser
    DatabaseRolePassword,
}

impl ApplyCommand {
    /// Argument vector setting `password` for the role behind `key`
    pub fn argv(&self, key: &str, password: &str) -> Vec<String> {
        match self {
            ApplyCommand::GrafanaAdminPassword => vec![
                "grafana-cli".to_string(),
                "admin".to_string(),
                "reset-admin-password".to_string(),
                password.to_string(),
            ],
            ApplyCommand::DatabaseRolePassword => vec![
                "psql".to_string(),
                "-U".to_string(),
                tobs_common::SUPERUSER_ROLE.to_string(),
                "-c".to_string(),
                format!(
                    "ALTER USER {} WITH PASSWORD {}",
                    quote_ident(role_for_key(key)),
                    quote_literal(password)
                ),
            ],
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

/// [`CredentialApplier`] that runs an administrative command in a pod.
#[derive(Clone)]
pub struct ExecApplier {
    workloads: Arc<dyn WorkloadQuery>,
    exec: Arc<dyn RemoteExec>,
    labels: BTreeMap<String, String>,
    container: String,
    command: ApplyCommand,
}

impl ExecApplier {
    pub fn new(
        workloads: Arc<dyn WorkloadQuery>,
        exec: Arc<dyn RemoteExec>,
        labels: BTreeMap<String, String>,
        container: impl Into<String>,
        command: ApplyCommand,
    ) -> Self {
        Self {
            workloads,
            exec,
            labels,
            container: container.into(),
            command,
        }
    }

    /// Reset the Grafana admin password of `release`
    pub fn grafana(
        release: &str,
        workloads: Arc<dyn WorkloadQuery>,
        exec: Arc<dyn RemoteExec>,
    ) -> Self {
        Self::new(
            workloads,
            exec,
            labels::grafana_labels(release),
            GRAFANA_CONTAINER,
            ApplyCommand::GrafanaAdminPassword,
        )
    }

    /// Alter a role password on the primary database of `release`
    pub fn database(
        release: &str,
        workloads: Arc<dyn WorkloadQuery>,
        exec: Arc<dyn RemoteExec>,
    ) -> Self {
        Self::new(
            workloads,
            exec,
            labels::timescaledb_master_labels(release),
            TIMESCALEDB_CONTAINER,
            ApplyCommand::DatabaseRolePassword,
        )
    }
}

#[async_trait]
impl CredentialApplier for ExecApplier {
    async fn apply(&self, resource: &ResourceRef, key: &str, value: &[u8]) -> Result<()> {
        let password = std::str::from_utf8(value)
            .map_err(|_| Error::invalid_credential(resource, key, "value is not valid UTF-8"))?;

        let instance = first_instance(self.workloads.as_ref(), &resource.namespace, &self.labels)
            .await?;
        let argv = self.command.argv(key, password);

        self.exec
            .exec(&resource.namespace, &instance, &self.container, &argv)
            .await
    }
}

/// One in-flight rotation; never outlives the call
#[derive(Clone, PartialEq, Eq)]
pub struct RotationAttempt {
    pub resource: ResourceRef,
    pub key: String,
    pub old_value: Vec<u8>,
    pub new_value: Vec<u8>,
}

impl std::fmt::Debug for RotationAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationAttempt")
            .field("resource", &self.resource)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// How a rotation that got past phase one ended
#[derive(Debug)]
pub enum RotationOutcome {
    /// Stored and live values both equal the new value
    Applied,
    /// Apply failed; the old value is stored again
    RolledBack { apply: Error },
    /// Apply failed and so did restoring the old value
    Diverged { apply: Error, compensation: Error },
}

impl RotationOutcome {
    /// Collapse into the error the caller sees
    pub fn into_result(self, attempt: &RotationAttempt) -> Result<()> {
        match self {
            RotationOutcome::Applied => Ok(()),
            RotationOutcome::RolledBack { apply } => Err(apply_error(attempt, apply)),
            RotationOutcome::Diverged {
                apply,
                compensation,
            } => Err(Error::compensation_failed(
                &attempt.resource,
                &attempt.key,
                apply_error(attempt, apply),
                compensation,
            )),
        }
    }
}

fn apply_error(attempt: &RotationAttempt, err: Error) -> Error {
    if err.kind() == ErrorKind::ApplyFailed {
        err
    } else {
        Error::apply_failed(&attempt.resource, &attempt.key, err.to_string())
    }
}

/// Rotates stored credentials and applies them to live services.
#[derive(Clone)]
pub struct RotationCoordinator {
    secrets: Arc<dyn SecretStore>,
    applier: Arc<dyn CredentialApplier>,
}

impl RotationCoordinator {
    pub fn new(secrets: Arc<dyn SecretStore>, applier: Arc<dyn CredentialApplier>) -> Self {
        Self { secrets, applier }
    }

    /// Replace `key` in `resource` with `new_value` and apply it.
    ///
    /// Nothing is written if the record or key is missing. Once the new value
    /// is stored, every exit either leaves it stored and applied, restores the
    /// previous value, or returns `CompensationFailed`.
    #[instrument(skip(self, resource, new_value), fields(resource = %resource))]
    pub async fn rotate(&self, resource: &ResourceRef, key: &str, new_value: &[u8]) -> Result<()> {
        let mut record = self
            .secrets
            .get(&resource.namespace, &resource.name)
            .await?
            .ok_or_else(|| Error::resource_not_found(resource))?;

        let old_value = record
            .get(key)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::credential_not_found(resource, key))?;

        let attempt = RotationAttempt {
            resource: resource.clone(),
            key: key.to_string(),
            old_value,
            new_value: new_value.to_vec(),
        };

        record.insert(key, new_value);
        self.secrets.put(&resource.namespace, &record).await?;
        info!(key = %key, "Stored new credential");

        let outcome = self.apply_or_compensate(&attempt).await;
        outcome.into_result(&attempt)
    }

    /// Phase two, run after the new value is stored
    async fn apply_or_compensate(&self, attempt: &RotationAttempt) -> RotationOutcome {
        let apply = match self
            .applier
            .apply(&attempt.resource, &attempt.key, &attempt.new_value)
            .await
        {
            Ok(()) => {
                info!(key = %attempt.key, "Applied new credential to live service");
                return RotationOutcome::Applied;
            }
            Err(e) => e,
        };

        warn!(
            key = %attempt.key,
            error = %apply,
            "Applying credential failed, restoring previous value"
        );

        match self.compensate(attempt).await {
            Ok(()) => {
                info!(key = %attempt.key, "Previous credential restored");
                RotationOutcome::RolledBack { apply }
            }
            Err(compensation) => {
                error!(
                    resource = %attempt.resource,
                    key = %attempt.key,
                    apply_error = %apply,
                    compensation_error = %compensation,
                    "CRITICAL: stored credential no longer matches the live service"
                );
                RotationOutcome::Diverged {
                    apply,
                    compensation,
                }
            }
        }
    }

    /// Write the old value back. Not retried.
    async fn compensate(&self, attempt: &RotationAttempt) -> Result<()> {
        let resource = &attempt.resource;
        let mut record = self
            .secrets
            .get(&resource.namespace, &resource.name)
            .await?
            .ok_or_else(|| Error::resource_not_found(resource))?;
        record.insert(attempt.key.as_str(), attempt.old_value.clone());
        self.secrets.put(&resource.namespace, &record).await
    }
}
