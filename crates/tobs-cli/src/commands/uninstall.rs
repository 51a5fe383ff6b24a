//! Uninstall command - Remove a tobs release and what Helm leaves behind
//!
//! Usage: tobs uninstall [--delete-data]
//!
//! Steps:
//! 1. Read whether backups were enabled from the release values
//! 2. `helm uninstall` the release
//! 3. Delete the TimescaleDB secrets created outside the chart
//! 4. Wait for the release's pods to terminate
//! 5. Delete the Patroni config service and endpoints
//! 6. With `--delete-data`, delete the release's persistent volume claims

use std::process::Stdio;
use std::time::Duration;

use clap::Args;
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::{Api, ListParams};
use kube::Client;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use tobs_common::kube_utils::delete_if_exists;
use tobs_common::labels::{release_labels, selector};

use super::{wait_for_deletion, CommandContext};
use crate::{Error, Result};

const HELM: &str = "helm";

/// Values path of the TimescaleDB backup switch
const BACKUP_ENABLED_PATH: [&str; 3] = ["timescaledb-single", "backup", "enabled"];

const POD_DELETION_TIMEOUT: Duration = Duration::from_secs(100);
const POD_DELETION_INTERVAL: Duration = Duration::from_millis(100);

/// Uninstall the release
#[derive(Args, Debug, Default)]
pub struct UninstallArgs {
    /// Also delete the persistent volume claims holding TimescaleDB and Prometheus data
    #[arg(long)]
    pub delete_data: bool,
}

pub async fn run(ctx: &CommandContext, args: UninstallArgs) -> Result<()> {
    let backup_enabled = read_backup_enabled(ctx).await?;

    info!(release = %ctx.release, namespace = %ctx.namespace, "Uninstalling release");
    helm(&uninstall_args(&ctx.release, &ctx.namespace)).await?;

    let client = ctx.client().await?;
    delete_secrets(&client, ctx, backup_enabled).await?;
    wait_for_pods(&client, ctx).await?;
    delete_patroni_objects(&client, ctx).await;

    if args.delete_data {
        delete_volume_claims(&client, ctx).await?;
    } else {
        info!("Data still remains. To delete it, run `tobs uninstall --delete-data`");
    }

    info!(release = %ctx.release, "Release uninstalled");
    Ok(())
}

/// Arguments for `helm uninstall`; the default namespace is left implicit
pub fn uninstall_args(release: &str, namespace: &str) -> Vec<String> {
    let mut args = vec!["uninstall".to_string(), release.to_string()];
    if namespace != tobs_common::DEFAULT_NAMESPACE {
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
    }
    args
}

/// Arguments for reading the computed values of a release as JSON
pub fn get_values_args(release: &str, namespace: &str) -> Vec<String> {
    ["get", "values", release, "-a", "--namespace", namespace, "-o", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Backup switch from release values.
///
/// A missing path reads as disabled; a non-boolean value is an error.
pub fn backup_enabled(values: &Value) -> Result<bool> {
    match backup_value(values) {
        None => Ok(false),
        Some(Value::Bool(enabled)) => Ok(*enabled),
        Some(other) => Err(Error::validation(format!(
            "expected a boolean at {}, found {}",
            BACKUP_ENABLED_PATH.join("."),
            other
        ))),
    }
}

fn backup_value(values: &Value) -> Option<&Value> {
    BACKUP_ENABLED_PATH
        .iter()
        .try_fold(values, |node, key| node.get(key))
}

async fn read_backup_enabled(ctx: &CommandContext) -> Result<bool> {
    let output = helm_output(&get_values_args(&ctx.release, &ctx.namespace)).await?;
    let values: Value = serde_json::from_slice(&output)?;
    if backup_value(&values).is_none() {
        warn!(
            "{} not set in release values, assuming backups are disabled",
            BACKUP_ENABLED_PATH.join(".")
        );
    }
    backup_enabled(&values)
}

/// Run helm with output passed through to the terminal
async fn helm(args: &[String]) -> Result<()> {
    debug!(args = ?args, "Running helm");
    let status = Command::new(HELM)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::command_failed(format!("failed to run {}: {}", HELM, e)))?;

    if !status.success() {
        return Err(Error::command_failed(format!(
            "{} {} failed: {}",
            HELM,
            args.join(" "),
            status
        )));
    }
    Ok(())
}

/// Run helm and capture stdout
async fn helm_output(args: &[String]) -> Result<Vec<u8>> {
    debug!(args = ?args, "Running helm");
    let output = Command::new(HELM)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::command_failed(format!("failed to run {}: {}", HELM, e)))?;

    if !output.status.success() {
        return Err(Error::command_failed(format!(
            "{} {} failed: {}",
            HELM,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// Secrets the release's TimescaleDB relies on
pub fn secret_names(release: &str, backup_enabled: bool) -> Vec<String> {
    let mut names = vec![
        tobs_common::credentials_secret_name(release),
        tobs_common::certificate_secret_name(release),
        tobs_common::db_uri_secret_name(release),
    ];
    if backup_enabled {
        names.push(tobs_common::pgbackrest_secret_name(release));
    }
    names
}

async fn delete_secrets(client: &Client, ctx: &CommandContext, backup_enabled: bool) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &ctx.namespace);
    for name in secret_names(&ctx.release, backup_enabled) {
        if delete_if_exists(&api, &name).await? {
            info!(secret = %name, "Deleted secret");
        }
    }
    Ok(())
}

async fn wait_for_pods(client: &Client, ctx: &CommandContext) -> Result<()> {
    let api: Api<Pod> = Api::namespaced(client.clone(), &ctx.namespace);
    let params = ListParams::default().labels(&selector(&release_labels(&ctx.release)));

    info!("Waiting for release pods to terminate");
    wait_for_deletion(
        POD_DELETION_TIMEOUT,
        POD_DELETION_INTERVAL,
        "release pods",
        || {
            let api = api.clone();
            let params = params.clone();
            async move {
                api.list(&params)
                    .await
                    .map(|pods| !pods.items.is_empty())
                    .map_err(|e| e.to_string())
            }
        },
    )
    .await
}

/// Patroni creates these at runtime so Helm never removes them. Failures are
/// logged and skipped.
async fn delete_patroni_objects(client: &Client, ctx: &CommandContext) {
    let services: Api<Service> = Api::namespaced(client.clone(), &ctx.namespace);
    let config_service = format!("{}-config", ctx.release);
    match delete_if_exists(&services, &config_service).await {
        Ok(true) => info!(service = %config_service, "Deleted service"),
        Ok(false) => {}
        Err(e) => warn!(service = %config_service, error = %e, "Failed to delete service"),
    }

    let endpoints: Api<Endpoints> = Api::namespaced(client.clone(), &ctx.namespace);
    match delete_if_exists(&endpoints, &ctx.release).await {
        Ok(true) => info!(endpoints = %ctx.release, "Deleted endpoints"),
        Ok(false) => {}
        Err(e) => warn!(endpoints = %ctx.release, error = %e, "Failed to delete endpoints"),
    }
}

async fn delete_volume_claims(client: &Client, ctx: &CommandContext) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &ctx.namespace);
    let params = ListParams::default().labels(&selector(&release_labels(&ctx.release)));

    let claims = api.list(&params).await?;
    for claim in claims.items {
        let Some(name) = claim.metadata.name else {
            continue;
        };
        if delete_if_exists(&api, &name).await? {
            info!(pvc = %name, "Deleted persistent volume claim");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_namespace_is_not_passed_to_helm() {
        assert_eq!(uninstall_args("tobs", "default"), vec!["uninstall", "tobs"]);
        assert_eq!(
            uninstall_args("obs", "monitoring"),
            vec!["uninstall", "obs", "--namespace", "monitoring"]
        );
    }

    #[test]
    fn values_are_read_as_json_with_defaults() {
        let args = get_values_args("obs", "monitoring");
        assert_eq!(
            args,
            vec!["get", "values", "obs", "-a", "--namespace", "monitoring", "-o", "json"]
        );
    }

    #[test]
    fn backup_switch_is_read_from_values() {
        let on = json!({"timescaledb-single": {"backup": {"enabled": true}}});
        let off = json!({"timescaledb-single": {"backup": {"enabled": false}}});
        assert!(backup_enabled(&on).unwrap());
        assert!(!backup_enabled(&off).unwrap());
    }

    #[test]
    fn missing_backup_switch_reads_as_disabled() {
        assert!(!backup_enabled(&json!({})).unwrap());
        assert!(!backup_enabled(&json!({"timescaledb-single": {}})).unwrap());
    }

    #[test]
    fn non_boolean_backup_switch_is_rejected() {
        let values = json!({"timescaledb-single": {"backup": {"enabled": "yes"}}});
        assert!(matches!(
            backup_enabled(&values),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn pgbackrest_secret_only_with_backups() {
        let without = secret_names("tobs", false);
        assert!(without.contains(&"tobs-credentials".to_string()));
        assert!(without.contains(&"tobs-certificate".to_string()));
        assert!(without.contains(&"tobs-timescaledb-uri".to_string()));
        assert!(!without.contains(&"tobs-pgbackrest".to_string()));

        let with = secret_names("tobs", true);
        assert!(with.contains(&"tobs-pgbackrest".to_string()));
    }
}
