//! Kubernetes utilities shared by the broker and the CLI

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use kube::api::{Api, DeleteParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Create a kube client from optional kubeconfig path with the default
/// connect timeout and no read timeout.
///
/// Exec and port-forward upgrades run over the same connection and inherit
/// its read timeout, so an idle tunnel would be cut off if one were set.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, None).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// `read_timeout` also bounds idle time on upgraded exec and port-forward
/// streams; pass `None` for clients that hold tunnels open.
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    apply_timeouts(&mut config, connect_timeout, read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

fn apply_timeouts(config: &mut Config, connect_timeout: Duration, read_timeout: Option<Duration>) {
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = read_timeout;
}

/// True if the error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Delete a namespaced object, treating "already gone" as success.
///
/// Returns `true` if the object existed.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<bool, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => {
            debug!(name = %name, "Object not found (already deleted)");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
