//! CLI commands

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use kube::Client;
use tracing::{debug, warn};

use tobs_broker::{Broker, BrokerConfig, ConnectionTarget};
use tobs_common::kube_utils;

use crate::{Error, Result};

pub mod grafana;
pub mod port_forward;
pub mod timescaledb;
pub mod uninstall;

/// Release every command operates on, after flag/config/default merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub release: String,
    pub namespace: String,
    pub kubeconfig: Option<String>,
}

impl CommandContext {
    /// Build a kube [`Client`] using the tobs kubeconfig resolution chain.
    pub async fn client(&self) -> Result<Client> {
        let path = crate::config::resolve_kubeconfig(self.kubeconfig.as_deref());
        let client = kube_utils::create_client(path.as_deref().map(Path::new)).await?;
        Ok(client)
    }

    /// Broker wired to the cluster of this context
    pub async fn broker(&self) -> Result<Broker> {
        Ok(Broker::new(self.client().await?, BrokerConfig::default()))
    }

    /// Database target for this release, authenticated with `credential_key`
    pub fn target(&self, credential_key: &str) -> ConnectionTarget {
        ConnectionTarget::new(&self.namespace, &self.release).with_credential_key(credential_key)
    }
}

/// Reject passwords no workload would accept
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::validation("password must not be empty"));
    }
    if password.trim() != password {
        return Err(Error::validation(
            "password must not start or end with whitespace",
        ));
    }
    Ok(())
}

/// Block until the operator presses Ctrl-C.
pub async fn wait_for_interrupt() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::command_failed(format!("failed to listen for Ctrl-C: {}", e)))
}

/// Polls until a resource is deleted.
///
/// Timing out is not an error: a warning is logged and `Ok(())` returned so
/// the caller can continue its cleanup.
///
/// # Arguments
/// * `timeout` - Maximum time to wait for deletion
/// * `interval` - Time between polls
/// * `description` - Human-readable description for logging
/// * `check_exists` - Async function that returns `Ok(true)` while the resource
///   exists, `Ok(false)` once it is gone, or `Err` if the state is unknown
pub async fn wait_for_deletion<F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_exists: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, String>>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() > timeout {
            warn!(
                "{} did not terminate in {} seconds, proceeding anyway",
                description,
                timeout.as_secs()
            );
            return Ok(());
        }

        match check_exists().await {
            Ok(true) => {
                debug!("{} still exists, waiting...", description);
                tokio::time::sleep(interval).await;
            }
            Ok(false) => {
                debug!("{} deleted", description);
                return Ok(());
            }
            Err(e) => {
                // State unknown; carry on with the rest of the cleanup
                debug!("could not check {}: {}", description, e);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn password_validation() {
        assert!(validate_password("s3cret").is_ok());
        assert!(validate_password("with inner space").is_ok());
        assert!(matches!(validate_password(""), Err(Error::Validation { .. })));
        assert!(matches!(validate_password(" pw"), Err(Error::Validation { .. })));
        assert!(matches!(validate_password("pw\n"), Err(Error::Validation { .. })));
    }

    #[test]
    fn target_uses_context_release() {
        let ctx = CommandContext {
            release: "obs".to_string(),
            namespace: "monitoring".to_string(),
            kubeconfig: None,
        };
        let target = ctx.target("admin");
        assert_eq!(target.release(), "obs");
        assert_eq!(target.namespace(), "monitoring");
        assert_eq!(target.role(), "admin");
    }

    #[tokio::test]
    async fn deletion_wait_stops_once_gone() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        wait_for_deletion(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "pods",
            move || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) < 2) }
            },
        )
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deletion_wait_times_out_without_error() {
        let result = wait_for_deletion(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "pods",
            || async { Ok(true) },
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn deletion_wait_treats_unknown_state_as_done() {
        let result = wait_for_deletion(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "pods",
            || async { Err("forbidden".to_string()) },
        )
        .await;
        assert!(result.is_ok());
    }
}
