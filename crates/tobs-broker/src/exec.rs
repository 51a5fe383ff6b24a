//! Running commands inside pods

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tobs_common::{Error, Result};

/// Remote command execution in a named container.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` to completion; non-zero exit is an `Exec` error
    async fn exec(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        command: &[String],
    ) -> Result<()>;
}

/// [`RemoteExec`] over the pod exec subresource
#[derive(Clone)]
pub struct KubeRemoteExec {
    client: Client,
}

impl KubeRemoteExec {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteExec for KubeRemoteExec {
    async fn exec(
        &self,
        namespace: &str,
        instance: &str,
        container: &str,
        command: &[String],
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        // argv[0] only: arguments may carry credentials
        debug!(
            namespace = %namespace,
            instance = %instance,
            container = %container,
            program = command.first().map(String::as_str).unwrap_or_default(),
            "Running command in pod"
        );

        let mut attached = pods
            .exec(instance, command.iter().map(String::as_str), &params)
            .await
            .map_err(|e| Error::exec(namespace, instance, container, e.to_string()))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (_, stderr, status) = tokio::join!(
            drain(stdout),
            drain(stderr),
            async {
                match status {
                    Some(fut) => fut.await,
                    None => None,
                }
            }
        );

        if let Err(e) = attached.join().await {
            debug!(instance = %instance, error = %e, "Exec session did not close cleanly");
        }

        match status {
            Some(s) if s.status.as_deref() != Some("Success") => {
                let message = s
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| stderr.trim().to_string());
                Err(Error::exec(namespace, instance, container, message))
            }
            _ => Ok(()),
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}
