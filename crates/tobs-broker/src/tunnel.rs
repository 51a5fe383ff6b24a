//! Tunnel manager
//!
//! A tunnel binds a loopback listener and bridges every accepted connection
//! into a port on one pod. The listener task is owned by the [`TunnelHandle`];
//! closing the handle stops the task and frees the local port. There is no
//! reconnection: a handle that is closed stays closed.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use tobs_common::{Error, Result};

use crate::config::DEFAULT_TUNNEL_SETUP_TIMEOUT;
use crate::workload::{first_instance, WorkloadQuery};

/// Which pod a tunnel should reach
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelTarget {
    /// First running pod matching these labels
    Selector(BTreeMap<String, String>),
    /// A pod by name
    Pod(String),
}

/// Transport that carries tunnel traffic into a pod.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// Confirm a forwarding session to `instance:remote_port` can be established
    async fn check_session(
        &self,
        namespace: &str,
        instance: &str,
        remote_port: u16,
    ) -> Result<()>;

    /// Carry one accepted local connection until either side closes.
    ///
    /// Returns bytes sent to and received from the pod.
    async fn bridge(
        &self,
        namespace: &str,
        instance: &str,
        remote_port: u16,
        local: TcpStream,
    ) -> Result<(u64, u64)>;
}

/// [`TunnelTransport`] over the pod port-forward subresource
#[derive(Clone)]
pub struct KubeTunnelTransport {
    client: Client,
}

impl KubeTunnelTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TunnelTransport for KubeTunnelTransport {
    async fn check_session(
        &self,
        namespace: &str,
        instance: &str,
        remote_port: u16,
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pf = pods
            .portforward(instance, &[remote_port])
            .await
            .map_err(|e| Error::tunnel_setup(namespace, instance, remote_port, e.to_string()))?;
        pf.abort();
        let _ = pf.join().await;
        Ok(())
    }

    async fn bridge(
        &self,
        namespace: &str,
        instance: &str,
        remote_port: u16,
        mut local: TcpStream,
    ) -> Result<(u64, u64)> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut pf = pods
            .portforward(instance, &[remote_port])
            .await
            .map_err(|e| Error::tunnel_setup(namespace, instance, remote_port, e.to_string()))?;

        let mut upstream = pf.take_stream(remote_port).ok_or_else(|| {
            Error::tunnel_setup(
                namespace,
                instance,
                remote_port,
                format!("no stream for port {}", remote_port),
            )
        })?;

        let copied = tokio::io::copy_bidirectional(&mut local, &mut upstream).await;

        drop(upstream);
        pf.abort();
        if let Err(e) = pf.join().await {
            debug!(instance = %instance, error = %e, "Port-forward session did not close cleanly");
        }

        copied.map_err(|e| Error::tunnel_setup(namespace, instance, remote_port, e.to_string()))
    }
}

/// Liveness of a tunnel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelState {
    Open,
    Closed,
}

/// An open local→pod forwarding session.
///
/// Exclusively owned by whoever opened it. [`TunnelHandle::close`] stops the
/// forwarding task and returns once the local port is free. Dropping an open
/// handle cancels the task without waiting for it.
#[derive(Debug)]
pub struct TunnelHandle {
    namespace: String,
    instance: String,
    remote_port: u16,
    local_port: u16,
    state: TunnelState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TunnelHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Pod the tunnel reaches
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Loopback port the tunnel listens on
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port))
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TunnelState::Open
    }

    /// Stop forwarding and release the local port. Idempotent.
    pub async fn close(&mut self) {
        if self.state == TunnelState::Closed {
            return;
        }
        self.state = TunnelState::Closed;
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(local_port = self.local_port, error = %e, "Tunnel task ended abnormally");
            }
        }

        info!(
            namespace = %self.namespace,
            instance = %self.instance,
            local_port = self.local_port,
            "Tunnel closed"
        );
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if self.state == TunnelState::Open {
            self.cancel.cancel();
        }
    }
}

/// Opens tunnels into cluster workloads.
#[derive(Clone)]
pub struct TunnelManager {
    workloads: Arc<dyn WorkloadQuery>,
    transport: Arc<dyn TunnelTransport>,
    setup_timeout: Duration,
}

impl TunnelManager {
    pub fn new(workloads: Arc<dyn WorkloadQuery>, transport: Arc<dyn TunnelTransport>) -> Self {
        Self {
            workloads,
            transport,
            setup_timeout: DEFAULT_TUNNEL_SETUP_TIMEOUT,
        }
    }

    /// Bound on how long [`TunnelManager::open`] waits for the session
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Open a tunnel to `remote_port` on the pod named by `target`.
    ///
    /// `local_port` 0 lets the OS choose; the chosen port is on the handle.
    #[instrument(skip(self, namespace, target), fields(namespace = %namespace))]
    pub async fn open(
        &self,
        namespace: &str,
        target: &TunnelTarget,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle> {
        let instance = match target {
            TunnelTarget::Selector(labels) => {
                first_instance(self.workloads.as_ref(), namespace, labels).await?
            }
            TunnelTarget::Pod(name) => name.clone(),
        };

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, local_port))
            .await
            .map_err(|e| {
                Error::tunnel_setup(
                    namespace,
                    &instance,
                    remote_port,
                    format!("failed to bind local port {}: {}", local_port, e),
                )
            })?;
        let bound_port = listener
            .local_addr()
            .map_err(|e| Error::tunnel_setup(namespace, &instance, remote_port, e.to_string()))?
            .port();

        match tokio::time::timeout(
            self.setup_timeout,
            self.transport.check_session(namespace, &instance, remote_port),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e @ Error::TunnelSetupFailed { .. })) => return Err(e),
            Ok(Err(e)) => {
                return Err(Error::tunnel_setup(
                    namespace,
                    &instance,
                    remote_port,
                    e.to_string(),
                ))
            }
            Err(_) => {
                return Err(Error::tunnel_setup(
                    namespace,
                    &instance,
                    remote_port,
                    format!("session not confirmed within {:?}", self.setup_timeout),
                ))
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(
            listener,
            self.transport.clone(),
            Forward {
                namespace: namespace.to_string(),
                instance: instance.clone(),
                remote_port,
            },
            cancel.clone(),
        ));

        info!(
            instance = %instance,
            remote_port,
            local_port = bound_port,
            "Tunnel open"
        );

        Ok(TunnelHandle {
            namespace: namespace.to_string(),
            instance,
            remote_port,
            local_port: bound_port,
            state: TunnelState::Open,
            cancel,
            task: Some(task),
        })
    }
}

/// Pause after a failed accept before polling the listener again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct Forward {
    namespace: String,
    instance: String,
    remote_port: u16,
}

/// Accept loop; the listener is dropped before this returns
async fn serve(
    listener: TcpListener,
    transport: Arc<dyn TunnelTransport>,
    forward: Forward,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, instance = %forward.instance, "Accepted tunnel connection");
                    let transport = transport.clone();
                    let forward = forward.clone();
                    let token = cancel.child_token();
                    connections.spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            bridged = transport.bridge(
                                &forward.namespace,
                                &forward.instance,
                                forward.remote_port,
                                stream,
                            ) => match bridged {
                                Ok((sent, received)) => {
                                    debug!(peer = %peer, sent, received, "Tunnel connection closed");
                                }
                                Err(e) => warn!(peer = %peer, error = %e, "Tunnel connection failed"),
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept tunnel connection");
                    if backoff_after_accept_error(&cancel).await {
                        break;
                    }
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
}

/// Wait out [`ACCEPT_BACKOFF`]; `true` if the tunnel was closed meanwhile
async fn backoff_after_accept_error(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}
