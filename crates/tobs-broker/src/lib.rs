//! Database access broker for tobs
//!
//! Resolves how to reach the TimescaleDB of a release from outside the
//! cluster, opens loopback tunnels into pods when no direct route exists, and
//! rotates stored credentials with compensating rollback.
//!
//! # Layout
//!
//! ```text
//! ConnectionResolver ──► SecretStore        (published URI, credentials)
//!         │          ──► WorkloadQuery      (live pods, connector env)
//!         └────────────► TunnelManager ──► TunnelTransport (port-forward)
//!
//! RotationCoordinator ─► SecretStore
//!                     ─► CredentialApplier ──► RemoteExec (pod exec)
//! ```
//!
//! Every collaborator is a trait; [`Broker`] wires the Kubernetes-backed
//! implementations from one client.

pub mod config;
pub mod descriptor;
pub mod exec;
pub mod resolver;
pub mod rotation;
pub mod secrets;
pub mod target;
pub mod tunnel;
pub mod workload;

use std::sync::Arc;

use kube::Client;

pub use config::BrokerConfig;
pub use descriptor::{ConnectionDescriptor, SslMode};
pub use exec::{KubeRemoteExec, RemoteExec};
pub use resolver::{
    ConnectionResolver, DirectEndpoint, DirectRoute, Resolution, ResolveOptions, Strategy,
    StrategyKind, Verbosity,
};
pub use rotation::{CredentialApplier, ExecApplier, RotationCoordinator};
pub use secrets::{KubeSecretStore, SecretRecord, SecretStore};
pub use target::ConnectionTarget;
pub use tunnel::{KubeTunnelTransport, TunnelHandle, TunnelManager, TunnelTarget, TunnelTransport};
pub use workload::{KubeWorkloadQuery, WorkloadQuery};

/// Kubernetes-backed collaborators sharing one client.
#[derive(Clone)]
pub struct Broker {
    secrets: Arc<dyn SecretStore>,
    workloads: Arc<dyn WorkloadQuery>,
    transport: Arc<dyn TunnelTransport>,
    exec: Arc<dyn RemoteExec>,
    config: BrokerConfig,
}

impl Broker {
    pub fn new(client: Client, config: BrokerConfig) -> Self {
        Self {
            secrets: Arc::new(KubeSecretStore::new(client.clone())),
            workloads: Arc::new(KubeWorkloadQuery::new(client.clone())),
            transport: Arc::new(KubeTunnelTransport::new(client.clone())),
            exec: Arc::new(KubeRemoteExec::new(client)),
            config,
        }
    }

    pub fn secrets(&self) -> Arc<dyn SecretStore> {
        self.secrets.clone()
    }

    pub fn workloads(&self) -> Arc<dyn WorkloadQuery> {
        self.workloads.clone()
    }

    pub fn tunnels(&self) -> TunnelManager {
        TunnelManager::new(self.workloads.clone(), self.transport.clone())
            .with_setup_timeout(self.config.tunnel_setup_timeout)
    }

    /// Resolver with the default strategy order
    pub fn resolver(&self) -> ConnectionResolver {
        ConnectionResolver::new(
            self.secrets.clone(),
            self.workloads.clone(),
            self.tunnels(),
            &self.config,
        )
    }

    /// Coordinator for the Grafana admin password of `release`
    pub fn grafana_rotation(&self, release: &str) -> RotationCoordinator {
        let applier = ExecApplier::grafana(release, self.workloads.clone(), self.exec.clone());
        RotationCoordinator::new(self.secrets.clone(), Arc::new(applier))
    }

    /// Coordinator for database role passwords of `release`
    pub fn database_rotation(&self, release: &str) -> RotationCoordinator {
        let applier = ExecApplier::database(release, self.workloads.clone(), self.exec.clone());
        RotationCoordinator::new(self.secrets.clone(), Arc::new(applier))
    }
}
