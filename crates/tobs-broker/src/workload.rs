//! Cluster workload queries

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tobs_common::labels::selector;
use tobs_common::{Error, Result};

/// Lookup of running workload instances.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadQuery: Send + Sync {
    /// Names of running pods matching `labels`, ordered by name
    async fn list_instances(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>>;

    /// Environment of the first container of `instance`
    async fn instance_env(&self, namespace: &str, instance: &str)
        -> Result<BTreeMap<String, String>>;
}

/// First running instance matching `labels`, or `TargetNotFound`
pub async fn first_instance(
    workloads: &dyn WorkloadQuery,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String> {
    workloads
        .list_instances(namespace, labels)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::target_not_found(namespace, selector(labels)))
}

/// [`WorkloadQuery`] backed by the pods API
#[derive(Clone)]
pub struct KubeWorkloadQuery {
    client: Client,
}

impl KubeWorkloadQuery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadQuery for KubeWorkloadQuery {
    async fn list_instances(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = selector(labels);
        let pods = api.list(&ListParams::default().labels(&selector)).await?;

        let total = pods.items.len();
        let mut names: Vec<String> = pods
            .items
            .into_iter()
            .filter(is_running)
            .map(|pod| pod.name_any())
            .collect();
        names.sort();

        debug!(
            namespace = %namespace,
            selector = %selector,
            total,
            running = names.len(),
            "Listed pods"
        );
        Ok(names)
    }

    async fn instance_env(
        &self,
        namespace: &str,
        instance: &str,
    ) -> Result<BTreeMap<String, String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get_opt(instance)
            .await?
            .ok_or_else(|| Error::target_not_found(namespace, instance))?;
        Ok(container_env(&pod))
    }
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

/// Literal env values of the first container; `valueFrom` entries are skipped
fn container_env(pod: &Pod) -> BTreeMap<String, String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|c| c.env.as_ref())
        .map(|env| {
            env.iter()
                .filter_map(|var| var.value.clone().map(|v| (var.name.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}
