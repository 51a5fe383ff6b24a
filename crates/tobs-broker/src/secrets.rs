//! Secret store adapter
//!
//! Plain get/put of key → bytes records against Kubernetes Secrets. Writes are
//! last-write-wins: no resourceVersion precondition is sent.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tobs_common::kube_utils::is_not_found;
use tobs_common::{Error, ResourceRef, Result};

/// Field manager recorded on secret writes
const FIELD_MANAGER: &str = "tobs";

/// A named mapping of credential keys to opaque values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretRecord {
    name: String,
    data: BTreeMap<String, Vec<u8>>,
}

impl SecretRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    /// Builder form of [`SecretRecord::insert`]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Set `key`, returning the value it replaced
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.data.insert(key.into(), value.into())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<Secret> for SecretRecord {
    fn from(secret: Secret) -> Self {
        Self {
            name: secret.metadata.name.unwrap_or_default(),
            data: secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect(),
        }
    }
}

/// Storage for credential records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a record; `Ok(None)` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretRecord>>;

    /// Write every key of `record` into the existing record of the same name
    async fn put(&self, namespace: &str, record: &SecretRecord) -> Result<()>;
}

/// Read one credential, distinguishing a missing record from a missing key
pub async fn fetch_credential(
    store: &dyn SecretStore,
    resource: &ResourceRef,
    key: &str,
) -> Result<Vec<u8>> {
    let record = store
        .get(&resource.namespace, &resource.name)
        .await?
        .ok_or_else(|| Error::resource_not_found(resource))?;

    record
        .get(key)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::credential_not_found(resource, key))
}

/// Read one credential as UTF-8 text
pub async fn fetch_credential_string(
    store: &dyn SecretStore,
    resource: &ResourceRef,
    key: &str,
) -> Result<String> {
    let bytes = fetch_credential(store, resource, key).await?;
    String::from_utf8(bytes)
        .map_err(|_| Error::invalid_credential(resource, key, "value is not valid UTF-8"))
}

/// [`SecretStore`] backed by Kubernetes Secrets
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretRecord>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get_opt(name).await?;
        debug!(namespace = %namespace, name = %name, found = secret.is_some(), "Read secret");
        Ok(secret.map(SecretRecord::from))
    }

    async fn put(&self, namespace: &str, record: &SecretRecord) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let patch = Secret {
            metadata: ObjectMeta {
                name: Some(record.name.clone()),
                ..Default::default()
            },
            data: Some(
                record
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Default::default()
        };

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api
            .patch(&record.name, &params, &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!(namespace = %namespace, name = %record.name, "Wrote secret");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(Error::resource_not_found(&ResourceRef::new(
                namespace,
                record.name.clone(),
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn creds() -> ResourceRef {
        ResourceRef::new("monitoring", "tobs-credentials")
    }

    #[test]
    fn record_converts_from_secret() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("tobs-credentials".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "PATRONI_SUPERUSER_PASSWORD".to_string(),
                ByteString(b"s3cret".to_vec()),
            )])),
            ..Default::default()
        };

        let record = SecretRecord::from(secret);
        assert_eq!(record.name(), "tobs-credentials");
        assert_eq!(record.get("PATRONI_SUPERUSER_PASSWORD"), Some(&b"s3cret"[..]));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn insert_returns_previous_value() {
        let mut record = SecretRecord::new("r").with_entry("admin", "pw1");
        assert_eq!(record.insert("admin", "pw2"), Some(b"pw1".to_vec()));
        assert_eq!(record.get("admin"), Some(&b"pw2"[..]));
    }

    #[test]
    fn debug_lists_keys_not_values() {
        let record = SecretRecord::new("r").with_entry("admin", "hunter2");
        let debug = format!("{:?}", record);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn fetch_credential_distinguishes_missing_record_and_key() {
        let mut store = MockSecretStore::new();
        store
            .expect_get()
            .with(eq("monitoring"), eq("tobs-credentials"))
            .times(1)
            .returning(|_, _| Ok(None));
        let err = fetch_credential(&store, &creds(), "admin").await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));

        let mut store = MockSecretStore::new();
        store
            .expect_get()
            .returning(|_, name| Ok(Some(SecretRecord::new(name).with_entry("other", "x"))));
        let err = fetch_credential(&store, &creds(), "admin").await.unwrap_err();
        assert!(matches!(err, Error::CredentialNotFound { ref key, .. } if key == "admin"));
    }

    #[tokio::test]
    async fn fetch_credential_string_rejects_binary() {
        let mut store = MockSecretStore::new();
        store.expect_get().returning(|_, name| {
            Ok(Some(SecretRecord::new(name).with_entry("admin", vec![0xff, 0xfe])))
        });
        let err = fetch_credential_string(&store, &creds(), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredential { .. }));
    }
}
