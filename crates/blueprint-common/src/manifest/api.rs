//! Dynamic Kubernetes access used by the manifest engine
//!
//! [`ClusterApi`] is the narrow surface the engine needs: resolve a kind via
//! discovery, then get/create/replace/delete untyped objects. Tests swap in a
//! mock; production uses [`KubeClusterApi`].

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::core::GroupVersion;
use kube::discovery::{self, ApiResource, Scope};
use kube::Client;
use serde_json::Value;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// A kind resolved against the live cluster's discovery data
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedResource {
    /// Group/version/kind/plural for the dynamic client
    pub api_resource: ApiResource,
    /// Whether objects of this kind live in a namespace
    pub namespaced: bool,
}

/// Name and (for namespaced kinds) namespace of one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// metadata.name
    pub name: String,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Untyped object operations against one cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Find `kind` in the resources served for `api_version`.
    ///
    /// Fails with [`Error::Discovery`] when the cluster does not serve it.
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResolvedResource>;

    /// Fetch an object, `None` if it does not exist
    async fn get(&self, resource: &ResolvedResource, key: &ObjectKey) -> Result<Option<Value>>;

    /// Create a new object
    async fn create(&self, resource: &ResolvedResource, key: &ObjectKey, object: &Value)
        -> Result<()>;

    /// Replace an existing object; `object` must carry the observed resourceVersion
    async fn replace(
        &self,
        resource: &ResolvedResource,
        key: &ObjectKey,
        object: &Value,
    ) -> Result<()>;

    /// Delete an object
    async fn delete(&self, resource: &ResolvedResource, key: &ObjectKey) -> Result<()>;
}

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a connected client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ResolvedResource, key: &ObjectKey) -> Api<DynamicObject> {
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource.api_resource),
            None => Api::all_with(self.client.clone(), &resource.api_resource),
        }
    }
}

fn to_dynamic(object: &Value) -> Result<DynamicObject> {
    serde_json::from_value(object.clone()).map_err(|e| Error::decode(e.to_string()))
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResolvedResource> {
        let gv: GroupVersion = api_version
            .parse()
            .map_err(|_| Error::decode(format!("invalid apiVersion {:?}", api_version)))?;

        let group = match discovery::pinned_group(&self.client, &gv).await {
            Ok(group) => group,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::discovery(api_version, kind))
            }
            Err(e) => return Err(e.into()),
        };

        group
            .versioned_resources(&gv.version)
            .into_iter()
            .find(|(ar, _)| ar.kind == kind)
            .map(|(api_resource, caps)| {
                trace!(kind = %kind, plural = %api_resource.plural, "resolved resource");
                ResolvedResource {
                    api_resource,
                    namespaced: caps.scope == Scope::Namespaced,
                }
            })
            .ok_or_else(|| Error::discovery(api_version, kind))
    }

    async fn get(&self, resource: &ResolvedResource, key: &ObjectKey) -> Result<Option<Value>> {
        let found = self.api(resource, key).get_opt(&key.name).await?;
        found
            .map(|obj| serde_json::to_value(obj).map_err(|e| Error::decode(e.to_string())))
            .transpose()
    }

    async fn create(
        &self,
        resource: &ResolvedResource,
        key: &ObjectKey,
        object: &Value,
    ) -> Result<()> {
        self.api(resource, key)
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await?;
        Ok(())
    }

    async fn replace(
        &self,
        resource: &ResolvedResource,
        key: &ObjectKey,
        object: &Value,
    ) -> Result<()> {
        self.api(resource, key)
            .replace(&key.name, &PostParams::default(), &to_dynamic(object)?)
            .await?;
        Ok(())
    }

    async fn delete(&self, resource: &ResolvedResource, key: &ObjectKey) -> Result<()> {
        self.api(resource, key)
            .delete(&key.name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_display() {
        let namespaced = ObjectKey {
            namespace: Some("blueprint-system".to_string()),
            name: "operator".to_string(),
        };
        assert_eq!(namespaced.to_string(), "blueprint-system/operator");

        let cluster = ObjectKey {
            namespace: None,
            name: "widgets.example.com".to_string(),
        };
        assert_eq!(cluster.to_string(), "widgets.example.com");
    }

    #[test]
    fn to_dynamic_rejects_non_objects() {
        assert!(to_dynamic(&Value::String("nope".to_string())).is_err());
    }
}
