//! Manifest engine: apply and delete multi-document Kubernetes YAML
//!
//! Objects are decoded in file order, `CustomResourceDefinition`s are moved
//! ahead of everything else, each kind is resolved through API discovery and
//! the object is upserted: `get`, then `create` if absent, otherwise
//! `replace` carrying the resourceVersion just observed. A concurrent writer
//! that bumps the version in between makes the replace fail with a conflict;
//! that failure is returned to the caller, never retried here.
//!
//! Deletion walks the same partitions backwards: dependents first in reverse
//! file order, then the CRDs in reverse file order. Missing objects are
//! skipped without issuing a delete.

mod api;
mod fetch;

pub use api::{ClusterApi, KubeClusterApi, ObjectKey, ResolvedResource};
pub use fetch::{fetch_manifest, ManifestSource, FILE_URI_PREFIX};

#[cfg(test)]
pub use api::MockClusterApi;

use serde_json::Value;
use tracing::{debug, info};

use crate::{yaml, Error, Result};

/// Kind name of a CustomResourceDefinition
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Namespace used for namespaced objects that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// One decoded manifest document
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestObject {
    /// apiVersion, e.g. `apps/v1`
    pub api_version: String,
    /// kind, e.g. `Deployment`
    pub kind: String,
    /// metadata.name
    pub name: String,
    /// metadata.namespace as written in the document
    pub namespace: Option<String>,
    /// The full document
    pub value: Value,
}

impl ManifestObject {
    /// Extract the addressing fields from an untyped document
    pub fn from_value(value: Value) -> Result<Self> {
        let field = |pointer: &str| value.pointer(pointer).and_then(Value::as_str);

        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::decode("manifest document missing apiVersion"))?
            .to_string();
        let kind = field("/kind")
            .ok_or_else(|| Error::decode("manifest document missing kind"))?
            .to_string();
        let name = field("/metadata/name")
            .ok_or_else(|| Error::decode(format!("{} document missing metadata.name", kind)))?
            .to_string();
        let namespace = field("/metadata/namespace")
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(Self {
            api_version,
            kind,
            name,
            namespace,
            value,
        })
    }

    /// Whether this object defines a custom resource type
    pub fn is_crd(&self) -> bool {
        self.kind == CRD_KIND
    }

    fn key(&self, resource: &ResolvedResource) -> ObjectKey {
        let namespace = resource.namespaced.then(|| {
            self.namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
        });
        ObjectKey {
            namespace,
            name: self.name.clone(),
        }
    }
}

/// Decode a manifest body into objects, preserving document order
pub fn decode_manifest(body: &str) -> Result<Vec<ManifestObject>> {
    yaml::decode_documents(body)?
        .into_iter()
        .map(ManifestObject::from_value)
        .collect()
}

/// Split into (CRDs, others), each keeping its relative order
fn partition_crds(objects: Vec<ManifestObject>) -> (Vec<ManifestObject>, Vec<ManifestObject>) {
    objects.into_iter().partition(ManifestObject::is_crd)
}

/// Order in which objects are applied: CRDs first, then everything else
pub fn apply_order(objects: Vec<ManifestObject>) -> Vec<ManifestObject> {
    let (mut crds, others) = partition_crds(objects);
    crds.extend(others);
    crds
}

/// Order in which objects are deleted: dependents first, CRDs last
pub fn delete_order(objects: Vec<ManifestObject>) -> Vec<ManifestObject> {
    let (crds, others) = partition_crds(objects);
    others.into_iter().rev().chain(crds.into_iter().rev()).collect()
}

/// Applies and deletes manifests against one cluster
pub struct ManifestEngine<C: ClusterApi = KubeClusterApi> {
    api: C,
}

impl ManifestEngine<KubeClusterApi> {
    /// Engine talking to a live cluster
    pub fn new(client: kube::Client) -> Self {
        Self::with_api(KubeClusterApi::new(client))
    }
}

impl<C: ClusterApi> ManifestEngine<C> {
    /// Engine over a custom [`ClusterApi`]
    pub fn with_api(api: C) -> Self {
        Self { api }
    }

    /// Fetch `uri` and upsert every object it contains
    pub async fn apply(&self, uri: &str) -> Result<()> {
        info!(uri = %uri, "applying manifest");
        let body = fetch_manifest(uri).await?;
        self.apply_str(&body).await
    }

    /// Fetch `uri` and delete every object it contains
    pub async fn delete(&self, uri: &str) -> Result<()> {
        info!(uri = %uri, "deleting manifest objects");
        let body = fetch_manifest(uri).await?;
        self.delete_str(&body).await
    }

    /// Upsert every object in a manifest body
    pub async fn apply_str(&self, body: &str) -> Result<()> {
        for object in apply_order(decode_manifest(body)?) {
            self.upsert(object).await?;
        }
        Ok(())
    }

    /// Delete every object in a manifest body
    pub async fn delete_str(&self, body: &str) -> Result<()> {
        for object in delete_order(decode_manifest(body)?) {
            self.remove(object).await?;
        }
        Ok(())
    }

    /// Upsert in-memory documents
    pub async fn apply_objects(&self, values: Vec<Value>) -> Result<()> {
        let objects = values
            .into_iter()
            .map(ManifestObject::from_value)
            .collect::<Result<Vec<_>>>()?;
        for object in apply_order(objects) {
            self.upsert(object).await?;
        }
        Ok(())
    }

    /// Delete in-memory documents
    pub async fn delete_objects(&self, values: Vec<Value>) -> Result<()> {
        let objects = values
            .into_iter()
            .map(ManifestObject::from_value)
            .collect::<Result<Vec<_>>>()?;
        for object in delete_order(objects) {
            self.remove(object).await?;
        }
        Ok(())
    }

    async fn upsert(&self, object: ManifestObject) -> Result<()> {
        let resource = self.api.resolve(&object.api_version, &object.kind).await?;
        let key = object.key(&resource);
        let mut value = object.value;
        if let Some(ns) = &key.namespace {
            set_metadata_field(&mut value, "namespace", Value::String(ns.clone()));
        }

        match self.api.get(&resource, &key).await? {
            None => {
                debug!(kind = %object.kind, object = %key, "creating");
                self.api.create(&resource, &key, &value).await
            }
            Some(existing) => {
                let version = existing
                    .pointer("/metadata/resourceVersion")
                    .cloned()
                    .unwrap_or(Value::Null);
                set_metadata_field(&mut value, "resourceVersion", version);
                debug!(kind = %object.kind, object = %key, "updating");
                self.api.replace(&resource, &key, &value).await
            }
        }
    }

    async fn remove(&self, object: ManifestObject) -> Result<()> {
        let resource = self.api.resolve(&object.api_version, &object.kind).await?;
        let key = object.key(&resource);

        if self.api.get(&resource, &key).await?.is_none() {
            debug!(kind = %object.kind, object = %key, "already absent");
            return Ok(());
        }
        debug!(kind = %object.kind, object = %key, "deleting");
        self.api.delete(&resource, &key).await
    }
}

fn set_metadata_field(value: &mut Value, field: &str, field_value: Value) {
    if let Some(obj) = value.as_object_mut() {
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(meta) = metadata.as_object_mut() {
            meta.insert(field.to_string(), field_value);
        }
    }
}
