//! Kubernetes distribution providers
//!
//! Each provider owns the lifecycle of one cluster: creating it, probing
//! whether it exists, re-converging it to the declared configuration,
//! upgrading and tearing it down. The variant is chosen once, from the
//! Blueprint's `spec.kubernetes.provider`, by [`create_provider`].
//!
//! # Supported Providers
//!
//! - [`ExistingProvider`] - a cluster someone else manages
//! - [`KindProvider`] - a local container-based cluster
//! - [`K0sProvider`] - a multi-host cluster driven by `k0sctl` over SSH

mod existing;
mod k0s;
mod kind;

pub use existing::{liveness_verdict, ExistingProvider, LivenessFailure};
pub use k0s::{inventory, K0sProvider, K0SCTL_API_VERSION};
pub use kind::KindProvider;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::Client;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use blueprint_common::blueprint::{PROVIDER_EXISTING, PROVIDER_K0S, PROVIDER_KIND};
use blueprint_common::client::create_client;
use blueprint_common::readiness;
use blueprint_common::{
    Blueprint, Error, Result, CLUSTER_POLL_INTERVAL, CLUSTER_POLL_TIMEOUT,
};

use crate::exec::ProcessRunner;

/// Lifecycle contract shared by every distribution
///
/// One instance lives for one command invocation. Only
/// [`setup_client`](Provider::setup_client) changes the instance itself; the
/// other operations act on the cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provision the cluster
    async fn install(&self) -> Result<()>;

    /// Whether the cluster is already there
    async fn exists(&self) -> Result<bool>;

    /// Re-converge an existing cluster to the declared configuration
    async fn refresh(&self) -> Result<()>;

    /// Move the cluster to the declared distribution version
    async fn upgrade(&self) -> Result<()>;

    /// Bind an API client and block until every node is ready
    async fn setup_client(&mut self) -> Result<()>;

    /// The client bound by [`setup_client`](Provider::setup_client)
    fn client(&self) -> Result<Client>;

    /// Wait until every node reports `Ready=True`
    async fn wait_for_nodes(&self) -> Result<()>;

    /// Wait until the provider's pods are running
    async fn wait_for_pods(&self) -> Result<()>;

    /// Destroy the cluster; `force` skips interactive confirmation
    async fn reset(&self, force: bool) -> Result<()>;

    /// Provider name as written in the Blueprint
    fn provider_type(&self) -> &'static str;

    /// kubeconfig context addressing this cluster, empty for "current"
    fn kube_context(&self) -> String;

    /// Whether the declared version is newer than the installed one
    async fn needs_upgrade(&self, blueprint: &Blueprint) -> Result<bool>;

    /// Pre-flight check that the declared version accepts the live config
    async fn validate_upgrade(&self, blueprint: &Blueprint) -> Result<()>;
}

/// Lazily bound API client shared by all providers
#[derive(Clone)]
pub struct Connection {
    kubeconfig: PathBuf,
    context: String,
    client: Option<Client>,
}

impl Connection {
    /// A connection to `context` (empty for "current") of `kubeconfig`
    pub fn new(kubeconfig: impl Into<PathBuf>, context: impl Into<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            context: context.into(),
            client: None,
        }
    }

    /// The kubeconfig file this connection reads
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// Build the client, then wait for every node to become ready
    pub async fn setup(&mut self) -> Result<()> {
        let context = Some(self.context.as_str()).filter(|c| !c.is_empty());
        let client = create_client(&self.kubeconfig, context).await?;
        self.client = Some(client);
        self.wait_for_nodes().await
    }

    /// The bound client
    pub fn client(&self) -> Result<Client> {
        self.client.clone().ok_or_else(|| {
            Error::internal_with_context("client", "kubernetes client has not been set up")
        })
    }

    /// Wait for nodes using the cluster-wide schedule
    pub async fn wait_for_nodes(&self) -> Result<()> {
        info!("waiting for nodes to be ready");
        readiness::wait_for_nodes(&self.client()?, CLUSTER_POLL_INTERVAL, CLUSTER_POLL_TIMEOUT)
            .await
    }

    /// Wait for pods in `namespace` using the cluster-wide schedule
    pub async fn wait_for_pods(&self, namespace: &str) -> Result<()> {
        info!(namespace = %namespace, "waiting for pods to be ready");
        readiness::wait_for_pods(
            &self.client()?,
            Some(namespace),
            CLUSTER_POLL_INTERVAL,
            CLUSTER_POLL_TIMEOUT,
        )
        .await
    }
}

/// Create the provider the Blueprint declares
///
/// `kubeconfig` is the file providers read and, where they generate one,
/// write the cluster's credentials to.
pub fn create_provider(blueprint: &Blueprint, kubeconfig: &Path) -> Result<Box<dyn Provider>> {
    match blueprint.provider() {
        PROVIDER_EXISTING => Ok(Box::new(ExistingProvider::new(kubeconfig))),
        PROVIDER_KIND => Ok(Box::new(KindProvider::new(
            blueprint,
            kubeconfig,
            ProcessRunner,
        ))),
        PROVIDER_K0S => Ok(Box::new(K0sProvider::new(
            blueprint,
            kubeconfig,
            ProcessRunner,
        )?)),
        other => Err(Error::validation(format!(
            "invalid kubernetes distribution provider: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint(provider: &str, extra: &str) -> Blueprint {
        serde_yaml::from_str(&format!(
            r#"
apiVersion: blueprint.mirantis.com/v1alpha1
kind: Blueprint
metadata:
  name: demo
spec:
  kubernetes:
    provider: {provider}
{extra}
"#
        ))
        .expect("valid blueprint")
    }

    #[test]
    fn factory_picks_the_declared_variant() {
        let path = Path::new("/tmp/kubeconfig");

        let existing = create_provider(&blueprint("existing", ""), path).expect("existing");
        assert_eq!(existing.provider_type(), PROVIDER_EXISTING);
        assert_eq!(existing.kube_context(), "");

        let kind = create_provider(&blueprint("kind", ""), path).expect("kind");
        assert_eq!(kind.provider_type(), PROVIDER_KIND);
        assert_eq!(kind.kube_context(), "kind-demo");

        let k0s_extra = r#"    version: 1.30.2+k0s.0
    infra:
      hosts:
        - ssh:
            address: 10.0.0.1
            keyPath: /keys/id
            user: root
          role: controller+worker
"#;
        let k0s = create_provider(&blueprint("k0s", k0s_extra), path).expect("k0s");
        assert_eq!(k0s.provider_type(), PROVIDER_K0S);
        assert_eq!(k0s.kube_context(), "demo");
    }

    #[test]
    fn unbound_connection_reports_missing_client() {
        let conn = Connection::new("/tmp/kubeconfig", "");
        let err = conn.client().err().expect("expected missing client error");
        assert!(err.to_string().contains("has not been set up"));
        assert_eq!(conn.kubeconfig(), Path::new("/tmp/kubeconfig"));
    }
}
