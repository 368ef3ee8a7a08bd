//! Provider for local kind clusters

use std::path::Path;

use async_trait::async_trait;
use kube::Client;
use serde_json::Value;
use tracing::{debug, info};

use blueprint_common::blueprint::PROVIDER_KIND;
use blueprint_common::{Blueprint, Error, Result, BLUEPRINT_NAMESPACE};

use super::{Connection, Provider};
use crate::exec::{run_checked, CommandRunner, Invocation};

const KIND: &str = "kind";

/// A single-host cluster running in containers
///
/// kind clusters are recreated, never upgraded in place.
pub struct KindProvider<R: CommandRunner> {
    name: String,
    config: Option<Value>,
    conn: Connection,
    runner: R,
}

impl<R: CommandRunner> KindProvider<R> {
    /// Provider for the cluster named after the Blueprint
    pub fn new(blueprint: &Blueprint, kubeconfig: &Path, runner: R) -> Self {
        let name = blueprint.metadata.name.clone();
        Self {
            config: blueprint
                .spec
                .kubernetes
                .as_ref()
                .and_then(|k| k.config.clone()),
            conn: Connection::new(kubeconfig, format!("kind-{}", name)),
            name,
            runner,
        }
    }

    fn kubeconfig_arg(&self) -> String {
        self.conn.kubeconfig().display().to_string()
    }

    fn create_invocation(&self) -> Result<Invocation> {
        let inv = Invocation::new(KIND)
            .args(["create", "cluster", "-n", self.name.as_str()])
            .arg("--kubeconfig")
            .arg(self.kubeconfig_arg());

        match &self.config {
            Some(config) => {
                let yaml = serde_yaml::to_string(config)
                    .map_err(|e| Error::provider(PROVIDER_KIND, format!("invalid kind config: {}", e)))?;
                Ok(inv.args(["--config", "-"]).stdin(yaml))
            }
            None => Ok(inv),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Provider for KindProvider<R> {
    async fn install(&self) -> Result<()> {
        info!(cluster = %self.name, kubeconfig = %self.kubeconfig_arg(), "creating kind cluster");
        run_checked(&self.runner, &self.create_invocation()?)
            .await
            .map_err(|e| Error::provider(PROVIDER_KIND, format!("failed to create cluster: {}", e)))?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let output = run_checked(
            &self.runner,
            &Invocation::new(KIND).args(["get", "clusters", "-q"]),
        )
        .await?;
        Ok(output.stdout.lines().any(|line| line.trim() == self.name))
    }

    async fn refresh(&self) -> Result<()> {
        debug!(cluster = %self.name, "nothing to refresh for a kind cluster");
        Ok(())
    }

    async fn upgrade(&self) -> Result<()> {
        Ok(())
    }

    async fn setup_client(&mut self) -> Result<()> {
        self.conn.setup().await
    }

    fn client(&self) -> Result<Client> {
        self.conn.client()
    }

    async fn wait_for_nodes(&self) -> Result<()> {
        self.conn.wait_for_nodes().await
    }

    async fn wait_for_pods(&self) -> Result<()> {
        self.conn.wait_for_pods(BLUEPRINT_NAMESPACE).await
    }

    async fn reset(&self, _force: bool) -> Result<()> {
        info!(cluster = %self.name, "deleting kind cluster");
        let inv = Invocation::new(KIND)
            .args(["delete", "clusters", self.name.as_str()])
            .arg("--kubeconfig")
            .arg(self.kubeconfig_arg());
        run_checked(&self.runner, &inv)
            .await
            .map_err(|e| Error::provider(PROVIDER_KIND, format!("failed to delete cluster: {}", e)))?;
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        PROVIDER_KIND
    }

    fn kube_context(&self) -> String {
        format!("kind-{}", self.name)
    }

    async fn needs_upgrade(&self, _blueprint: &Blueprint) -> Result<bool> {
        Ok(false)
    }

    async fn validate_upgrade(&self, _blueprint: &Blueprint) -> Result<()> {
        Ok(())
    }
}
