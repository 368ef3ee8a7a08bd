//! Provider for multi-host k0s clusters driven by `k0sctl`

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use kube::Client;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use blueprint_common::blueprint::{Host, PROVIDER_K0S};
use blueprint_common::kubeconfig::{merge_into_file, parse_kubeconfig};
use blueprint_common::{Blueprint, Error, Result, BLUEPRINT_NAMESPACE};

use super::{Connection, Provider};
use crate::exec::{run_checked, CommandRunner, Invocation};
use crate::upgrade;

/// apiVersion of the k0sctl inventory document
pub const K0SCTL_API_VERSION: &str = "k0sctl.k0sproject.io/v1beta1";

const K0SCTL: &str = "k0sctl";

/// Render the k0sctl inventory for a Blueprint
pub fn inventory(blueprint: &Blueprint) -> Result<Value> {
    let k8s = blueprint.spec.kubernetes.as_ref();

    let mut k0s = json!({
        "version": blueprint.version().unwrap_or_default(),
        "dynamicConfig": false,
    });
    if let Some(config) = k8s.and_then(|k| k.config.as_ref()) {
        k0s["config"] = config.clone();
    }

    let hosts = serde_json::to_value(blueprint.hosts())
        .map_err(|e| Error::provider(PROVIDER_K0S, format!("invalid hosts: {}", e)))?;

    Ok(json!({
        "apiVersion": K0SCTL_API_VERSION,
        "kind": "Cluster",
        "metadata": { "name": blueprint.metadata.name },
        "spec": {
            "hosts": hosts,
            "k0s": k0s,
        },
    }))
}

/// A k0s cluster installed on the Blueprint's hosts
///
/// The inventory lives in a temporary file owned by the provider and is
/// removed when the provider is dropped.
pub struct K0sProvider<R: CommandRunner> {
    name: String,
    hosts: Vec<Host>,
    inventory: NamedTempFile,
    conn: Connection,
    runner: R,
}

impl<R: CommandRunner> K0sProvider<R> {
    /// Provider for the Blueprint's hosts; writes the inventory file
    pub fn new(blueprint: &Blueprint, kubeconfig: &Path, runner: R) -> Result<Self> {
        let yaml = serde_yaml::to_string(&inventory(blueprint)?).map_err(|e| {
            Error::provider(PROVIDER_K0S, format!("failed to render k0sctl config: {}", e))
        })?;

        let mut file = tempfile::Builder::new()
            .prefix("k0sctl-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(yaml.as_bytes())?;
        file.flush()?;
        debug!(path = %file.path().display(), "wrote k0sctl config");

        let name = blueprint.metadata.name.clone();
        Ok(Self {
            conn: Connection::new(kubeconfig, name.clone()),
            name,
            hosts: blueprint.hosts().to_vec(),
            inventory: file,
            runner,
        })
    }

    /// Path of the generated inventory
    pub fn inventory_path(&self) -> &Path {
        self.inventory.path()
    }

    fn k0sctl(&self, subcommand: &str) -> Invocation {
        Invocation::new(K0SCTL)
            .arg(subcommand)
            .arg("--config")
            .arg(self.inventory_path().display().to_string())
    }

    async fn apply(&self) -> Result<()> {
        run_checked(&self.runner, &self.k0sctl("apply").arg("--no-wait")).await?;
        Ok(())
    }

    async fn write_kubeconfig(&self) -> Result<()> {
        let output = run_checked(&self.runner, &self.k0sctl("kubeconfig")).await?;
        let generated = parse_kubeconfig(&output.stdout)?;
        merge_into_file(self.conn.kubeconfig(), generated)
    }

    fn declared_version<'a>(&self, blueprint: &'a Blueprint) -> Result<&'a str> {
        blueprint
            .version()
            .ok_or_else(|| Error::validation("kubernetes.version is required for k0s"))
    }
}

#[async_trait]
impl<R: CommandRunner> Provider for K0sProvider<R> {
    async fn install(&self) -> Result<()> {
        info!(cluster = %self.name, kubeconfig = %self.conn.kubeconfig().display(), "installing k0s cluster");
        self.apply()
            .await
            .map_err(|e| Error::provider(PROVIDER_K0S, format!("failed to install k0s: {}", e)))?;
        self.write_kubeconfig()
            .await
            .map_err(|e| Error::provider(PROVIDER_K0S, format!("failed to write kubeconfig: {}", e)))
    }

    async fn exists(&self) -> Result<bool> {
        let output = self.runner.run(&self.k0sctl("kubeconfig")).await?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(Error::provider_check(
                PROVIDER_K0S,
                format!("k0sctl kubeconfig exited with {:?}: {}", code, output.stderr.trim()),
            )),
        }
    }

    async fn refresh(&self) -> Result<()> {
        info!(cluster = %self.name, "refreshing k0s cluster");
        self.apply()
            .await
            .map_err(|e| Error::provider(PROVIDER_K0S, format!("k0sctl apply failed: {}", e)))
    }

    async fn upgrade(&self) -> Result<()> {
        info!(cluster = %self.name, "upgrading k0s cluster");
        self.apply()
            .await
            .map_err(|e| Error::provider(PROVIDER_K0S, format!("failed to upgrade k0s: {}", e)))
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

    async fn reset(&self, force: bool) -> Result<()> {
        info!(cluster = %self.name, force, "resetting k0s cluster");
        let mut inv = self.k0sctl("reset");
        if force {
            inv = inv.arg("--force");
        }
        run_checked(&self.runner, &inv)
            .await
            .map_err(|e| Error::provider(PROVIDER_K0S, format!("failed to reset k0s: {}", e)))?;
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        PROVIDER_K0S
    }

    fn kube_context(&self) -> String {
        self.name.clone()
    }

    async fn needs_upgrade(&self, blueprint: &Blueprint) -> Result<bool> {
        let declared = self.declared_version(blueprint)?;
        upgrade::needs_upgrade(&self.runner, &self.hosts, declared).await
    }

    async fn validate_upgrade(&self, blueprint: &Blueprint) -> Result<()> {
        let declared = self.declared_version(blueprint)?;
        upgrade::validate_upgrade(&self.runner, &self.hosts, declared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use mockall::Sequence;

    const BLUEPRINT: &str = r#"
apiVersion: blueprint.mirantis.com/v1alpha1
kind: Blueprint
metadata:
  name: prod
spec:
  kubernetes:
    provider: k0s
    version: 1.30.2+k0s.0
    config:
      spec:
        network:
          provider: calico
    infra:
      hosts:
        - ssh:
            address: 10.0.0.1
            keyPath: /keys/id
            user: root
          role: controller
          installFlags: ["--debug"]
        - ssh:
            address: 10.0.0.2
            keyPath: /keys/id
            user: root
            port: 2222
          role: worker
"#;

    const GENERATED: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: prod
  cluster:
    server: https://10.0.0.1:6443
users:
- name: admin
  user:
    token: abc
contexts:
- name: prod
  context:
    cluster: prod
    user: admin
current-context: prod
"#;

    fn blueprint() -> Blueprint {
        serde_yaml::from_str(BLUEPRINT).expect("valid blueprint")
    }

    #[test]
    fn inventory_carries_hosts_version_and_config() {
        let inv = inventory(&blueprint()).expect("inventory");
        assert_eq!(inv["apiVersion"], K0SCTL_API_VERSION);
        assert_eq!(inv["kind"], "Cluster");
        assert_eq!(inv["metadata"]["name"], "prod");
        assert_eq!(inv["spec"]["k0s"]["version"], "1.30.2+k0s.0");
        assert_eq!(inv["spec"]["k0s"]["dynamicConfig"], false);
        assert_eq!(inv["spec"]["k0s"]["config"]["spec"]["network"]["provider"], "calico");

        let hosts = inv["spec"]["hosts"].as_array().expect("hosts");
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0]["ssh"]["keyPath"], "/keys/id");
        assert_eq!(hosts[0]["ssh"]["port"], 22);
        assert_eq!(hosts[0]["installFlags"][0], "--debug");
        assert_eq!(hosts[1]["ssh"]["port"], 2222);
    }

    #[test]
    fn inventory_file_is_removed_on_drop() {
        let provider = K0sProvider::new(&blueprint(), Path::new("/tmp/kc"), MockCommandRunner::new())
            .expect("provider");
        let path = provider.inventory_path().to_path_buf();
        let written = std::fs::read_to_string(&path).expect("inventory written");
        assert!(written.contains(K0SCTL_API_VERSION));

        drop(provider);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn install_applies_then_merges_kubeconfig() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");

        let mut seq = Sequence::new();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.args.first().map(String::as_str) == Some("apply") && inv.args.last().map(String::as_str) == Some("--no-wait"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("")));
        runner
            .expect_run()
            .withf(|inv| inv.args.first().map(String::as_str) == Some("kubeconfig"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok(GENERATED)));

        let provider = K0sProvider::new(&blueprint(), &kubeconfig, runner).expect("provider");
        provider.install().await.expect("install");

        let merged = parse_kubeconfig(&std::fs::read_to_string(&kubeconfig).expect("written"))
            .expect("valid kubeconfig");
        assert_eq!(merged.current_context.as_deref(), Some("prod"));
        assert_eq!(merged.clusters.len(), 1);
    }

    #[tokio::test]
    async fn exists_maps_exit_codes() {
        for (code, expected) in [(0, Some(true)), (1, Some(false)), (2, None)] {
            let mut runner = MockCommandRunner::new();
            runner.expect_run().returning(move |_| {
                Ok(CommandOutput {
                    code: Some(code),
                    ..Default::default()
                })
            });
            let provider = K0sProvider::new(&blueprint(), Path::new("/tmp/kc"), runner).expect("provider");
            match expected {
                Some(exists) => assert_eq!(provider.exists().await.expect("verdict"), exists),
                None => assert!(matches!(
                    provider.exists().await,
                    Err(Error::ProviderCheck { .. })
                )),
            }
        }
    }

    #[tokio::test]
    async fn force_reset_passes_the_flag() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.args.first().map(String::as_str) == Some("reset") && inv.args.last().map(String::as_str) == Some("--force"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));

        let provider = K0sProvider::new(&blueprint(), Path::new("/tmp/kc"), runner).expect("provider");
        provider.reset(true).await.expect("reset");
        assert_eq!(provider.kube_context(), "prod");
    }

    #[tokio::test]
    async fn needs_upgrade_queries_the_first_controller() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.program == "ssh" && inv.args.iter().any(|a| a == "root@10.0.0.1"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("v1.29.4+k0s.0\n")));

        let provider = K0sProvider::new(&blueprint(), Path::new("/tmp/kc"), runner).expect("provider");
        assert!(provider.needs_upgrade(&blueprint()).await.expect("compared"));
    }
}
