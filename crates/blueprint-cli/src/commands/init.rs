//! Init command - Print a starter Blueprint
//!
//! Usage: bctl init [--kind]
//!
//! With `--kind` the template targets a local kind cluster. Otherwise
//! `k0sctl init` generates the host inventory and k0s settings, which are
//! carried over into a k0s Blueprint.

use clap::Args;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use blueprint_common::blueprint::{
    Addon, BlueprintSpec, ChartInfo, Components, Host, Infra, Kubernetes, Metadata, SshHost,
    ADDON_CHART, KIND_BLUEPRINT, PROVIDER_K0S, PROVIDER_KIND,
};
use blueprint_common::{Blueprint, BLUEPRINT_API_VERSION};
use blueprint_distro::exec::run_checked;
use blueprint_distro::{CommandRunner, Invocation, ProcessRunner};

use crate::{Error, Result};

/// Name given to kind templates
pub const KIND_CLUSTER_NAME: &str = "blueprint-cluster";

const K0SCTL: &str = "k0sctl";
const DEFAULT_SSH_USER: &str = "root";
const DEFAULT_SSH_PORT: u16 = 22;

/// Print a Blueprint template
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Template a local kind cluster instead of a k0s one
    #[arg(long)]
    pub kind: bool,
}

pub async fn run(args: InitArgs) -> Result<()> {
    let blueprint = if args.kind {
        kind_template(KIND_CLUSTER_NAME)
    } else {
        k0s_template(&ProcessRunner).await?
    };
    print!("{}", encode(&blueprint)?);
    Ok(())
}

fn encode(blueprint: &Blueprint) -> Result<String> {
    serde_yaml::to_string(blueprint)
        .map_err(|e| Error::command_failed(format!("failed to encode blueprint: {}", e)))
}

/// Kind Blueprint with the starter addons
pub fn kind_template(name: &str) -> Blueprint {
    template(
        name,
        Kubernetes {
            provider: PROVIDER_KIND.to_string(),
            ..Default::default()
        },
    )
}

/// Run `k0sctl init` and convert its cluster document
pub async fn k0s_template<R>(runner: &R) -> Result<Blueprint>
where
    R: CommandRunner + ?Sized,
{
    let output = run_checked(runner, &Invocation::new(K0SCTL).arg("init")).await?;
    from_k0sctl(&output.stdout)
}

/// Blueprint equivalent of a k0sctl cluster document
pub fn from_k0sctl(document: &str) -> Result<Blueprint> {
    let cluster: K0sctlCluster = serde_yaml::from_str(document)
        .map_err(|e| Error::validation(format!("invalid k0sctl cluster document: {}", e)))?;
    debug!(name = %cluster.metadata.name, hosts = cluster.spec.hosts.len(), "parsed k0sctl cluster");

    let hosts = cluster.spec.hosts.into_iter().map(Host::from).collect();
    Ok(template(
        &cluster.metadata.name,
        Kubernetes {
            provider: PROVIDER_K0S.to_string(),
            version: cluster.spec.k0s.version,
            config: cluster.spec.k0s.config,
            infra: Some(Infra { hosts }),
            ..Default::default()
        },
    ))
}

fn template(name: &str, kubernetes: Kubernetes) -> Blueprint {
    Blueprint {
        api_version: BLUEPRINT_API_VERSION.to_string(),
        kind: KIND_BLUEPRINT.to_string(),
        metadata: Metadata {
            name: name.to_string(),
        },
        spec: BlueprintSpec {
            version: None,
            kubernetes: Some(kubernetes),
            components: Components {
                addons: starter_addons(),
            },
        },
    }
}

fn starter_addons() -> Vec<Addon> {
    vec![Addon {
        name: "example-server".to_string(),
        kind: ADDON_CHART.to_string(),
        enabled: true,
        dry_run: false,
        namespace: "default".to_string(),
        chart: Some(ChartInfo {
            name: "nginx".to_string(),
            repo: "https://charts.bitnami.com/bitnami".to_string(),
            version: "15.1.1".to_string(),
            set: Default::default(),
            values: Some(json!({ "service": { "type": "ClusterIP" } })),
        }),
        manifest: None,
    }]
}

#[derive(Deserialize)]
struct K0sctlCluster {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: K0sctlSpec,
}

#[derive(Default, Deserialize)]
struct K0sctlSpec {
    #[serde(default)]
    hosts: Vec<K0sctlHost>,
    #[serde(default)]
    k0s: K0sctlK0s,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct K0sctlHost {
    ssh: Option<K0sctlSsh>,
    #[serde(default)]
    role: String,
    #[serde(default)]
    install_flags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct K0sctlSsh {
    address: String,
    user: Option<String>,
    port: Option<u16>,
    key_path: Option<String>,
}

#[derive(Default, Deserialize)]
struct K0sctlK0s {
    version: Option<String>,
    config: Option<Value>,
}

impl From<K0sctlHost> for Host {
    fn from(host: K0sctlHost) -> Self {
        Host {
            ssh: host.ssh.map(|ssh| SshHost {
                address: ssh.address,
                key_path: ssh.key_path.unwrap_or_default(),
                port: ssh.port.unwrap_or(DEFAULT_SSH_PORT),
                user: ssh.user.unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            }),
            localhost: None,
            role: host.role,
            install_flags: host.install_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blueprint_distro::CommandOutput;
    use std::sync::Mutex;

    const K0SCTL_INIT: &str = r#"apiVersion: k0sctl.k0sproject.io/v1beta1
kind: Cluster
metadata:
  name: k0s-cluster
spec:
  hosts:
  - ssh:
      address: 10.0.0.1
      user: root
      port: 22
      keyPath: null
    role: controller
  - ssh:
      address: 10.0.0.2
      user: ubuntu
      port: 2222
      keyPath: ~/.ssh/id_ed25519
    role: worker
    installFlags:
    - --debug
  k0s:
    version: 1.29.2+k0s.0
    dynamicConfig: false
    config:
      spec:
        network:
          provider: calico
"#;

    /// Replays one canned output and remembers what was run
    struct CannedRunner {
        output: CommandOutput,
        seen: Mutex<Vec<String>>,
    }

    impl CannedRunner {
        fn new(output: CommandOutput) -> Self {
            Self {
                output,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for CannedRunner {
        async fn run(&self, invocation: &Invocation) -> blueprint_common::Result<CommandOutput> {
            self.seen.lock().expect("seen lock").push(invocation.to_string());
            Ok(self.output.clone())
        }
    }

    #[test]
    fn kind_template_is_valid() {
        let bp = kind_template(KIND_CLUSTER_NAME);
        assert_eq!(bp.metadata.name, "blueprint-cluster");
        assert_eq!(bp.provider(), PROVIDER_KIND);
        assert!(bp.spec.kubernetes.as_ref().and_then(|k| k.infra.as_ref()).is_none());
        bp.validate().expect("template validates");
    }

    #[test]
    fn template_survives_a_yaml_round_trip() {
        let encoded = encode(&kind_template("demo")).expect("encodes");
        assert!(encoded.contains("apiVersion: blueprint.mirantis.com/v1alpha1"));
        assert!(encoded.contains("name: example-server"));

        let decoded: Blueprint = serde_yaml::from_str(&encoded).expect("decodes");
        assert_eq!(decoded, kind_template("demo"));
    }

    #[tokio::test]
    async fn k0sctl_document_becomes_a_k0s_blueprint() {
        let runner = CannedRunner::new(CommandOutput::ok(K0SCTL_INIT));
        let bp = k0s_template(&runner).await.expect("converted");

        assert_eq!(*runner.seen.lock().expect("seen lock"), ["k0sctl init"]);
        assert_eq!(bp.metadata.name, "k0s-cluster");
        assert_eq!(bp.provider(), PROVIDER_K0S);
        assert_eq!(bp.version(), Some("1.29.2+k0s.0"));

        let k8s = bp.spec.kubernetes.as_ref().expect("kubernetes");
        assert_eq!(
            k8s.config.as_ref().expect("config")["spec"]["network"]["provider"],
            "calico"
        );

        let hosts = &k8s.infra.as_ref().expect("infra").hosts;
        assert_eq!(hosts.len(), 2);
        let first = hosts[0].ssh.as_ref().expect("ssh");
        assert_eq!((first.address.as_str(), first.port), ("10.0.0.1", 22));
        assert_eq!(first.key_path, "");
        let second = hosts[1].ssh.as_ref().expect("ssh");
        assert_eq!(second.user, "ubuntu");
        assert_eq!(second.port, 2222);
        assert_eq!(hosts[1].role, "worker");
        assert_eq!(hosts[1].install_flags, ["--debug"]);

        assert_eq!(bp.spec.components.addons.len(), 1);
        assert_eq!(bp.spec.components.addons[0].name, "example-server");
    }

    #[tokio::test]
    async fn failing_k0sctl_surfaces_its_stderr() {
        let runner = CannedRunner::new(CommandOutput::failed(1, "k0sctl: unknown flag"));
        let err = k0s_template(&runner).await.unwrap_err();
        assert!(err.to_string().contains("unknown flag"));
    }

    #[test]
    fn garbage_from_k0sctl_is_rejected() {
        let err = from_k0sctl("spec: [not, a, mapping]").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
