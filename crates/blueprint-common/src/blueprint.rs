//! Blueprint document model
//!
//! A Blueprint declares which distribution provisions the cluster and which
//! addons the in-cluster operator should reconcile. The document is loaded
//! from YAML (with `${VAR}` environment substitution), validated once, and
//! then passed explicitly to every command.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::version::parse_version;
use crate::{Error, Result, BLUEPRINT_API_VERSION, BLUEPRINT_CR_NAMESPACE};

/// Document kind accepted at the top level
pub const KIND_BLUEPRINT: &str = "Blueprint";

/// k0s distribution
pub const PROVIDER_K0S: &str = "k0s";
/// kind distribution
pub const PROVIDER_KIND: &str = "kind";
/// Pre-provisioned cluster
pub const PROVIDER_EXISTING: &str = "existing";

/// Operator release alias for the newest published manifest
pub const OPERATOR_LATEST: &str = "latest";

/// Helm chart addon
pub const ADDON_CHART: &str = "chart";
/// Raw manifest addon
pub const ADDON_MANIFEST: &str = "manifest";

const PROVIDERS: &[&str] = &[PROVIDER_K0S, PROVIDER_KIND, PROVIDER_EXISTING];
const HOST_ROLES: &[&str] = &["single", "controller", "worker", "controller+worker"];

/// Top-level Blueprint document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    /// Document apiVersion
    pub api_version: String,
    /// Always `Blueprint`
    pub kind: String,
    /// Name of the cluster
    pub metadata: Metadata,
    /// Desired state
    pub spec: BlueprintSpec,
}

/// Blueprint metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// Cluster name
    pub name: String,
}

/// Blueprint spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BlueprintSpec {
    /// Operator release: `latest`, a semantic version or a manifest URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Distribution settings; absent means an existing cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<Kubernetes>,
    /// Addons reconciled by the operator
    #[serde(default)]
    pub components: Components,
}

/// Distribution settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kubernetes {
    /// `k0s`, `kind` or `existing`
    pub provider: String,
    /// Desired distribution version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form distribution config (kind cluster config, k0s config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Hosts for SSH-orchestrated distributions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<Infra>,
    /// Kubeconfig to use instead of the default
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "kubeConfig")]
    pub kubeconfig: Option<String>,
}

/// Host inventory
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Infra {
    /// Cluster machines
    #[serde(default)]
    pub hosts: Vec<Host>,
}

/// One cluster machine
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// SSH connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshHost>,
    /// Marks the machine running the CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localhost: Option<LocalHost>,
    /// `single`, `controller`, `worker` or `controller+worker`
    pub role: String,
    /// Extra flags for the distribution installer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_flags: Vec<String>,
}

impl Host {
    /// Whether the host runs a control plane
    pub fn is_controller(&self) -> bool {
        self.role.contains("controller")
    }

    /// Whether the host is the machine running the CLI
    pub fn is_local(&self) -> bool {
        self.localhost.as_ref().is_some_and(|l| l.enabled)
    }
}

/// SSH connection details
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshHost {
    /// Hostname or IP
    pub address: String,
    /// Private key file
    pub key_path: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user
    pub user: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Localhost marker
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LocalHost {
    /// Whether the host is the local machine
    pub enabled: bool,
}

/// Addon list
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Components {
    /// Addons to install
    #[serde(default)]
    pub addons: Vec<Addon>,
}

/// One installable addon
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    /// Addon name
    pub name: String,
    /// `chart` or `manifest`
    pub kind: String,
    /// Whether the operator should install it
    #[serde(default)]
    pub enabled: bool,
    /// Install in dry-run mode
    #[serde(default)]
    pub dry_run: bool,
    /// Target namespace
    #[serde(default)]
    pub namespace: String,
    /// Helm chart payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartInfo>,
    /// Manifest payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestInfo>,
}

impl Addon {
    /// Whether the addon is a Helm chart
    pub fn is_chart(&self) -> bool {
        self.kind.eq_ignore_ascii_case(ADDON_CHART)
    }
}

/// Helm chart payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartInfo {
    /// Chart name
    pub name: String,
    /// Chart repository URL
    pub repo: String,
    /// Chart version
    pub version: String,
    /// `--set` style overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, Value>,
    /// Values document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

/// Manifest payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    /// Manifest URL
    pub url: String,
    /// Operator failure policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,
    /// Operator timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Kustomize-style values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

impl Blueprint {
    /// Read, substitute and validate a Blueprint file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!("failed to read blueprint {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate Blueprint YAML
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env(raw, |name| std::env::var(name).ok());
        let blueprint: Blueprint = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::decode(format!("invalid blueprint: {}", e)))?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    /// Check structural rules that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.api_version.is_empty() {
            return Err(Error::validation("apiVersion field cannot be left blank"));
        }
        if self.kind != KIND_BLUEPRINT {
            return Err(Error::validation(format!("invalid blueprint kind: {:?}", self.kind)));
        }
        if self.metadata.name.is_empty() {
            return Err(Error::validation("metadata.name field cannot be left blank"));
        }
        if let Some(k8s) = &self.spec.kubernetes {
            k8s.validate()?;
        }
        for addon in &self.spec.components.addons {
            addon.validate()?;
        }
        Ok(())
    }

    /// Declared provider, `existing` when no kubernetes block is present
    pub fn provider(&self) -> &str {
        self.spec
            .kubernetes
            .as_ref()
            .map(|k| k.provider.as_str())
            .unwrap_or(PROVIDER_EXISTING)
    }

    /// Declared operator release, `latest` when unset
    pub fn operator_version(&self) -> &str {
        self.spec.version.as_deref().unwrap_or(OPERATOR_LATEST)
    }

    /// Declared distribution version
    pub fn version(&self) -> Option<&str> {
        self.spec.kubernetes.as_ref()?.version.as_deref()
    }

    /// Inventory hosts (empty when none are declared)
    pub fn hosts(&self) -> &[Host] {
        self.spec
            .kubernetes
            .as_ref()
            .and_then(|k| k.infra.as_ref())
            .map(|i| i.hosts.as_slice())
            .unwrap_or(&[])
    }

    /// A copy keeping only dry-run chart addons
    pub fn dry_run_only(&self) -> Self {
        let mut copy = self.clone();
        copy.spec
            .components
            .addons
            .retain(|a| a.dry_run && a.is_chart());
        copy
    }

    /// A copy with every addon removed
    pub fn without_addons(&self) -> Self {
        let mut copy = self.clone();
        copy.spec.components.addons.clear();
        copy
    }

    /// The cluster-side Blueprint object the operator reconciles
    pub fn custom_resource(&self) -> Result<Value> {
        let addons = self
            .spec
            .components
            .addons
            .iter()
            .map(Addon::custom_resource_spec)
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({
            "apiVersion": BLUEPRINT_API_VERSION,
            "kind": KIND_BLUEPRINT,
            "metadata": {
                "name": self.metadata.name,
                "namespace": BLUEPRINT_CR_NAMESPACE,
            },
            "spec": {
                "components": {
                    "addons": addons,
                },
            },
        }))
    }
}

impl Kubernetes {
    fn validate(&self) -> Result<()> {
        if self.provider.is_empty() {
            return Err(Error::validation("kubernetes.provider field cannot be left blank"));
        }
        if !PROVIDERS.contains(&self.provider.as_str()) {
            return Err(Error::validation(format!(
                "invalid kubernetes.provider: {} (valid values: {})",
                self.provider,
                PROVIDERS.join(", ")
            )));
        }
        if let Some(version) = &self.version {
            parse_version(version)
                .map_err(|_| Error::validation(format!("invalid kubernetes.version: {}", version)))?;
        }
        if let Some(path) = &self.kubeconfig {
            if !Path::new(path).exists() {
                return Err(Error::validation(format!(
                    "kubernetes.kubeconfig file {:?} does not exist",
                    path
                )));
            }
        }
        if let Some(infra) = &self.infra {
            for host in &infra.hosts {
                host.validate()?;
            }
        }
        if self.provider == PROVIDER_K0S {
            if self.version.is_none() {
                return Err(Error::validation("kubernetes.version is required for k0s"));
            }
            if self.infra.as_ref().map_or(true, |i| i.hosts.is_empty()) {
                return Err(Error::validation("k0s requires at least one host in kubernetes.infra.hosts"));
            }
        }
        Ok(())
    }
}

impl Host {
    fn validate(&self) -> Result<()> {
        if let Some(ssh) = &self.ssh {
            if !is_valid_host_address(&ssh.address) {
                return Err(Error::validation(format!("invalid hosts.ssh.address: {:?}", ssh.address)));
            }
            if ssh.key_path.is_empty() {
                return Err(Error::validation("hosts.ssh.keyPath field cannot be left empty"));
            }
            if !Path::new(&ssh.key_path).exists() {
                return Err(Error::validation(format!("hosts.ssh.keyPath does not exist: {}", ssh.key_path)));
            }
            if ssh.port == 0 {
                return Err(Error::validation("hosts.ssh.port outside of valid range 1-65535"));
            }
            if ssh.user.is_empty() {
                return Err(Error::validation("hosts.ssh.user cannot be left empty"));
            }
        }
        if self.role.is_empty() {
            return Err(Error::validation("hosts.role field cannot be left blank"));
        }
        if !HOST_ROLES.contains(&self.role.as_str()) {
            return Err(Error::validation(format!(
                "invalid hosts.role: {} (valid values: {})",
                self.role,
                HOST_ROLES.join(", ")
            )));
        }
        Ok(())
    }
}

impl Addon {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("addons.name field cannot be left blank"));
        }
        let kind = self.kind.to_ascii_lowercase();
        if kind != ADDON_CHART && kind != ADDON_MANIFEST {
            return Err(Error::validation(format!(
                "{}: addons.kind field is an invalid kind: {:?}",
                self.name, self.kind
            )));
        }
        match (&self.chart, &self.manifest) {
            (Some(_), Some(_)) => Err(Error::validation(format!(
                "{}: addon cannot contain both a chart and a manifest",
                self.name
            ))),
            (None, None) => Err(Error::validation(format!(
                "{}: addon must contain a chart or manifest",
                self.name
            ))),
            (Some(chart), None) if kind == ADDON_CHART => {
                for (field, value) in [("name", &chart.name), ("repo", &chart.repo), ("version", &chart.version)] {
                    if value.is_empty() {
                        return Err(Error::validation(format!(
                            "{}: chart.{} field cannot be left blank",
                            self.name, field
                        )));
                    }
                }
                Ok(())
            }
            (None, Some(manifest)) if kind == ADDON_MANIFEST => {
                if manifest.url.is_empty() {
                    return Err(Error::validation(format!(
                        "{}: manifest.url field cannot be left blank",
                        self.name
                    )));
                }
                Ok(())
            }
            _ => Err(Error::validation(format!(
                "{}: addon.kind specified as a {} but no {} information provided",
                self.name, kind, kind
            ))),
        }
    }

    fn custom_resource_spec(&self) -> Result<Value> {
        let mut spec = json!({
            "name": self.name,
            "kind": self.kind,
            "enabled": self.enabled,
            "dryRun": self.dry_run,
            "namespace": self.namespace,
        });

        if let Some(chart) = &self.chart {
            let values = match &chart.values {
                Some(v) => serde_yaml::to_string(v)
                    .map_err(|e| Error::decode(format!("{}: chart values: {}", self.name, e)))?,
                None => String::new(),
            };
            spec["chart"] = json!({
                "name": chart.name,
                "repo": chart.repo,
                "version": chart.version,
                "set": chart.set,
                "values": values,
            });
        }
        if let Some(manifest) = &self.manifest {
            spec["manifest"] = serde_json::to_value(manifest)
                .map_err(|e| Error::decode(format!("{}: manifest: {}", self.name, e)))?;
        }
        Ok(spec)
    }
}

/// Hostname labels or an IPv4 address
fn is_valid_host_address(address: &str) -> bool {
    !address.is_empty()
        && address.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Replace `${NAME}` references using `lookup`; unknown names become empty.
pub fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
