//! CLI commands

use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tempfile::TempPath;
use tokio::net::TcpStream;
use tracing::{debug, info};

use blueprint_common::blueprint::OPERATOR_LATEST;
use blueprint_common::client::api_server_url;
use blueprint_common::manifest::{fetch_manifest, FILE_URI_PREFIX};
use blueprint_common::retry::{retry_with_backoff, RetryConfig};
use blueprint_common::version::parse_version;
use blueprint_common::{
    Blueprint, ClusterApi, ManifestEngine, BLUEPRINT_NAMESPACE, OPERATOR_DEPLOYMENT,
};
use blueprint_distro::{create_provider, BlueprintApplier, Provider};

use crate::config::{load_blueprint, resolve_kubeconfig};
use crate::{Error, Result};

pub mod apply;
pub mod init;
pub mod kubeconfig;
pub mod reset;
pub mod status;
pub mod update;
pub mod upgrade;
pub mod verify;
pub mod version;

/// Manifest of the newest operator release
pub const OPERATOR_LATEST_URI: &str =
    "https://github.com/mirantiscontainers/blueprint/releases/latest/download/blueprint-operator.yaml";

const OPERATOR_RELEASE_BASE: &str =
    "https://github.com/MirantisContainers/blueprint/releases/download";

const OPERATOR_MANIFEST_FILE: &str = "blueprint-operator.yaml";

/// Registry the published operator manifests pull their images from
pub const DEFAULT_IMAGE_REGISTRY: &str = "registry.mirantis.com";

const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// What every command starts from: the loaded Blueprint and the kubeconfig
/// its cluster is reached through
pub struct Context {
    pub blueprint: Blueprint,
    pub kubeconfig: PathBuf,
}

impl Context {
    pub fn load(config: &Path, kubeconfig: Option<&Path>) -> Result<Self> {
        let blueprint = load_blueprint(config)?;
        let kubeconfig = resolve_kubeconfig(kubeconfig, &blueprint)?;
        debug!(kubeconfig = %kubeconfig.display(), provider = %blueprint.provider(), "resolved context");
        Ok(Self {
            blueprint,
            kubeconfig,
        })
    }

    /// The provider declared by the Blueprint
    pub fn provider(&self) -> Result<Box<dyn Provider>> {
        Ok(create_provider(&self.blueprint, &self.kubeconfig)?)
    }
}

/// `Some(context)` unless the provider addresses the current context
pub fn context_of(provider: &dyn Provider) -> Option<String> {
    Some(provider.kube_context()).filter(|c| !c.is_empty())
}

/// Manifest URI for an operator release.
///
/// `latest` and semantic versions map onto the published release assets;
/// URLs and `file://` paths pass through unchanged.
pub fn operator_uri(version: &str) -> Result<String> {
    if version == OPERATOR_LATEST {
        return Ok(OPERATOR_LATEST_URI.to_string());
    }
    if ["http://", "https://", FILE_URI_PREFIX]
        .iter()
        .any(|scheme| version.starts_with(scheme))
    {
        return Ok(version.to_string());
    }
    let parsed = parse_version(version)
        .map_err(|_| Error::validation(format!("invalid operator version {:?}", version)))?;
    Ok(format!(
        "{}/v{}/{}",
        OPERATOR_RELEASE_BASE, parsed, OPERATOR_MANIFEST_FILE
    ))
}

/// Point every image of the default registry at `registry`
pub fn rewrite_registry(manifest: &str, registry: &str) -> String {
    manifest.replace(DEFAULT_IMAGE_REGISTRY, registry.trim_end_matches('/'))
}

/// Operator manifest ready to apply.
///
/// A registry-rewritten manifest lives in a temp file that is removed when
/// this value is dropped.
pub struct OperatorManifest {
    uri: String,
    _rewritten: Option<TempPath>,
}

impl OperatorManifest {
    pub async fn resolve(version: &str, image_registry: Option<&str>) -> Result<Self> {
        let uri = operator_uri(version)?;
        let registry = match image_registry {
            Some(r) if !r.is_empty() && r != DEFAULT_IMAGE_REGISTRY => r,
            _ => {
                return Ok(Self {
                    uri,
                    _rewritten: None,
                })
            }
        };

        info!(registry = %registry, "rewriting operator image registry");
        let body = fetch_manifest(&uri).await?;
        let mut file = tempfile::Builder::new()
            .prefix("bop-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(rewrite_registry(&body, registry).as_bytes())?;
        let path = file.into_temp_path();

        Ok(Self {
            uri: format!("{}{}", FILE_URI_PREFIX, path.display()),
            _rewritten: Some(path),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// The cluster-side changes the operator commands make
#[async_trait]
pub trait OperatorTarget: Send + Sync {
    /// Upsert every object of the manifest at `uri`
    async fn apply_manifest(&self, uri: &str) -> blueprint_common::Result<()>;

    /// Delete the Blueprint custom resource
    async fn delete_blueprint(&self, blueprint: &Blueprint) -> blueprint_common::Result<()>;
}

#[async_trait]
impl<C: ClusterApi> OperatorTarget for ManifestEngine<C> {
    async fn apply_manifest(&self, uri: &str) -> blueprint_common::Result<()> {
        self.apply(uri).await
    }

    async fn delete_blueprint(&self, blueprint: &Blueprint) -> blueprint_common::Result<()> {
        self.delete_objects(vec![blueprint.custom_resource()?]).await
    }
}

/// Whether the operator deployment is present
pub async fn operator_installed(client: &Client) -> Result<bool> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), BLUEPRINT_NAMESPACE);
    let found = deployments
        .get_opt(OPERATOR_DEPLOYMENT)
        .await
        .map_err(blueprint_common::Error::from)?;
    Ok(found.is_some())
}

/// Upsert the Blueprint custom resource
pub async fn apply_blueprint(client: Client, blueprint: &Blueprint) -> Result<()> {
    info!(blueprint = %blueprint.metadata.name, "applying blueprint");
    ManifestEngine::new(client).apply_blueprint(blueprint).await?;
    Ok(())
}

/// `host:port` of an API server URL, port 443 when none is given
pub fn server_address(server: &str) -> Result<String> {
    let rest = server.split_once("://").map_or(server, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(Error::validation(format!(
            "invalid API server address {:?}",
            server
        )));
    }

    let has_port = match authority.rfind(']') {
        Some(end) => authority[end..].contains(':'),
        None => authority.contains(':'),
    };
    if has_port {
        Ok(authority.to_string())
    } else {
        Ok(format!("{}:443", authority))
    }
}

/// Block until the API server accepts TCP connections
pub async fn wait_for_api(kubeconfig: &Path, context: Option<&str>) -> Result<()> {
    let address = server_address(&api_server_url(kubeconfig, context)?)?;
    info!(address = %address, "testing API server connectivity");

    retry_with_backoff(&RetryConfig::default(), "api server connectivity", || {
        let address = address.clone();
        async move {
            tokio::time::timeout(API_CONNECT_TIMEOUT, TcpStream::connect(&address))
                .await
                .map_err(|_| {
                    Error::command_failed(format!("timed out connecting to {}", address))
                })?
                .cmd_err()?;
            Ok::<_, Error>(())
        }
    })
    .await
}
