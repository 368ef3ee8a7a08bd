//! Kubernetes client construction from a kubeconfig file

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client for `context` (or the current context) of the kubeconfig at `path`
pub async fn create_client(path: &Path, context: Option<&str>) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        Error::internal_with_context(
            "create_client",
            format!("failed to read kubeconfig {}: {}", path.display(), e),
        )
    })?;
    let options = KubeConfigOptions {
        context: context.filter(|c| !c.is_empty()).map(str::to_string),
        ..Default::default()
    };

    let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to load kubeconfig: {}", e))
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// API server URL for `context` (or the current context) of the kubeconfig at `path`
pub fn api_server_url(path: &Path, context: Option<&str>) -> Result<String> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        Error::internal_with_context(
            "api_server_url",
            format!("failed to read kubeconfig {}: {}", path.display(), e),
        )
    })?;
    server_for_context(&kubeconfig, context).ok_or_else(|| {
        Error::internal_with_context(
            "api_server_url",
            format!("no API server for context {:?} in {}", context, path.display()),
        )
    })
}

fn server_for_context(kubeconfig: &Kubeconfig, context: Option<&str>) -> Option<String> {
    let context_name = context
        .filter(|c| !c.is_empty())
        .or(kubeconfig.current_context.as_deref())?;
    let cluster_name = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == context_name)?
        .context
        .as_ref()?
        .cluster
        .clone();
    kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)?
        .cluster
        .as_ref()?
        .server
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::parse_kubeconfig;

    const CONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: kind-demo
  cluster:
    server: https://127.0.0.1:39000
- name: prod
  cluster:
    server: https://prod.example.com:6443
contexts:
- name: kind-demo
  context:
    cluster: kind-demo
    user: kind-demo
- name: prod
  context:
    cluster: prod
    user: admin
current-context: kind-demo
"#;

    #[test]
    fn current_context_is_used_when_none_given() {
        let kc = parse_kubeconfig(CONFIG).expect("valid");
        assert_eq!(
            server_for_context(&kc, None).as_deref(),
            Some("https://127.0.0.1:39000")
        );
        assert_eq!(
            server_for_context(&kc, Some("")).as_deref(),
            Some("https://127.0.0.1:39000")
        );
    }

    #[test]
    fn explicit_context_wins() {
        let kc = parse_kubeconfig(CONFIG).expect("valid");
        assert_eq!(
            server_for_context(&kc, Some("prod")).as_deref(),
            Some("https://prod.example.com:6443")
        );
        assert_eq!(server_for_context(&kc, Some("missing")), None);
    }

    #[test]
    fn api_server_url_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        std::fs::write(&path, CONFIG).expect("write");
        assert_eq!(
            api_server_url(&path, Some("prod")).expect("found"),
            "https://prod.example.com:6443"
        );
    }
}
