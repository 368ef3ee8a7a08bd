//! Blueprint and kubeconfig resolution
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `spec.kubernetes.kubeconfig` in the Blueprint
//! 3. First path of the `KUBECONFIG` environment variable
//! 4. `~/.kube/config`

use std::path::{Path, PathBuf};

use tracing::debug;

use blueprint_common::Blueprint;

use crate::{Error, Result};

/// Blueprint file read when `--config` is not given
pub const DEFAULT_BLUEPRINT_FILE: &str = "blueprint.yaml";

/// Log level used when neither `--log-level` nor `RUST_LOG` is set
pub const DEFAULT_LOG_LEVEL: &str = "info";

const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Read, substitute and validate the Blueprint at `path`
pub fn load_blueprint(path: &Path) -> Result<Blueprint> {
    debug!(path = %path.display(), "loading blueprint");
    Ok(Blueprint::load(path)?)
}

/// Kubeconfig path for `blueprint`, following the resolution chain
pub fn resolve_kubeconfig(explicit: Option<&Path>, blueprint: &Blueprint) -> Result<PathBuf> {
    let declared = blueprint
        .spec
        .kubernetes
        .as_ref()
        .and_then(|k| k.kubeconfig.as_deref());

    resolve_kubeconfig_from(
        explicit,
        declared,
        std::env::var(KUBECONFIG_ENV).ok(),
        dirs::home_dir(),
    )
    .ok_or_else(|| Error::command_failed("could not determine home directory"))
}

fn resolve_kubeconfig_from(
    explicit: Option<&Path>,
    declared: Option<&str>,
    env: Option<String>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = declared.filter(|p| !p.is_empty()) {
        return Some(expand_home(path, home.as_deref()));
    }
    if let Some(first) = env
        .as_deref()
        .and_then(|v| std::env::split_paths(v).next())
        .filter(|p| !p.as_os_str().is_empty())
    {
        return Some(first);
    }
    home.map(|h| h.join(".kube").join("config"))
}

fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn home() -> Option<PathBuf> {
        Some(PathBuf::from("/home/op"))
    }

    #[test]
    fn explicit_flag_wins() {
        let path = resolve_kubeconfig_from(
            Some(Path::new("/flag/kc")),
            Some("/declared/kc"),
            Some("/env/kc".to_string()),
            home(),
        );
        assert_eq!(path, Some(PathBuf::from("/flag/kc")));
    }

    #[test]
    fn declared_path_beats_environment() {
        let path = resolve_kubeconfig_from(
            None,
            Some("~/clusters/kc"),
            Some("/env/kc".to_string()),
            home(),
        );
        assert_eq!(path, Some(PathBuf::from("/home/op/clusters/kc")));
    }

    #[test]
    fn environment_uses_first_path() {
        let path = resolve_kubeconfig_from(
            None,
            None,
            Some("/env/first:/env/second".to_string()),
            home(),
        );
        assert_eq!(path, Some(PathBuf::from("/env/first")));
    }

    #[test]
    fn falls_back_to_home_kube_config() {
        let path = resolve_kubeconfig_from(None, Some(""), Some(String::new()), home());
        assert_eq!(path, Some(PathBuf::from("/home/op/.kube/config")));
        assert_eq!(resolve_kubeconfig_from(None, None, None, None), None);
    }

    #[test]
    fn loads_and_validates_a_blueprint_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
apiVersion: blueprint.mirantis.com/v1alpha1
kind: Blueprint
metadata:
  name: demo
spec:
  kubernetes:
    provider: kind
    kubeconfig: /declared/kc
"#
        )
        .expect("write blueprint");

        let blueprint = load_blueprint(file.path()).expect("valid blueprint");
        assert_eq!(blueprint.metadata.name, "demo");
        let path = resolve_kubeconfig(None, &blueprint).expect("resolved");
        assert_eq!(path, PathBuf::from("/declared/kc"));
    }

    #[test]
    fn invalid_blueprint_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "apiVersion: v1\nkind: Pod\nmetadata:\n  name: x\n").expect("write");
        assert!(load_blueprint(file.path()).is_err());
    }
}
