//! Kubeconfig merging
//!
//! Distributions that generate their own kubeconfig (k0sctl) have it folded
//! into the user's file: clusters, users and contexts are inserted or
//! overwritten by name, and the generated current-context always wins.
//!
//! The file is read-modify-written without locking. Two CLI invocations
//! against the same kubeconfig must not run concurrently.

use std::path::Path;

use kube::config::Kubeconfig;
use tracing::{debug, info};

use crate::{Error, Result};

/// Parse kubeconfig YAML
pub fn parse_kubeconfig(yaml: &str) -> Result<Kubeconfig> {
    Kubeconfig::from_yaml(yaml).map_err(|e| Error::decode(format!("invalid kubeconfig: {}", e)))
}

/// Fold `incoming` into `existing`.
pub fn merge_kubeconfig(mut existing: Kubeconfig, incoming: Kubeconfig) -> Kubeconfig {
    upsert_by_name(&mut existing.clusters, incoming.clusters, |c| c.name.as_str());
    upsert_by_name(&mut existing.auth_infos, incoming.auth_infos, |a| a.name.as_str());
    upsert_by_name(&mut existing.contexts, incoming.contexts, |c| c.name.as_str());
    if incoming.current_context.is_some() {
        existing.current_context = incoming.current_context;
    }
    existing
}

fn upsert_by_name<T>(target: &mut Vec<T>, incoming: Vec<T>, name: impl Fn(&T) -> &str) {
    for entry in incoming {
        match target.iter().position(|e| name(e) == name(&entry)) {
            Some(idx) => target[idx] = entry,
            None => target.push(entry),
        }
    }
}

/// Merge `incoming` into the kubeconfig at `path`, creating the file if needed.
pub fn merge_into_file(path: &Path, incoming: Kubeconfig) -> Result<()> {
    let merged = if path.exists() {
        let existing = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "merging into existing kubeconfig");
        merge_kubeconfig(parse_kubeconfig(&existing)?, incoming)
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        incoming
    };

    let yaml = serde_yaml::to_string(&merged).map_err(|e| {
        Error::internal_with_context("merge_into_file", format!("serialize kubeconfig: {}", e))
    })?;
    std::fs::write(path, yaml)?;
    info!(
        path = %path.display(),
        context = merged.current_context.as_deref().unwrap_or(""),
        "kubeconfig updated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXISTING: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: c1
  cluster:
    server: https://c1.example.com:6443
users:
- name: u1
  user:
    token: one
contexts:
- name: ctx1
  context:
    cluster: c1
    user: u1
current-context: ctx1
"#;

    const GENERATED: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: c2
  cluster:
    server: https://10.0.0.2:6443
users:
- name: u2
  user:
    token: two
contexts:
- name: ctx2
  context:
    cluster: c2
    user: u2
current-context: ctx2
"#;

    fn names<T>(items: &[T], name: impl Fn(&T) -> &str) -> Vec<&str> {
        items.iter().map(name).collect()
    }

    #[test]
    fn merge_keeps_old_entries_and_switches_context() {
        let merged = merge_kubeconfig(
            parse_kubeconfig(EXISTING).expect("existing"),
            parse_kubeconfig(GENERATED).expect("generated"),
        );

        assert_eq!(names(&merged.clusters, |c| c.name.as_str()), ["c1", "c2"]);
        assert_eq!(names(&merged.auth_infos, |a| a.name.as_str()), ["u1", "u2"]);
        assert_eq!(names(&merged.contexts, |c| c.name.as_str()), ["ctx1", "ctx2"]);
        assert_eq!(merged.current_context.as_deref(), Some("ctx2"));
    }

    #[test]
    fn entries_with_same_name_are_overwritten() {
        let replacement = GENERATED.replace("c2", "c1").replace("10.0.0.2", "10.9.9.9");
        let merged = merge_kubeconfig(
            parse_kubeconfig(EXISTING).expect("existing"),
            parse_kubeconfig(&replacement).expect("replacement"),
        );

        assert_eq!(merged.clusters.len(), 1);
        let server = merged.clusters[0]
            .cluster
            .as_ref()
            .and_then(|c| c.server.as_deref());
        assert_eq!(server, Some("https://10.9.9.9:6443"));
    }

    #[test]
    fn missing_file_is_written_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config");

        merge_into_file(&path, parse_kubeconfig(GENERATED).expect("generated"))
            .expect("write new file");

        let written = parse_kubeconfig(&std::fs::read_to_string(&path).expect("read back"))
            .expect("valid kubeconfig");
        assert_eq!(names(&written.clusters, |c| c.name.as_str()), ["c2"]);
        assert_eq!(written.current_context.as_deref(), Some("ctx2"));
    }

    #[test]
    fn existing_file_is_merged_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        std::fs::write(&path, EXISTING).expect("seed");

        merge_into_file(&path, parse_kubeconfig(GENERATED).expect("generated"))
            .expect("merge");

        let written = parse_kubeconfig(&std::fs::read_to_string(&path).expect("read back"))
            .expect("valid kubeconfig");
        assert_eq!(names(&written.contexts, |c| c.name.as_str()), ["ctx1", "ctx2"]);
        assert_eq!(written.current_context.as_deref(), Some("ctx2"));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            parse_kubeconfig("clusters: 7").unwrap_err(),
            Error::Decode { .. }
        ));
    }
}
