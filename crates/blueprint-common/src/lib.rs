//! Shared building blocks for Blueprint: document model, errors, readiness
//! polling, the manifest engine and kubeconfig merging

#![deny(missing_docs)]

pub mod blueprint;
pub mod client;
pub mod error;
pub mod kubeconfig;
pub mod manifest;
pub mod readiness;
pub mod retry;
pub mod version;
pub mod yaml;

use std::time::Duration;

pub use blueprint::Blueprint;
pub use error::Error;
pub use manifest::{ClusterApi, KubeClusterApi, ManifestEngine};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace where the Blueprint operator and its components run
pub const BLUEPRINT_NAMESPACE: &str = "blueprint-system";

/// Name of the operator's controller deployment
pub const OPERATOR_DEPLOYMENT: &str = "blueprint-operator-controller-manager";

/// apiVersion of the cluster-side Blueprint, Addon and Manifest resources
pub const BLUEPRINT_API_VERSION: &str = "blueprint.mirantis.com/v1alpha1";

/// Namespace the Blueprint custom resource is written to
pub const BLUEPRINT_CR_NAMESPACE: &str = "default";

/// Namespace holding the cluster's own system pods
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Interval between cluster-wide readiness checks
pub const CLUSTER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for cluster-wide readiness waits
pub const CLUSTER_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound for one addon's dry-run install
pub const DRY_RUN_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Interval between checks for a dry-run pod
pub const DRY_RUN_POD_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between checks of a dry-run job's conditions
pub const DRY_RUN_JOB_INTERVAL: Duration = Duration::from_secs(5);
