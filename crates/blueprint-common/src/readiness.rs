//! Bounded readiness polling
//!
//! [`wait_for`] and [`wait_until`] are the polling primitives every component
//! uses. A predicate error counts as "not ready yet": API servers routinely
//! refuse connections or return 5xx while a cluster is booting.

use std::future::Future;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, warn};

use crate::{Error, Result};

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

const POD_PHASE_RUNNING: &str = "Running";
const POD_PHASE_SUCCEEDED: &str = "Succeeded";

/// Poll `check` until it yields a value or `timeout` elapses.
///
/// The first call happens immediately, then once per `interval`. Each call is
/// itself bounded by the time remaining, so a hung API request cannot stretch
/// the wait past its deadline.
pub async fn wait_for<T, F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, check()).await {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => debug!("waiting for {}...", description),
            Ok(Err(e)) => warn!(error = %e, "waiting for {}: check failed, retrying", description),
            Err(_) => return Err(Error::timeout(description)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::timeout(description));
        }
        tokio::time::sleep(interval.min(remaining)).await;
    }
}

/// Poll `predicate` until it returns `Ok(true)` or `timeout` elapses.
///
/// Same schedule and error policy as [`wait_for`].
pub async fn wait_until<F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for(description, interval, timeout, move || {
        let ready = predicate();
        async move { Ok(ready.await?.then_some(())) }
    })
    .await
}

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Types that carry the standard `type`/`status` condition pair
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

macro_rules! impl_condition_fields {
    ($($ty:ty),+ $(,)?) => {
        $(impl HasConditionFields for $ty {
            fn type_field(&self) -> &str {
                &self.type_
            }
            fn status_field(&self) -> &str {
                &self.status
            }
        })+
    };
}

impl_condition_fields!(
    k8s_openapi::api::core::v1::NodeCondition,
    k8s_openapi::api::apps::v1::DeploymentCondition,
    k8s_openapi::api::batch::v1::JobCondition,
);

/// True when there is at least one node and every node is `Ready=True`.
pub fn nodes_ready(nodes: &[Node]) -> bool {
    !nodes.is_empty()
        && nodes.iter().all(|node| {
            let conditions = node.status.as_ref().and_then(|s| s.conditions.as_deref());
            has_condition(conditions, CONDITION_READY)
        })
}

/// True when there is at least one pod and every pod is Running or Succeeded.
pub fn pods_ready(pods: &[Pod]) -> bool {
    !pods.is_empty()
        && pods.iter().all(|pod| {
            matches!(
                pod_phase(pod),
                Some(POD_PHASE_RUNNING) | Some(POD_PHASE_SUCCEEDED)
            )
        })
}

/// The pod's reported phase, if any
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Wait until every node in the cluster is ready
pub async fn wait_for_nodes(client: &Client, interval: Duration, timeout: Duration) -> Result<()> {
    let nodes: Api<Node> = Api::all(client.clone());

    wait_until("nodes to be ready", interval, timeout, || async {
        let list = nodes.list(&ListParams::default()).await?;
        Ok(nodes_ready(&list.items))
    })
    .await
}

/// Wait until every pod in `namespace` (or the whole cluster) is running
pub async fn wait_for_pods(
    client: &Client,
    namespace: Option<&str>,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let pods: Api<Pod> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let description = match namespace {
        Some(ns) => format!("pods in {} to be ready", ns),
        None => "pods to be ready".to_string(),
    };

    wait_until(&description, interval, timeout, || async {
        let list = pods.list(&ListParams::default()).await?;
        Ok(pods_ready(&list.items))
    })
    .await
}
