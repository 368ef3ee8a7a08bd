//! Addon dry-run verification
//!
//! Chart addons marked `dryRun` are handed to the operator, which runs one
//! `helm-install-<chart>` Job per addon in dry-run mode. Every addon is then
//! tracked concurrently: wait for its Job pod to leave `Pending`, capture the
//! pod's logs to a temp file (best effort), and wait for the Job to report `Complete` or
//! `Failed`. One addon timing out or failing never affects the others.
//!
//! The Blueprint is re-applied without addons afterwards so the operator
//! removes the dry-run objects, whether or not verification succeeded.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use blueprint_common::blueprint::Addon;
use blueprint_common::readiness::{has_condition, pod_phase, wait_for};
use blueprint_common::{
    Blueprint, ClusterApi, Error, ManifestEngine, Result, DRY_RUN_JOB_INTERVAL,
    DRY_RUN_POD_INTERVAL, DRY_RUN_TIMEOUT,
};

use crate::provider::Provider;

/// Label the Job controller puts on every pod it creates
pub const JOB_NAME_LABEL: &str = "batch.kubernetes.io/job-name";

const JOB_COMPLETE: &str = "Complete";
const JOB_FAILED: &str = "Failed";
const POD_PENDING: &str = "Pending";

/// Name of the operator's install Job for a chart
pub fn install_job_name(chart: &str) -> String {
    format!("helm-install-{}", chart)
}

/// Read access to install Jobs and their pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobClient: Send + Sync {
    /// First pod created for `job` in `namespace`
    async fn job_pod(&self, namespace: &str, job: &str) -> Result<Option<Pod>>;

    /// Follow a pod's logs until the container exits
    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String>;

    /// The Job, if it exists
    async fn job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
}

/// [`JobClient`] backed by the Kubernetes API
pub struct KubeJobClient {
    client: Client,
}

impl KubeJobClient {
    /// Wrap an API client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobClient for KubeJobClient {
    async fn job_pod(&self, namespace: &str, job: &str) -> Result<Option<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", JOB_NAME_LABEL, job);
        let list = pods.list(&ListParams::default().labels(&selector).limit(1)).await?;
        Ok(list.items.into_iter().next())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow: true,
            ..Default::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }

    async fn job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(jobs.get_opt(name).await?)
    }
}

/// Pushes a Blueprint to the cluster for the operator to reconcile
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlueprintApplier: Send + Sync {
    /// Upsert the Blueprint custom resource
    async fn apply_blueprint(&self, blueprint: &Blueprint) -> Result<()>;
}

#[async_trait]
impl<C: ClusterApi> BlueprintApplier for ManifestEngine<C> {
    async fn apply_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        self.apply_objects(vec![blueprint.custom_resource()?]).await
    }
}

/// Poll intervals and the per-stage time limit
#[derive(Clone, Copy, Debug)]
pub struct VerifySchedule {
    /// Interval between looks for the Job pod
    pub pod_interval: Duration,
    /// Interval between reads of the Job's conditions
    pub job_interval: Duration,
    /// Limit for each of the two waits
    pub timeout: Duration,
}

impl Default for VerifySchedule {
    fn default() -> Self {
        Self {
            pod_interval: DRY_RUN_POD_INTERVAL,
            job_interval: DRY_RUN_JOB_INTERVAL,
            timeout: DRY_RUN_TIMEOUT,
        }
    }
}

/// Result of one addon's dry run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The install Job completed
    Succeeded,
    /// The Job failed, or its logs could not be captured
    Failed(String),
    /// A wait ran out of time
    TimedOut(String),
}

impl Outcome {
    /// Whether the addon passed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::TimedOut(stage) => write!(f, "timed out {}", stage),
        }
    }
}

/// Verification record for one addon
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddonVerification {
    /// Addon name from the Blueprint
    pub addon: String,
    /// Install Job that was tracked
    pub job: String,
    /// Pod whose logs were captured
    pub pod: Option<String>,
    /// Where the dry-run output was written
    pub log_file: Option<PathBuf>,
    /// How it ended
    pub outcome: Outcome,
}

/// Dry-run every `dryRun` chart addon and report each one.
///
/// Fails without touching the cluster if it does not exist yet. Otherwise
/// the addon-free Blueprint is re-applied before returning, even when the
/// dry-run apply itself failed.
pub async fn verify_addons<J, A>(
    provider: &dyn Provider,
    applier: &A,
    jobs: &J,
    blueprint: &Blueprint,
    schedule: &VerifySchedule,
) -> Result<Vec<AddonVerification>>
where
    J: JobClient + ?Sized,
    A: BlueprintApplier + ?Sized,
{
    if !provider.exists().await? {
        return Err(Error::provider(
            provider.provider_type(),
            "cluster must be installed to verify addons, try applying a blueprint with no addons first",
        ));
    }

    for addon in &blueprint.spec.components.addons {
        if addon.dry_run && !addon.is_chart() {
            warn!(addon = %addon.name, "Manifest validation not available, manifest will not be verified");
        }
    }

    let dry_run = blueprint.dry_run_only();
    if dry_run.spec.components.addons.is_empty() {
        info!("no chart addons marked for dry run");
        return Ok(Vec::new());
    }

    let result = run_dry_run(applier, jobs, &dry_run, schedule).await;

    if let Err(e) = applier.apply_blueprint(&blueprint.without_addons()).await {
        error!(error = %e, "failed to remove dry-run addons");
    }
    result
}

async fn run_dry_run<J, A>(
    applier: &A,
    jobs: &J,
    dry_run: &Blueprint,
    schedule: &VerifySchedule,
) -> Result<Vec<AddonVerification>>
where
    J: JobClient + ?Sized,
    A: BlueprintApplier + ?Sized,
{
    applier.apply_blueprint(dry_run).await?;

    let checks = dry_run
        .spec
        .components
        .addons
        .iter()
        .map(|addon| verify_addon(jobs, addon, schedule));
    Ok(join_all(checks).await)
}

async fn verify_addon<J>(jobs: &J, addon: &Addon, schedule: &VerifySchedule) -> AddonVerification
where
    J: JobClient + ?Sized,
{
    let chart = addon.chart.as_ref().map(|c| c.name.as_str()).unwrap_or(&addon.name);
    let job = install_job_name(chart);
    let mut record = AddonVerification {
        addon: addon.name.clone(),
        job: job.clone(),
        pod: None,
        log_file: None,
        outcome: Outcome::Succeeded,
    };
    info!(addon = %addon.name, chart = %chart, "verifying chart addon");

    let pod = match wait_for_started_pod(jobs, &addon.namespace, &job, schedule).await {
        Ok(pod) => pod,
        Err(e) => {
            record.outcome = classify(e, "waiting for the install pod");
            warn!(addon = %addon.name, outcome = %record.outcome, "verification stopped");
            return record;
        }
    };
    record.pod = Some(pod.clone());

    match capture_logs(jobs, &addon.namespace, &pod, chart).await {
        Ok(path) => record.log_file = Some(path),
        Err(e) => warn!(addon = %addon.name, error = %e, "could not capture dry-run logs"),
    }

    record.outcome = match wait_for_job_result(jobs, &addon.namespace, &job, schedule).await {
        Ok(true) => Outcome::Succeeded,
        Ok(false) => Outcome::Failed(format!("job {} failed", job)),
        Err(e) => classify(e, "waiting for the install job"),
    };

    let log_file = record
        .log_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    if record.outcome.is_success() {
        info!(addon = %addon.name, log_file = %log_file, "verification completed");
    } else {
        error!(addon = %addon.name, outcome = %record.outcome, log_file = %log_file, "verification failed");
    }
    record
}

fn classify(err: Error, stage: &str) -> Outcome {
    if err.is_timeout() {
        Outcome::TimedOut(stage.to_string())
    } else {
        Outcome::Failed(err.to_string())
    }
}

async fn wait_for_started_pod<J>(
    jobs: &J,
    namespace: &str,
    job: &str,
    schedule: &VerifySchedule,
) -> Result<String>
where
    J: JobClient + ?Sized,
{
    let description = format!("pod of job {}/{}", namespace, job);
    wait_for(&description, schedule.pod_interval, schedule.timeout, || async {
        let pod = match jobs.job_pod(namespace, job).await? {
            Some(pod) => pod,
            None => return Ok(None),
        };
        let started = matches!(pod_phase(&pod), Some(phase) if phase != POD_PENDING);
        if !started {
            debug!(job = %job, "install pod still pending");
            return Ok(None);
        }
        Ok(pod.metadata.name)
    })
    .await
}

async fn capture_logs<J>(jobs: &J, namespace: &str, pod: &str, chart: &str) -> Result<PathBuf>
where
    J: JobClient + ?Sized,
{
    let logs = jobs.pod_logs(namespace, pod).await?;

    let mut file = tempfile::Builder::new()
        .prefix(&format!("{}-dry-run-", chart))
        .suffix(".log")
        .tempfile()?;
    file.write_all(logs.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

/// `Ok(true)` once the Job is Complete, `Ok(false)` once it has Failed
async fn wait_for_job_result<J>(
    jobs: &J,
    namespace: &str,
    name: &str,
    schedule: &VerifySchedule,
) -> Result<bool>
where
    J: JobClient + ?Sized,
{
    let description = format!("job {}/{} to finish", namespace, name);
    wait_for(&description, schedule.job_interval, schedule.timeout, || async {
        let Some(job) = jobs.job(namespace, name).await? else {
            return Ok(None);
        };
        let conditions = job.status.as_ref().and_then(|s| s.conditions.as_deref());
        if has_condition(conditions, JOB_FAILED) {
            Ok(Some(false))
        } else if has_condition(conditions, JOB_COMPLETE) {
            Ok(Some(true))
        } else {
            Ok(None)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::Sequence;

    const BLUEPRINT: &str = r#"
apiVersion: blueprint.mirantis.com/v1alpha1
kind: Blueprint
metadata:
  name: dev
spec:
  kubernetes:
    provider: kind
  components:
    addons:
      - name: good
        kind: chart
        enabled: true
        dryRun: true
        namespace: apps
        chart:
          name: nginx
          repo: https://charts.example.com
          version: 1.0.0
      - name: bad
        kind: chart
        enabled: true
        dryRun: true
        namespace: apps
        chart:
          name: broken
          repo: https://charts.example.com
          version: 0.1.0
      - name: plain
        kind: chart
        enabled: true
        namespace: apps
        chart:
          name: plain
          repo: https://charts.example.com
          version: 0.1.0
      - name: raw
        kind: manifest
        enabled: true
        dryRun: true
        namespace: apps
        manifest:
          url: https://example.com/raw.yaml
"#;

    fn blueprint() -> Blueprint {
        serde_yaml::from_str(BLUEPRINT).expect("valid blueprint")
    }

    fn fast() -> VerifySchedule {
        VerifySchedule {
            pod_interval: Duration::from_millis(1),
            job_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    fn existing_cluster(exists: bool) -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_exists().returning(move || Ok(exists));
        provider.expect_provider_type().return_const("kind");
        provider
    }

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn job_with(condition: &str) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: condition.to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn applier_expecting(dry_run_addons: usize) -> MockBlueprintApplier {
        let mut seq = Sequence::new();
        let mut applier = MockBlueprintApplier::new();
        applier
            .expect_apply_blueprint()
            .withf(move |bp| bp.spec.components.addons.len() == dry_run_addons)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        applier
            .expect_apply_blueprint()
            .withf(|bp| bp.spec.components.addons.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        applier
    }

    #[tokio::test]
    async fn one_failing_addon_does_not_block_the_other() {
        let mut jobs = MockJobClient::new();
        jobs.expect_job_pod().returning(|_, job| {
            Ok(Some(pod(&format!("{}-x7k2p", job), "Running")))
        });
        jobs.expect_pod_logs()
            .returning(|_, pod| Ok(format!("dry-run output of {}\n", pod)));
        jobs.expect_job().returning(|_, name| {
            Ok(Some(match name {
                "helm-install-broken" => job_with("Failed"),
                _ => job_with("Complete"),
            }))
        });

        let results = verify_addons(
            &existing_cluster(true),
            &applier_expecting(2),
            &jobs,
            &blueprint(),
            &fast(),
        )
        .await
        .expect("verification ran");

        assert_eq!(results.len(), 2);
        let good = results.iter().find(|r| r.addon == "good").expect("good");
        let bad = results.iter().find(|r| r.addon == "bad").expect("bad");

        assert_eq!(good.outcome, Outcome::Succeeded);
        assert_eq!(good.job, "helm-install-nginx");
        assert_eq!(good.pod.as_deref(), Some("helm-install-nginx-x7k2p"));
        assert!(matches!(bad.outcome, Outcome::Failed(_)));

        let log = good.log_file.as_ref().expect("log file");
        let contents = std::fs::read_to_string(log).expect("log written");
        assert!(contents.contains("helm-install-nginx-x7k2p"));
        assert!(log.file_name().unwrap().to_string_lossy().starts_with("nginx-dry-run-"));
        for r in &results {
            if let Some(path) = &r.log_file {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    #[tokio::test]
    async fn pod_that_never_starts_times_out_alone() {
        let mut jobs = MockJobClient::new();
        jobs.expect_job_pod().returning(|_, job| {
            Ok(Some(match job {
                "helm-install-broken" => pod("helm-install-broken-a", "Pending"),
                _ => pod("helm-install-nginx-b", "Succeeded"),
            }))
        });
        jobs.expect_pod_logs().returning(|_, _| Ok(String::new()));
        jobs.expect_job()
            .returning(|_, _| Ok(Some(job_with("Complete"))));

        let results = verify_addons(
            &existing_cluster(true),
            &applier_expecting(2),
            &jobs,
            &blueprint(),
            &fast(),
        )
        .await
        .expect("verification ran");

        let good = results.iter().find(|r| r.addon == "good").expect("good");
        let bad = results.iter().find(|r| r.addon == "bad").expect("bad");
        assert!(good.outcome.is_success());
        assert!(matches!(bad.outcome, Outcome::TimedOut(_)));
        assert!(bad.log_file.is_none());
        if let Some(path) = &good.log_file {
            let _ = std::fs::remove_file(path);
        }
    }

    #[tokio::test]
    async fn log_capture_failure_still_waits_for_the_job() {
        let mut jobs = MockJobClient::new();
        jobs.expect_job_pod().returning(|_, job| {
            Ok(Some(pod(&format!("{}-q9z4m", job), "Running")))
        });
        jobs.expect_pod_logs()
            .returning(|_, pod| Err(Error::internal_with_context("pod_logs", format!("{} gone", pod))));
        jobs.expect_job()
            .times(2)
            .returning(|_, _| Ok(Some(job_with("Complete"))));

        let results = verify_addons(
            &existing_cluster(true),
            &applier_expecting(2),
            &jobs,
            &blueprint(),
            &fast(),
        )
        .await
        .expect("verification ran");

        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.outcome, Outcome::Succeeded, "{}", r.addon);
            assert!(r.log_file.is_none());
        }
    }

    #[tokio::test]
    async fn missing_cluster_is_refused_before_any_apply() {
        let mut applier = MockBlueprintApplier::new();
        applier.expect_apply_blueprint().never();
        let jobs = MockJobClient::new();

        let err = verify_addons(&existing_cluster(false), &applier, &jobs, &blueprint(), &fast())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be installed"));
    }

    #[tokio::test]
    async fn cleanup_runs_even_when_the_dry_run_apply_fails() {
        let mut seq = Sequence::new();
        let mut applier = MockBlueprintApplier::new();
        applier
            .expect_apply_blueprint()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::discovery("blueprint.mirantis.com/v1alpha1", "Blueprint")));
        applier
            .expect_apply_blueprint()
            .withf(|bp| bp.spec.components.addons.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let jobs = MockJobClient::new();

        let err = verify_addons(&existing_cluster(true), &applier, &jobs, &blueprint(), &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Succeeded.to_string(), "succeeded");
        assert_eq!(
            Outcome::TimedOut("waiting for the install pod".into()).to_string(),
            "timed out waiting for the install pod"
        );
    }
}
