//! Apply command - Create or refresh the cluster and reconcile the Blueprint
//!
//! Usage: bctl apply [--install-only] [--image-registry <registry>]
//!
//! 1. Install the cluster, or refresh it when it already exists
//! 2. Bind a client and wait for every node
//! 3. Install the Blueprint operator unless it is already running
//! 4. Wait for the provider's pods, then apply the Blueprint resource

use clap::Args;
use tracing::{info, warn};

use blueprint_common::blueprint::PROVIDER_EXISTING;
use blueprint_common::readiness::wait_for_pods;
use blueprint_common::{ManifestEngine, CLUSTER_POLL_INTERVAL, CLUSTER_POLL_TIMEOUT, KUBE_SYSTEM_NAMESPACE};
use blueprint_distro::Provider;

use super::{
    apply_blueprint, context_of, operator_installed, wait_for_api, Context, OperatorManifest,
};
use crate::{Error, Result};

/// Create or refresh the cluster and apply the Blueprint
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Stop after the cluster is installed or refreshed
    #[arg(long)]
    pub install_only: bool,

    /// Registry to pull the operator images from
    #[arg(long)]
    pub image_registry: Option<String>,
}

pub async fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let mut provider = ctx.provider()?;
    let existed = ensure_cluster(provider.as_ref()).await?;

    if args.install_only {
        info!("cluster ready, skipping operator and addons");
        return Ok(());
    }

    provider.setup_client().await?;
    let client = provider.client()?;

    let install_operator = if existed {
        needs_operator(operator_installed(&client).await)
    } else {
        true
    };

    if install_operator {
        wait_for_pods(
            &client,
            Some(KUBE_SYSTEM_NAMESPACE),
            CLUSTER_POLL_INTERVAL,
            CLUSTER_POLL_TIMEOUT,
        )
        .await?;
        wait_for_api(&ctx.kubeconfig, context_of(provider.as_ref()).as_deref()).await?;

        let manifest =
            OperatorManifest::resolve(ctx.blueprint.operator_version(), args.image_registry.as_deref())
                .await?;
        info!(uri = %manifest.uri(), "installing blueprint operator");
        ManifestEngine::new(client.clone())
            .apply(manifest.uri())
            .await?;
    } else {
        info!("blueprint operator already installed");
    }

    provider.wait_for_pods().await?;
    apply_blueprint(client, &ctx.blueprint).await?;
    info!("blueprint applied");
    Ok(())
}

/// Whether the operator must be installed on a cluster that already existed.
///
/// A failed lookup counts as absent.
fn needs_operator(lookup: Result<bool>) -> bool {
    match lookup {
        Ok(installed) => !installed,
        Err(e) => {
            warn!(error = %e, "failed to look up the blueprint operator, installing it");
            true
        }
    }
}

/// Install the cluster or refresh it; returns whether it already existed
pub(crate) async fn ensure_cluster(provider: &dyn Provider) -> Result<bool> {
    if provider.exists().await? {
        info!(provider = %provider.provider_type(), "cluster exists, refreshing");
        provider.refresh().await?;
        return Ok(true);
    }

    if provider.provider_type() == PROVIDER_EXISTING {
        return Err(Error::validation(
            "cluster is not reachable and the existing provider cannot create one",
        ));
    }

    info!(provider = %provider.provider_type(), "installing cluster");
    provider.install().await?;
    Ok(false)
}
