//! Update command - Upgrade the distribution if needed, then re-apply the Blueprint

use tracing::info;

use blueprint_common::Blueprint;
use blueprint_distro::Provider;

use super::{apply_blueprint, Context};
use crate::{Error, Result};

pub async fn run(ctx: &Context) -> Result<()> {
    let mut provider = ctx.provider()?;
    upgrade_cluster(provider.as_ref(), &ctx.blueprint).await?;

    provider.setup_client().await?;
    apply_blueprint(provider.client()?, &ctx.blueprint).await?;
    info!("blueprint updated");
    Ok(())
}

/// Run the upgrade gate; returns whether the cluster was upgraded
pub(crate) async fn upgrade_cluster(provider: &dyn Provider, blueprint: &Blueprint) -> Result<bool> {
    if !provider.exists().await? {
        return Err(Error::command_failed(
            "cluster does not exist, run `bctl apply` first",
        ));
    }

    if !provider.needs_upgrade(blueprint).await? {
        info!("cluster is already at the declared version");
        return Ok(false);
    }

    provider.validate_upgrade(blueprint).await.map_err(|e| {
        Error::command_failed(format!(
            "provider failed pre-upgrade validation and may require manual changes: {}",
            e
        ))
    })?;

    info!(provider = %provider.provider_type(), "upgrading cluster");
    provider.upgrade().await?;
    Ok(true)
}
