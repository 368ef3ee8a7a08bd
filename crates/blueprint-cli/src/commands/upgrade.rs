//! Upgrade command - Move the Blueprint operator to another release

use clap::Args;
use tracing::info;

use blueprint_common::{Blueprint, ManifestEngine};
use blueprint_distro::Provider;

use super::{Context, OperatorManifest, OperatorTarget};
use crate::Result;

/// Upgrade the Blueprint operator
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Operator release (`latest`, a version or a manifest URI); defaults to `spec.version`
    #[arg(long)]
    pub version: Option<String>,

    /// Registry to pull the operator images from
    #[arg(long)]
    pub image_registry: Option<String>,
}

impl UpgradeArgs {
    /// The `--version` flag, else the Blueprint's declared operator release
    fn release<'a>(&'a self, blueprint: &'a Blueprint) -> &'a str {
        self.version
            .as_deref()
            .unwrap_or_else(|| blueprint.operator_version())
    }
}

pub async fn run(ctx: &Context, args: UpgradeArgs) -> Result<()> {
    let version = args.release(&ctx.blueprint);
    let manifest = OperatorManifest::resolve(version, args.image_registry.as_deref()).await?;

    let mut provider = ctx.provider()?;
    provider.setup_client().await?;
    let target = ManifestEngine::new(provider.client()?);

    info!(version = %version, "upgrading blueprint operator");
    upgrade_operator(provider.as_ref(), &target, manifest.uri()).await
}

/// Apply the operator manifest at `uri`, then wait for the operator's pods
pub(crate) async fn upgrade_operator(
    provider: &dyn Provider,
    target: &dyn OperatorTarget,
    uri: &str,
) -> Result<()> {
    info!(uri = %uri, "applying operator manifest");
    target.apply_manifest(uri).await?;

    provider.wait_for_pods().await?;
    info!("blueprint operator upgraded");
    Ok(())
}
