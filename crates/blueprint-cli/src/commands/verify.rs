//! Verify command - Dry-run install the chart addons marked `dryRun`
//!
//! Each addon is installed in isolation; the cluster is left without any
//! addons afterwards. Exits non-zero when any addon failed.

use tracing::info;

use blueprint_common::ManifestEngine;
use blueprint_distro::{verify_addons, AddonVerification, KubeJobClient, VerifySchedule};

use super::Context;
use crate::{Error, Result};

pub async fn run(ctx: &Context) -> Result<()> {
    let mut provider = ctx.provider()?;
    if !provider.exists().await? {
        return Err(Error::command_failed(
            "cluster must be installed to verify addons, try applying a blueprint with no addons first",
        ));
    }
    provider.setup_client().await?;
    let client = provider.client()?;

    let results = verify_addons(
        provider.as_ref(),
        &ManifestEngine::new(client.clone()),
        &KubeJobClient::new(client),
        &ctx.blueprint,
        &VerifySchedule::default(),
    )
    .await?;

    if results.is_empty() {
        info!("no chart addons are marked for dry-run verification");
        return Ok(());
    }

    print!("{}", summary(&results));

    let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
    if failed > 0 {
        return Err(Error::command_failed(format!(
            "{} of {} addons failed verification",
            failed,
            results.len()
        )));
    }
    Ok(())
}

fn summary(results: &[AddonVerification]) -> String {
    let mut out = format!("{:<20} {:<30} {}\n", "ADDON", "RESULT", "LOG");
    for result in results {
        let log = result
            .log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<20} {:<30} {}\n",
            result.addon,
            result.outcome.to_string(),
            log
        ));
    }
    out
}
