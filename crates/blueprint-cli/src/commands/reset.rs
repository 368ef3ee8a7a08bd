//! Reset command - Tear the cluster down
//!
//! Usage: bctl reset [--force]

use clap::Args;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tracing::{info, warn};

use blueprint_common::client::create_client;
use blueprint_common::{Blueprint, ManifestEngine};
use blueprint_distro::Provider;

use super::{context_of, Context, OperatorTarget};
use crate::Result;

const RESET_PROMPT: &str =
    "This will remove all resources and completely destroy the cluster. Are you sure? (N/y) ";

/// Destroy the cluster
#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Skip the confirmation prompt and force the removal
    #[arg(short = 'f', long)]
    pub force: bool,
}

pub async fn run(ctx: &Context, args: ResetArgs) -> Result<()> {
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if !confirmed(args.force, &mut stdin).await? {
        println!("Aborted");
        return Ok(());
    }

    let provider = ctx.provider()?;
    let target = if provider.exists().await? {
        connect(ctx, provider.as_ref()).await
    } else {
        None
    };

    reset_cluster(
        provider.as_ref(),
        target.as_ref().map(|t| t as &dyn OperatorTarget),
        &ctx.blueprint,
        args.force,
    )
    .await
}

/// `--force` skips the prompt; otherwise only a bare `y` answer proceeds
async fn confirmed<R>(force: bool, input: &mut R) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    if force {
        return Ok(true);
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(RESET_PROMPT.as_bytes()).await?;
    stdout.flush().await?;

    let mut answer = String::new();
    input.read_line(&mut answer).await?;
    Ok(answer.trim_end_matches(['\r', '\n']) == "y")
}

async fn connect(ctx: &Context, provider: &dyn Provider) -> Option<ManifestEngine> {
    match create_client(&ctx.kubeconfig, context_of(provider).as_deref()).await {
        Ok(client) => Some(ManifestEngine::new(client)),
        Err(e) => {
            warn!(error = %e, "cannot reach the cluster to remove the blueprint resource");
            None
        }
    }
}

/// Remove the Blueprint resource when a target is given, then reset.
///
/// The removal is best effort; the cluster is destroyed either way.
pub(crate) async fn reset_cluster(
    provider: &dyn Provider,
    target: Option<&dyn OperatorTarget>,
    blueprint: &Blueprint,
    force: bool,
) -> Result<()> {
    if let Some(target) = target {
        if let Err(e) = target.delete_blueprint(blueprint).await {
            warn!(error = %e, "failed to remove the blueprint resource");
        }
    }

    provider.reset(force).await?;
    info!(provider = %provider.provider_type(), "cluster reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fake::{blueprint, FakeProvider, RecordingTarget};

    #[tokio::test]
    async fn force_skips_the_prompt() {
        let mut input: &[u8] = b"";
        assert!(confirmed(true, &mut input).await.expect("answered"));
    }

    #[tokio::test]
    async fn only_a_bare_y_confirms() {
        for (answer, expected) in [
            (&b"y\n"[..], true),
            (&b"y\r\n"[..], true),
            (&b"\n"[..], false),
            (&b"n\n"[..], false),
            (&b"yes\n"[..], false),
            (&b""[..], false),
        ] {
            let mut input = answer;
            assert_eq!(
                confirmed(false, &mut input).await.expect("answered"),
                expected,
                "{:?}",
                String::from_utf8_lossy(answer)
            );
        }
    }

    #[tokio::test]
    async fn blueprint_is_removed_before_the_reset() {
        let provider = FakeProvider::new("kind", true);
        let target = RecordingTarget::default();

        reset_cluster(&provider, Some(&target), &blueprint("kind"), false)
            .await
            .expect("reset");

        assert_eq!(target.calls(), ["delete demo"]);
        assert_eq!(provider.calls(), ["reset"]);
    }

    #[tokio::test]
    async fn failed_removal_still_resets() {
        let provider = FakeProvider::new("k0s", true);
        let target = RecordingTarget::failing();

        reset_cluster(&provider, Some(&target), &blueprint("k0s"), true)
            .await
            .expect("reset");

        assert_eq!(target.calls(), ["delete demo"]);
        assert_eq!(provider.calls(), ["reset --force"]);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_reset_without_removal() {
        let provider = FakeProvider::new("kind", false);

        reset_cluster(&provider, None, &blueprint("kind"), false)
            .await
            .expect("reset");

        assert_eq!(provider.calls(), ["reset"]);
    }
}
