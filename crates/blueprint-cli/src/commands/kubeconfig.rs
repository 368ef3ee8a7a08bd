//! Kubeconfig command - Print the kube context addressing the cluster

use super::Context;
use crate::Result;

pub fn run(ctx: &Context) -> Result<()> {
    let provider = ctx.provider()?;
    println!("{}", provider.kube_context());
    Ok(())
}
