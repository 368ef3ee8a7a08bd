//! k0s upgrade gate
//!
//! Decides whether a declared k0s version is an upgrade of what runs on the
//! controllers, and pre-flights the new binary against each controller's
//! live configuration before `k0sctl apply` is allowed to roll it out.

use std::cmp::Ordering;

use tracing::{info, warn};

use blueprint_common::blueprint::{Host, PROVIDER_K0S};
use blueprint_common::version::parse_version;
use blueprint_common::{Error, Result};

use crate::exec::{run_checked, CommandRunner, Invocation};
use crate::ssh::SshTarget;

const INSTALL_SCRIPT_URL: &str = "https://get.k0s.sh";
const SCRATCH_SCRIPT: &str = "/tmp/k0s-install.sh";
const SCRATCH_BINARY: &str = "/tmp/k0s";
const K0S_CONFIG_PATH: &str = "/etc/k0s/k0s.yaml";

/// Compare versions: `Ok(true)` when `declared` is newer than `installed`.
///
/// A declared version older than the installed one is rejected; k0s does not
/// support downgrades.
pub fn compare_versions(installed: &str, declared: &str) -> Result<bool> {
    let installed_v = parse_version(installed)?;
    let declared_v = parse_version(declared)?;

    match declared_v.cmp_precedence(&installed_v) {
        Ordering::Greater => Ok(true),
        Ordering::Equal => Ok(false),
        Ordering::Less => Err(Error::downgrade(installed.trim(), declared.trim())),
    }
}

/// Build an invocation running `argv` on `host`, locally or over SSH
pub fn host_command(host: &Host, argv: &[&str]) -> Result<Invocation> {
    if host.is_local() {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::internal_with_context("host_command", "empty command"))?;
        return Ok(Invocation::new(*program).args(args.iter().copied()));
    }
    match &host.ssh {
        Some(ssh) => Ok(SshTarget::from(ssh).command(argv)),
        None => Err(Error::provider(
            PROVIDER_K0S,
            format!("host with role {} has neither ssh nor localhost set", host.role),
        )),
    }
}

/// A readable name for log lines and errors
pub fn host_label(host: &Host) -> String {
    match &host.ssh {
        Some(ssh) => ssh.address.clone(),
        None => "localhost".to_string(),
    }
}

fn controllers(hosts: &[Host]) -> Vec<&Host> {
    hosts.iter().filter(|h| h.is_controller()).collect()
}

/// Read the k0s version running on the cluster.
///
/// A local first host is asked directly. Otherwise each controller is tried
/// in inventory order and the first answer wins; unreachable controllers are
/// skipped with a warning.
pub async fn installed_version<R>(runner: &R, hosts: &[Host]) -> Result<String>
where
    R: CommandRunner + ?Sized,
{
    let version_cmd = ["sudo", "k0s", "version"];

    if hosts.first().is_some_and(Host::is_local) {
        let inv = Invocation::new(version_cmd[0]).args(version_cmd[1..].iter().copied());
        let out = run_checked(runner, &inv).await.map_err(|e| {
            Error::provider(PROVIDER_K0S, format!("unable to get k0s version on local host: {}", e))
        })?;
        return Ok(out.stdout.trim().to_string());
    }

    for host in controllers(hosts) {
        let label = host_label(host);
        let result = match host_command(host, &version_cmd) {
            Ok(inv) => run_checked(runner, &inv).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(out) => return Ok(out.stdout.trim().to_string()),
            Err(e) => warn!(host = %label, error = %e, "unable to get k0s version, trying next controller"),
        }
    }

    Err(Error::provider(PROVIDER_K0S, "unable to get k0s version of cluster"))
}

/// Whether `declared` requires an upgrade of the running cluster
pub async fn needs_upgrade<R>(runner: &R, hosts: &[Host], declared: &str) -> Result<bool>
where
    R: CommandRunner + ?Sized,
{
    let installed = installed_version(runner, hosts).await?;
    let upgrade = compare_versions(&installed, declared)?;
    info!(installed = %installed, declared = %declared, upgrade, "checked k0s version");
    Ok(upgrade)
}

/// Download `declared` onto every controller and validate its config with it.
///
/// The first failure aborts with the offending host named. Scratch files
/// are removed from every controller afterwards regardless of outcome.
pub async fn validate_upgrade<R>(runner: &R, hosts: &[Host], declared: &str) -> Result<()>
where
    R: CommandRunner + ?Sized,
{
    parse_version(declared)
        .map_err(|_| Error::validation(format!("invalid k0s version: {}", declared)))?;
    let tag = format!("v{}", declared.trim().trim_start_matches('v'));

    let controllers = controllers(hosts);
    let result = validate_controllers(runner, &controllers, &tag).await;
    cleanup(runner, &controllers).await;

    if result.is_ok() {
        info!(version = %tag, "new k0s version validated on all controllers");
    }
    result
}

async fn validate_controllers<R>(runner: &R, controllers: &[&Host], tag: &str) -> Result<()>
where
    R: CommandRunner + ?Sized,
{
    let version_env = format!("K0S_VERSION={}", tag);
    let rewrite = "s;k0sInstallPath=/usr/local/bin;k0sInstallPath=/tmp;";

    let download: [&[&str]; 3] = [
        &["curl", "-sSLf", "-o", SCRATCH_SCRIPT, INSTALL_SCRIPT_URL],
        &["sed", "-i", "-e", rewrite, SCRATCH_SCRIPT],
        &["sudo", "env", version_env.as_str(), "sh", SCRATCH_SCRIPT],
    ];
    let validate = [
        "sudo",
        SCRATCH_BINARY,
        "config",
        "validate",
        "--config",
        K0S_CONFIG_PATH,
    ];

    for host in controllers {
        let label = host_label(host);

        info!(host = %label, version = %tag, "downloading new k0s binary");
        for step in download {
            run_checked(runner, &host_command(host, step)?)
                .await
                .map_err(|e| {
                    Error::provider(
                        PROVIDER_K0S,
                        format!("failed to download k0s {} on host {}: {}", tag, label, e),
                    )
                })?;
        }

        info!(host = %label, "validating existing config with new k0s binary");
        run_checked(runner, &host_command(host, &validate)?)
            .await
            .map_err(|e| {
                Error::provider(
                    PROVIDER_K0S,
                    format!("validation of k0s {} failed on host {}: {}", tag, label, e),
                )
            })?;
    }
    Ok(())
}

async fn cleanup<R>(runner: &R, controllers: &[&Host])
where
    R: CommandRunner + ?Sized,
{
    let rm = ["sudo", "rm", "-f", SCRATCH_BINARY, SCRATCH_SCRIPT];
    for host in controllers {
        let result = match host_command(host, &rm) {
            Ok(inv) => run_checked(runner, &inv).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(host = %host_label(host), error = %e, "failed to clean up scratch k0s files");
        }
    }
}
