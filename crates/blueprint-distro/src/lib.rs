//! Cluster lifecycle for Blueprint
//!
//! This crate owns everything that acts on the cluster itself rather than
//! on its objects: the distribution providers, the k0s upgrade gate, and
//! dry-run verification of chart addons.
//!
//! Related crates:
//! - `blueprint-common`: manifest engine, readiness polling, document model
//! - `blueprint-cli`: the `bctl` command surface

#![deny(missing_docs)]

pub mod exec;
pub mod provider;
pub mod ssh;
pub mod upgrade;
pub mod verify;

pub use exec::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use provider::{create_provider, ExistingProvider, K0sProvider, KindProvider, Provider};
pub use verify::{
    verify_addons, AddonVerification, BlueprintApplier, JobClient, KubeJobClient, Outcome,
    VerifySchedule,
};

// Re-export common error types
pub use blueprint_common::{Error, Result};
