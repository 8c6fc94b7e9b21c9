//! Deployment tasks, one per state.

mod disk;
mod dns;
mod launch;
mod network;
mod reserve;
mod validate;

pub use disk::{CreateDiskTask, GrantAccessTask, RevokeAccessTask, TransferTask};
pub use dns::DnsReconcileTask;
pub use launch::LaunchTask;
pub use network::SecurityProvisionTask;
pub use reserve::{ReserveAddressTask, ResourceGroupTask};
pub use validate::ValidateTask;

use super::state::DeployState;
use super::types::DeployPipelineContext;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DeployCtx = Arc<Mutex<DeployPipelineContext>>;

/// Record entry into `state` and log the step. Returns the deployment name.
pub(super) async fn task_start(ctx: &DeployCtx, state: DeployState, task_name: &str) -> String {
    let mut ctx = ctx.lock().await;
    ctx.enter(state);
    let deployment = ctx.descriptor.name.clone();
    tracing::info!(
        deployment = %deployment,
        step = task_name,
        state = %state,
        "Starting deploy step"
    );
    deployment
}

pub(super) fn log_task_error(deployment: &str, task_name: &str, error: &DeployError) {
    tracing::error!(
        deployment = %deployment,
        step = task_name,
        error = %error,
        "Deploy step failed"
    );
}

/// Output of an earlier task, or an internal error naming it.
pub(super) fn require<T: Clone>(value: &Option<T>, producer: &str) -> DeployResult<T> {
    value
        .clone()
        .ok_or_else(|| DeployError::Internal(format!("{producer} task must run first")))
}
