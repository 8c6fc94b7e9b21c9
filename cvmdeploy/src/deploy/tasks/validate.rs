//! Task: Validation.
//!
//! Checks required tools, the descriptor and the image before any remote
//! call is made.

use super::{DeployCtx, log_task_error, task_start};
use crate::deploy::state::DeployState;
use crate::descriptor::DeploymentDescriptor;
use crate::disk::measure_image;
use crate::network::standard_rule_table;
use crate::pipeline::PipelineTask;
use crate::preflight::{DEPLOY_TOOLS, check_tools_in};
use crate::vm::BootConfig;
use async_trait::async_trait;
use cvmdeploy_shared::errors::DeployResult;
use std::ffi::OsStr;

pub struct ValidateTask;

#[async_trait]
impl PipelineTask<DeployCtx> for ValidateTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::Validating, task_name).await;

        let (descriptor, tool_path) = {
            let ctx = ctx.lock().await;
            (ctx.descriptor.clone(), ctx.tool_path.clone())
        };

        let image_size = run_validate(&descriptor, tool_path.as_deref())
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;

        ctx.lock().await.image_size = Some(image_size);
        Ok(())
    }

    fn name(&self) -> &str {
        "validate"
    }
}

/// Returns the image length.
fn run_validate(descriptor: &DeploymentDescriptor, tool_path: Option<&OsStr>) -> DeployResult<u64> {
    check_tools_in(DEPLOY_TOOLS, tool_path)?;
    descriptor.validate()?;
    standard_rule_table(&descriptor.source_prefix)?;
    BootConfig::from_descriptor(descriptor)?;

    let size = measure_image(&descriptor.image_path)?;
    tracing::info!(
        image = %descriptor.image_path.display(),
        size_bytes = size,
        "Measured disk image"
    );
    Ok(size)
}
