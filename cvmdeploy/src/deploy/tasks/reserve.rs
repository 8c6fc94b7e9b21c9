//! Tasks: Resource group creation and public address reservation.

use super::{DeployCtx, log_task_error, task_start};
use crate::deploy::state::DeployState;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use cvmdeploy_shared::errors::DeployResult;

pub struct ResourceGroupTask;

#[async_trait]
impl PipelineTask<DeployCtx> for ResourceGroupTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::ResourceGroupCreating, task_name).await;

        let (control, group, region) = {
            let ctx = ctx.lock().await;
            (
                ctx.control.clone(),
                ctx.descriptor.resource_group().to_string(),
                ctx.descriptor.region.clone(),
            )
        };

        control
            .create_resource_group(&group, &region)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))
    }

    fn name(&self) -> &str {
        "resource_group_create"
    }
}

pub struct ReserveAddressTask;

#[async_trait]
impl PipelineTask<DeployCtx> for ReserveAddressTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::AddressReserving, task_name).await;

        let (control, name, group, region) = {
            let ctx = ctx.lock().await;
            (
                ctx.control.clone(),
                ctx.descriptor.public_ip_name().to_string(),
                ctx.descriptor.resource_group().to_string(),
                ctx.descriptor.region.clone(),
            )
        };

        let reserved = control
            .create_public_ip(&name, &group, &region)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;
        tracing::info!(
            deployment = %deployment,
            address = %reserved.address,
            "Reserved public IP"
        );

        ctx.lock().await.address = Some(reserved);
        Ok(())
    }

    fn name(&self) -> &str {
        "address_reserve"
    }
}
