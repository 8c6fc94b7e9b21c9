//! Tasks: Disk creation, write grant, transfer and revoke.
//!
//! The grant lives in the context between `GrantAccessTask` and
//! `RevokeAccessTask`. The revoke task runs in a cleanup stage, so it also
//! runs when the transfer failed.

use super::{DeployCtx, log_task_error, require, task_start};
use crate::deploy::state::DeployState;
use crate::disk::DiskUploader;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use cvmdeploy_shared::errors::{DeployError, DeployResult};

pub struct CreateDiskTask;

#[async_trait]
impl PipelineTask<DeployCtx> for CreateDiskTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::DiskCreating, task_name).await;

        let (control, disk_name, group, region, size) = {
            let ctx = ctx.lock().await;
            (
                ctx.control.clone(),
                ctx.descriptor.disk_name(),
                ctx.descriptor.resource_group().to_string(),
                ctx.descriptor.region.clone(),
                require(&ctx.image_size, "validate")?,
            )
        };

        let disk = DiskUploader::new(control)
            .create_disk(&disk_name, &group, &region, size)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;

        ctx.lock().await.disk = Some(disk);
        Ok(())
    }

    fn name(&self) -> &str {
        "disk_create"
    }
}

pub struct GrantAccessTask;

#[async_trait]
impl PipelineTask<DeployCtx> for GrantAccessTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::AccessGranting, task_name).await;

        let (control, disk) = {
            let ctx = ctx.lock().await;
            (ctx.control.clone(), require(&ctx.disk, "disk_create")?)
        };

        let grant = DiskUploader::new(control)
            .grant_write(&disk)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;

        ctx.lock().await.grant = Some(grant);
        Ok(())
    }

    fn name(&self) -> &str {
        "access_grant"
    }
}

pub struct TransferTask;

#[async_trait]
impl PipelineTask<DeployCtx> for TransferTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::Transferring, task_name).await;

        let (control, image, grant) = {
            let mut ctx = ctx.lock().await;
            let grant = ctx.grant.take().ok_or_else(|| {
                DeployError::Internal("access_grant task must run first".into())
            })?;
            (ctx.control.clone(), ctx.descriptor.image_path.clone(), grant)
        };

        // Dropping the grant here (cancellation) schedules its revoke.
        let transferred = DiskUploader::new(control).transfer(&image, &grant).await;
        ctx.lock().await.grant = Some(grant);

        transferred.inspect_err(|e| log_task_error(&deployment, task_name, e))
    }

    fn name(&self) -> &str {
        "transfer"
    }
}

pub struct RevokeAccessTask;

#[async_trait]
impl PipelineTask<DeployCtx> for RevokeAccessTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let grant = ctx.lock().await.grant.take();
        let Some(grant) = grant else {
            tracing::debug!(step = task_name, "No disk write grant held, nothing to revoke");
            return Ok(());
        };

        let deployment = task_start(&ctx, DeployState::AccessRevoking, task_name).await;
        grant
            .revoke()
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))
    }

    fn name(&self) -> &str {
        "access_revoke"
    }
}
