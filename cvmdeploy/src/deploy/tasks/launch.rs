//! Task: VM launch.

use super::{DeployCtx, log_task_error, require, task_start};
use crate::control::{ControlPlane, ReservedAddress};
use crate::deploy::state::DeployState;
use crate::descriptor::DeploymentDescriptor;
use crate::disk::DiskHandle;
use crate::network::NsgRef;
use crate::pipeline::PipelineTask;
use crate::vm::{BootConfig, LaunchedVm, VmLauncher};
use async_trait::async_trait;
use cvmdeploy_shared::errors::DeployResult;
use std::sync::Arc;

pub struct LaunchTask;

#[async_trait]
impl PipelineTask<DeployCtx> for LaunchTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::Launching, task_name).await;

        let (control, descriptor, disk, address, nsg) = {
            let ctx = ctx.lock().await;
            (
                ctx.control.clone(),
                ctx.descriptor.clone(),
                require(&ctx.disk, "disk_create")?,
                require(&ctx.address, "address_reserve")?,
                require(&ctx.nsg, "security_provision")?,
            )
        };

        let vm = launch(&control, &descriptor, &disk, &address, &nsg)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;

        tracing::info!(
            deployment = %deployment,
            vm = %vm.name,
            public_ip = %vm.public_ip,
            "VM created"
        );

        ctx.lock().await.vm = Some(vm);
        Ok(())
    }

    fn name(&self) -> &str {
        "launch"
    }
}

async fn launch(
    control: &Arc<dyn ControlPlane>,
    descriptor: &DeploymentDescriptor,
    disk: &DiskHandle,
    address: &ReservedAddress,
    nsg: &NsgRef,
) -> DeployResult<LaunchedVm> {
    let boot = BootConfig::from_descriptor(descriptor)?;
    VmLauncher::new(control.as_ref())
        .launch(descriptor, disk, address, nsg, &boot)
        .await
}
