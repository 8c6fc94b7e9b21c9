//! Task: Network security group provisioning.

use super::{DeployCtx, log_task_error, task_start};
use crate::control::ControlPlane;
use crate::deploy::state::DeployState;
use crate::network::{NetworkSecurityProvisioner, NsgRef, standard_rule_table};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use cvmdeploy_shared::errors::DeployResult;

pub struct SecurityProvisionTask;

#[async_trait]
impl PipelineTask<DeployCtx> for SecurityProvisionTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::SecurityProvisioning, task_name).await;

        let (control, group, source) = {
            let ctx = ctx.lock().await;
            let descriptor = &ctx.descriptor;
            (
                ctx.control.clone(),
                NsgRef {
                    name: descriptor.nsg_name().to_string(),
                    resource_group: descriptor.resource_group().to_string(),
                    region: descriptor.region.clone(),
                },
                descriptor.source_prefix.clone(),
            )
        };

        provision(control.as_ref(), &group, &source)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;

        ctx.lock().await.nsg = Some(group);
        Ok(())
    }

    fn name(&self) -> &str {
        "security_provision"
    }
}

async fn provision(control: &dyn ControlPlane, group: &NsgRef, source: &str) -> DeployResult<()> {
    let table = standard_rule_table(source)?;
    NetworkSecurityProvisioner::new(control)
        .provision(group, &table)
        .await
}
