//! Task: DNS reconciliation.

use super::{DeployCtx, log_task_error, require, task_start};
use crate::deploy::state::DeployState;
use crate::dns::DnsReconciler;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use cvmdeploy_shared::errors::DeployResult;

pub struct DnsReconcileTask;

#[async_trait]
impl PipelineTask<DeployCtx> for DnsReconcileTask {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> DeployResult<()> {
        let task_name = self.name();
        let deployment = task_start(&ctx, DeployState::DnsReconciling, task_name).await;

        let (control, domain, address) = {
            let ctx = ctx.lock().await;
            (
                ctx.control.clone(),
                ctx.descriptor.domain.clone(),
                require(&ctx.address, "address_reserve")?,
            )
        };

        let report = DnsReconciler::new(control.as_ref())
            .reconcile(&domain.zone, &domain.record, address.address)
            .await
            .inspect_err(|e| log_task_error(&deployment, task_name, e))?;

        ctx.lock().await.dns = Some(report);
        Ok(())
    }

    fn name(&self) -> &str {
        "dns_reconcile"
    }
}
