//! Deployment orchestration.
//!
//! ## Architecture
//!
//! A deployment is one table-driven execution plan, one task per state:
//!
//! ```text
//!   1. Validate              (tools, descriptor, image length)
//!   2. ResourceGroup         (create resource group)
//!   3. ReserveAddress        (static public IPv4)
//!   4. DnsReconcile          (A record → reserved address)
//!   5. CreateDisk ─┐         (upload-mode disk sized to the image)
//!      GrantAccess │         (write SAS)
//!      Transfer   ─┘         (page blob copy)
//!   6. RevokeAccess          (cleanup stage: runs even if 5 failed)
//!   7. SecurityProvision     (NSG + fixed inbound rule table)
//!   8. Launch                (confidential VM with boot config)
//! ```
//!
//! The run stops at the first failure. Nothing is rolled back; resources
//! created before the failure remain.

mod state;
mod tasks;
mod types;

pub use state::{DeployState, StateTransition};

use crate::control::{ControlPlane, ReservedAddress};
use crate::descriptor::DeploymentDescriptor;
use crate::disk::DiskHandle;
use crate::dns::DnsReconcileReport;
use crate::pipeline::{
    BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor, PipelineMetrics, Stage,
};
use crate::vm::LaunchedVm;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use serde::Serialize;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

use tasks::{
    CreateDiskTask, DeployCtx, DnsReconcileTask, GrantAccessTask, LaunchTask, ReserveAddressTask,
    ResourceGroupTask, RevokeAccessTask, SecurityProvisionTask, TransferTask, ValidateTask,
};
use types::DeployPipelineContext;

// ============================================================================
// EXECUTION PLAN
// ============================================================================

fn get_execution_plan() -> ExecutionPlan<DeployCtx> {
    let stages: Vec<Stage<BoxedTask<DeployCtx>>> = vec![
        Stage::sequential(vec![Box::new(ValidateTask)]),
        Stage::sequential(vec![Box::new(ResourceGroupTask)]),
        Stage::sequential(vec![Box::new(ReserveAddressTask)]),
        Stage::sequential(vec![Box::new(DnsReconcileTask)]),
        Stage::sequential(vec![
            Box::new(CreateDiskTask),
            Box::new(GrantAccessTask),
            Box::new(TransferTask),
        ]),
        // Revoke whatever grant is held, whether or not the transfer worked.
        Stage::cleanup(vec![Box::new(RevokeAccessTask)]),
        Stage::sequential(vec![Box::new(SecurityProvisionTask)]),
        Stage::sequential(vec![Box::new(LaunchTask)]),
    ];

    ExecutionPlan::new(stages)
}

/// What a successful deployment produced.
#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    pub name: String,
    pub url: String,
    pub public_ip: Ipv4Addr,
    pub disk: DiskHandle,
    pub dns: DnsReconcileReport,
    pub vm: LaunchedVm,
}

/// Outcome of one deployment run, successful or not.
#[derive(Debug)]
pub struct DeployRun {
    pub descriptor: DeploymentDescriptor,
    /// `Done` or `Failed`.
    pub state: DeployState,
    pub transitions: Vec<StateTransition>,
    /// Task that failed first.
    pub failed_task: Option<String>,
    pub error: Option<DeployError>,
    pub metrics: PipelineMetrics,
    pub address: Option<ReservedAddress>,
    pub dns: Option<DnsReconcileReport>,
    pub disk: Option<DiskHandle>,
    pub vm: Option<LaunchedVm>,
}

impl DeployRun {
    pub fn is_success(&self) -> bool {
        self.state == DeployState::Done
    }

    /// States entered, in order.
    pub fn history(&self) -> Vec<DeployState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    /// Last non-terminal state entered.
    pub fn last_step(&self) -> Option<DeployState> {
        self.transitions
            .iter()
            .rev()
            .map(|t| t.state)
            .find(|s| !s.is_terminal())
    }

    pub fn summary(&self) -> Option<DeploySummary> {
        if !self.is_success() {
            return None;
        }
        let vm = self.vm.clone()?;
        Some(DeploySummary {
            name: self.descriptor.name.clone(),
            url: self.descriptor.url(),
            public_ip: vm.public_ip,
            disk: self.disk.clone()?,
            dns: self.dns.clone()?,
            vm,
        })
    }

    pub fn into_result(self) -> DeployResult<DeploySummary> {
        if let Some(summary) = self.summary() {
            return Ok(summary);
        }
        Err(self.error.unwrap_or_else(|| {
            DeployError::Internal("deployment finished without a summary".into())
        }))
    }
}

/// Runs one deployment against a control plane.
///
/// # Example
///
/// ```ignore
/// let run = DeploymentBuilder::new(descriptor, control).run().await;
/// let summary = run.into_result()?;
/// ```
pub struct DeploymentBuilder {
    descriptor: DeploymentDescriptor,
    control: Arc<dyn ControlPlane>,
    tool_path: Option<OsString>,
}

impl DeploymentBuilder {
    pub fn new(descriptor: DeploymentDescriptor, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            descriptor,
            control,
            tool_path: None,
        }
    }

    /// Search these directories instead of `PATH` for required tools.
    pub fn tool_path(mut self, path: impl Into<OsString>) -> Self {
        self.tool_path = Some(path.into());
        self
    }

    /// Execute every step until done or the first failure.
    pub async fn run(self) -> DeployRun {
        let DeploymentBuilder {
            descriptor,
            control,
            tool_path,
        } = self;
        tracing::info!(
            deployment = %descriptor.name,
            region = %descriptor.region,
            size = %descriptor.vm_size,
            image = %descriptor.image_path.display(),
            "Starting deployment"
        );

        let ctx = Arc::new(Mutex::new(DeployPipelineContext::new(
            descriptor, control, tool_path,
        )));
        let pipeline = PipelineBuilder::from_plan(get_execution_plan());
        let outcome = PipelineExecutor::execute(pipeline, Arc::clone(&ctx)).await;

        let mut ctx = ctx.lock().await;
        let (metrics, failed_task, error) = match outcome {
            Ok(metrics) => {
                ctx.enter(DeployState::Done);
                tracing::info!(
                    deployment = %ctx.descriptor.name,
                    url = %ctx.descriptor.url(),
                    "Deployment complete"
                );
                (metrics, None, None)
            }
            Err(failure) => {
                ctx.enter(DeployState::Failed);
                tracing::error!(
                    deployment = %ctx.descriptor.name,
                    task = %failure.task,
                    error = %failure.error,
                    "Deployment failed"
                );
                (failure.metrics, Some(failure.task), Some(failure.error))
            }
        };
        metrics.log_tasks();

        DeployRun {
            descriptor: ctx.descriptor.clone(),
            state: ctx.state,
            transitions: std::mem::take(&mut ctx.transitions),
            failed_task,
            error,
            metrics,
            address: ctx.address.take(),
            dns: ctx.dns.take(),
            disk: ctx.disk.take(),
            vm: ctx.vm.take(),
        }
    }
}
