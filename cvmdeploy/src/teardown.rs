//! Deleting a recorded deployment.
//!
//! Removes the VM and its OS disk. The resource group, public IP, NSG and
//! DNS record are left in place.

use crate::control::ControlPlane;
use crate::db::{DeploymentRecord, DeploymentStatus, DeploymentStore};
use crate::deploy::DeployState;
use cvmdeploy_shared::errors::{DeployError, DeployResult};

/// What a teardown removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub record: DeploymentRecord,
    pub vm_deleted: bool,
    pub disk_deleted: bool,
}

/// Whether the run reached `state`, i.e. the resource it creates may exist.
fn reached(record: &DeploymentRecord, state: DeployState) -> bool {
    match record.status {
        DeploymentStatus::Succeeded => true,
        DeploymentStatus::Failed => record.last_state.is_some_and(|last| last >= state),
    }
}

/// Returns whether the resource existed. Not-found counts as already deleted.
fn deleted(result: DeployResult<()>, kind: &str, name: &str) -> DeployResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            tracing::info!(resource = kind, name = %name, "Already gone");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Delete the VM, then the OS disk, then the record.
///
/// Stops at the first failed delete and keeps the record so the command can
/// be retried.
pub async fn delete_deployment(
    store: &DeploymentStore,
    control: &dyn ControlPlane,
    name: &str,
) -> DeployResult<TeardownReport> {
    let record = store
        .get(name)?
        .ok_or_else(|| DeployError::NotFound(format!("no recorded deployment named {name}")))?;

    let mut vm_deleted = false;
    if reached(&record, DeployState::Launching) {
        tracing::info!(vm = %record.vm.name, "Deleting VM");
        let result = control
            .delete_vm(&record.vm.name, &record.vm.resource_group)
            .await;
        vm_deleted = deleted(result, "vm", &record.vm.name)?;
    } else {
        tracing::info!(vm = %record.vm.name, "Deployment never launched a VM, skipping");
    }

    let mut disk_deleted = false;
    if reached(&record, DeployState::DiskCreating) {
        tracing::info!(disk = %record.disk_name, "Deleting OS disk");
        let result = control
            .delete_disk(&record.disk_name, &record.vm.resource_group)
            .await;
        disk_deleted = deleted(result, "disk", &record.disk_name)?;
    }

    store.remove(name)?;
    tracing::info!(deployment = %name, "Deployment deleted");

    Ok(TeardownReport {
        record,
        vm_deleted,
        disk_deleted,
    })
}
