//! Remote control plane access.
//!
//! ## Architecture
//!
//! ```text
//! DnsReconciler ─┐
//! DiskUploader  ─┼──→ ControlPlane (typed remote calls) ──→ CommandRunner ──→ az / azcopy
//! VmLauncher    ─┘         AzureCli
//! ```
//!
//! - **ControlPlane**: one method per remote operation the deployment issues.
//! - **AzureCli**: builds `az`/`azcopy` command lines for each operation.
//! - **CommandRunner**: executes a command line and captures its output.

mod azure;
#[cfg(test)]
pub(crate) mod fake;
mod runner;

pub use azure::AzureCli;
pub use runner::{CliCommand, CommandOutput, CommandRunner, ProcessRunner};

use crate::disk::DiskHandle;
use crate::dns::DnsZone;
use crate::network::{NsgRef, SecurityRule};
use crate::vm::VmSpec;
use async_trait::async_trait;
use cvmdeploy_shared::errors::DeployResult;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// A static public IPv4 address reserved for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedAddress {
    /// Resource name of the public IP (passed to the VM as its NIC address).
    pub name: String,
    pub address: Ipv4Addr,
}

/// Remote operations issued by a deployment.
///
/// Each call is synchronous from the caller's point of view: it returns only
/// after the control plane reports completion, and any failure is returned
/// as-is without retry.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_resource_group(&self, name: &str, region: &str) -> DeployResult<()>;

    /// Reserve a zone-redundant static IPv4 address and return it.
    async fn create_public_ip(
        &self,
        name: &str,
        resource_group: &str,
        region: &str,
    ) -> DeployResult<ReservedAddress>;

    /// Addresses currently present in the A record set `record` of `zone`.
    async fn list_dns_a_records(&self, zone: &DnsZone, record: &str)
    -> DeployResult<Vec<Ipv4Addr>>;

    /// Remove one address, keeping the (possibly empty) record set.
    async fn remove_dns_a_record(
        &self,
        zone: &DnsZone,
        record: &str,
        address: Ipv4Addr,
    ) -> DeployResult<()>;

    async fn add_dns_a_record(
        &self,
        zone: &DnsZone,
        record: &str,
        address: Ipv4Addr,
        ttl_secs: u32,
    ) -> DeployResult<()>;

    /// Create a confidential-VM OS disk in upload mode.
    async fn create_upload_disk(&self, disk: &DiskHandle) -> DeployResult<()>;

    /// Issue a write SAS URI for `disk`, valid for `duration`.
    async fn grant_disk_write(&self, disk: &DiskHandle, duration: Duration)
    -> DeployResult<String>;

    /// Copy `image` into the page blob behind `sas_uri`.
    async fn copy_to_page_blob(&self, image: &Path, sas_uri: &str) -> DeployResult<()>;

    async fn revoke_disk_access(&self, disk: &DiskHandle) -> DeployResult<()>;

    async fn create_nsg(&self, group: &NsgRef) -> DeployResult<()>;

    /// Create or update a rule by name.
    async fn create_nsg_rule(&self, group: &NsgRef, rule: &SecurityRule) -> DeployResult<()>;

    async fn create_vm(&self, spec: &VmSpec<'_>) -> DeployResult<()>;

    async fn delete_vm(&self, name: &str, resource_group: &str) -> DeployResult<()>;

    async fn delete_disk(&self, name: &str, resource_group: &str) -> DeployResult<()>;
}
