//! Confidential VM launch.

mod boot_config;

pub use boot_config::{BootConfig, BootConfigFile};

use crate::control::{ControlPlane, ReservedAddress};
use crate::descriptor::DeploymentDescriptor;
use crate::disk::DiskHandle;
use crate::network::NsgRef;
use cvmdeploy_shared::errors::DeployResult;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::Path;

/// Security settings of a confidential VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfidentialProfile {
    pub security_type: &'static str,
    pub enable_vtpm: bool,
    pub enable_secure_boot: bool,
    pub os_disk_encryption: &'static str,
}

/// Profile used for devnet nodes: vTPM on, secure boot off, TPM-bound OS
/// disk encryption that is not persisted across deallocation.
pub const DEVNET_PROFILE: ConfidentialProfile = ConfidentialProfile {
    security_type: "ConfidentialVM",
    enable_vtpm: true,
    enable_secure_boot: false,
    os_disk_encryption: "NonPersistedTPM",
};

/// Arguments of a single VM create call.
#[derive(Debug, Clone, Copy)]
pub struct VmSpec<'a> {
    pub name: &'a str,
    pub size: &'a str,
    pub resource_group: &'a str,
    pub region: &'a str,
    pub os_disk_name: &'a str,
    pub nsg_name: &'a str,
    pub public_ip_name: &'a str,
    pub profile: &'a ConfidentialProfile,
    pub user_data: Option<&'a Path>,
}

/// A VM that the control plane reported as created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchedVm {
    pub name: String,
    pub resource_group: String,
    pub region: String,
    pub size: String,
    pub os_disk_name: String,
    pub nsg_name: String,
    pub public_ip_name: String,
    pub public_ip: Ipv4Addr,
    pub profile: ConfidentialProfile,
}

pub struct VmLauncher<'a> {
    control: &'a dyn ControlPlane,
}

impl<'a> VmLauncher<'a> {
    pub fn new(control: &'a dyn ControlPlane) -> Self {
        Self { control }
    }

    /// Create the VM on `disk`, wired to `nsg` and `address`.
    ///
    /// The boot config file exists only while the create call runs.
    pub async fn launch(
        &self,
        descriptor: &DeploymentDescriptor,
        disk: &DiskHandle,
        address: &ReservedAddress,
        nsg: &NsgRef,
        boot: &BootConfig,
    ) -> DeployResult<LaunchedVm> {
        let created = {
            let user_data = boot.materialize()?;
            let spec = VmSpec {
                name: descriptor.vm_name(),
                size: &descriptor.vm_size,
                resource_group: descriptor.resource_group(),
                region: &descriptor.region,
                os_disk_name: &disk.name,
                nsg_name: &nsg.name,
                public_ip_name: &address.name,
                profile: &DEVNET_PROFILE,
                user_data: Some(user_data.path()),
            };

            tracing::info!(
                vm = %spec.name,
                size = %spec.size,
                disk = %spec.os_disk_name,
                public_ip = %address.address,
                "Creating confidential VM"
            );
            self.control.create_vm(&spec).await
        };
        created?;

        Ok(LaunchedVm {
            name: descriptor.vm_name().to_string(),
            resource_group: descriptor.resource_group().to_string(),
            region: descriptor.region.clone(),
            size: descriptor.vm_size.clone(),
            os_disk_name: disk.name.clone(),
            nsg_name: nsg.name.clone(),
            public_ip_name: address.name.clone(),
            public_ip: address.address,
            profile: DEVNET_PROFILE,
        })
    }
}
