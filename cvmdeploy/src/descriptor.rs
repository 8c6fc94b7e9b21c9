//! Immutable description of one deployment.

use crate::dns::DnsZone;
use crate::network::validate_ssh_source;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest name accepted for the VM, resource group and public IP.
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Record name inside the zone, e.g. `node-7`.
    pub record: String,
    pub zone: DnsZone,
}

/// Everything a deployment needs, fixed before the first remote call.
///
/// The deployment name doubles as the VM, resource group, NSG and public IP
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    pub name: String,
    pub region: String,
    pub vm_size: String,
    pub image_path: PathBuf,
    /// Address or CIDR prefix allowed to reach SSH.
    pub source_prefix: String,
    pub domain: DomainConfig,
    pub certbot_email: String,
    pub show_logs: bool,
}

impl DeploymentDescriptor {
    pub fn vm_name(&self) -> &str {
        &self.name
    }

    pub fn resource_group(&self) -> &str {
        &self.name
    }

    pub fn nsg_name(&self) -> &str {
        &self.name
    }

    pub fn public_ip_name(&self) -> &str {
        &self.name
    }

    /// File name component of the image path.
    pub fn image_file_name(&self) -> String {
        self.image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `{vm_name}_{image file name}`.
    pub fn disk_name(&self) -> String {
        format!("{}_{}", self.vm_name(), self.image_file_name())
    }

    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.domain.record, self.domain.zone.name)
    }

    pub fn url(&self) -> String {
        format!("https://{}", self.fqdn())
    }

    pub fn validate(&self) -> DeployResult<()> {
        validate_resource_name("deployment name", &self.name)?;
        for (field, value) in [
            ("region", &self.region),
            ("vm size", &self.vm_size),
            ("DNS record", &self.domain.record),
            ("DNS zone", &self.domain.zone.name),
            ("DNS zone resource group", &self.domain.zone.resource_group),
            ("certbot email", &self.certbot_email),
        ] {
            if value.trim().is_empty() {
                return Err(DeployError::InvalidArgument(format!("{field} is empty")));
            }
            if value.contains(['"', '\'', '\n', '\r']) || value.trim() != value {
                return Err(DeployError::InvalidArgument(format!(
                    "{field} {value:?} contains quotes, newlines or surrounding whitespace"
                )));
            }
        }
        if !self.certbot_email.contains('@') {
            return Err(DeployError::InvalidArgument(format!(
                "certbot email {:?} is not an email address",
                self.certbot_email
            )));
        }
        if self.image_file_name().is_empty() {
            return Err(DeployError::InvalidArgument(format!(
                "image path {} has no file name",
                self.image_path.display()
            )));
        }
        validate_ssh_source(&self.source_prefix)
    }
}

fn validate_resource_name(field: &str, name: &str) -> DeployResult<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if name.is_empty() || name.len() > MAX_NAME_LEN || !valid_chars || !starts_ok {
        return Err(DeployError::InvalidArgument(format!(
            "{field} {name:?} must be 1-{MAX_NAME_LEN} characters of letters, digits, '-', '_' or '.', starting with a letter or digit"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_descriptor(image: impl Into<PathBuf>) -> DeploymentDescriptor {
    DeploymentDescriptor {
        name: "node-7".into(),
        region: "eastus2".into(),
        vm_size: "Standard_EC4es_v5".into(),
        image_path: image.into(),
        source_prefix: "203.0.113.5/32".into(),
        domain: DomainConfig {
            record: "node-7".into(),
            zone: DnsZone {
                name: "seismicdev.net".into(),
                resource_group: "yocto-testnet".into(),
            },
        },
        certbot_email: "c@seismic.systems".into(),
        show_logs: false,
    }
}
