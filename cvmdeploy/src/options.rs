//! Deployment options from the command line and an optional JSON file.

use crate::control::{CliCommand, CommandRunner};
use crate::descriptor::{DeploymentDescriptor, DomainConfig};
use crate::dns::DnsZone;
use clap::Args;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGION: &str = "eastus2";
pub const DEFAULT_VM_SIZE: &str = "Standard_EC4es_v5";
pub const DEFAULT_DOMAIN_RESOURCE_GROUP: &str = "yocto-testnet";
pub const DEFAULT_DOMAIN_NAME: &str = "seismicdev.net";
pub const DEFAULT_CERTBOT_EMAIL: &str = "c@seismic.systems";

/// Service that echoes the caller's public address.
const IP_ECHO_URL: &str = "ifconfig.me";

/// Options for one deployment. Every field may come from the command line
/// or from a `--config` JSON file; command line values win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployOptions {
    /// Disk image to upload (fixed-size VHD)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Deployment name, used for the VM, resource group, NSG and public IP
    #[arg(long)]
    pub name: Option<String>,

    /// Azure region [default: eastus2]
    #[arg(short = 'r', long)]
    pub region: Option<String>,

    /// VM size [default: Standard_EC4es_v5]
    #[arg(long)]
    pub vm_size: Option<String>,

    /// Address or CIDR allowed to SSH in [default: this host's public IP]
    #[arg(long)]
    pub source_ip: Option<String>,

    /// DNS record name [default: the deployment name]
    #[arg(long)]
    pub record: Option<String>,

    /// Resource group of the DNS zone [default: yocto-testnet]
    #[arg(long)]
    pub domain_resource_group: Option<String>,

    /// DNS zone [default: seismicdev.net]
    #[arg(long)]
    pub domain_name: Option<String>,

    /// Email used for certificate issuance [default: c@seismic.systems]
    #[arg(long)]
    pub certbot_email: Option<String>,

    /// Stream output of long-running az/azcopy commands
    #[arg(short = 'v', long = "logs")]
    pub show_logs: bool,
}

impl DeployOptions {
    pub fn from_file(path: &Path) -> DeployResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DeployError::Config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Fill fields unset here from `file`.
    pub fn merge(self, file: DeployOptions) -> Self {
        Self {
            image: self.image.or(file.image),
            name: self.name.or(file.name),
            region: self.region.or(file.region),
            vm_size: self.vm_size.or(file.vm_size),
            source_ip: self.source_ip.or(file.source_ip),
            record: self.record.or(file.record),
            domain_resource_group: self.domain_resource_group.or(file.domain_resource_group),
            domain_name: self.domain_name.or(file.domain_name),
            certbot_email: self.certbot_email.or(file.certbot_email),
            show_logs: self.show_logs || file.show_logs,
        }
    }

    /// Apply defaults. `source_prefix` is used when no source IP was given.
    pub fn into_descriptor(self, source_prefix: Option<String>) -> DeployResult<DeploymentDescriptor> {
        let image = self
            .image
            .ok_or_else(|| DeployError::Config("--image is required".into()))?;
        let name = self
            .name
            .ok_or_else(|| DeployError::Config("--name is required".into()))?;
        let source = self.source_ip.or(source_prefix).ok_or_else(|| {
            DeployError::Config("--source-ip is required when it cannot be discovered".into())
        })?;

        let descriptor = DeploymentDescriptor {
            region: self.region.unwrap_or_else(|| DEFAULT_REGION.into()),
            vm_size: self.vm_size.unwrap_or_else(|| DEFAULT_VM_SIZE.into()),
            image_path: image,
            source_prefix: source,
            domain: DomainConfig {
                record: self.record.unwrap_or_else(|| name.clone()),
                zone: DnsZone {
                    name: self.domain_name.unwrap_or_else(|| DEFAULT_DOMAIN_NAME.into()),
                    resource_group: self
                        .domain_resource_group
                        .unwrap_or_else(|| DEFAULT_DOMAIN_RESOURCE_GROUP.into()),
                },
            },
            certbot_email: self
                .certbot_email
                .unwrap_or_else(|| DEFAULT_CERTBOT_EMAIL.into()),
            show_logs: self.show_logs,
            name,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// This host's public IP as reported by an echo service, used verbatim.
pub async fn discover_source_ip(runner: &dyn CommandRunner) -> DeployResult<String> {
    let cmd = CliCommand::new("curl").args(["-s", IP_ECHO_URL]);
    let out = runner.run(&cmd).await?;
    let ip = out.trimmed();
    ip.parse::<IpAddr>().map_err(|_| {
        DeployError::InvalidArgument(format!(
            "could not discover public IP ({IP_ECHO_URL} returned {ip:?}); pass --source-ip"
        ))
    })?;
    tracing::info!(source_ip = %ip, "Discovered public IP for SSH rule");
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CommandOutput;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn cli() -> DeployOptions {
        DeployOptions {
            image: Some("/images/seismic-devnet.vhd".into()),
            name: Some("node-7".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let d = cli()
            .into_descriptor(Some("203.0.113.5/32".into()))
            .unwrap();
        assert_eq!(d.region, "eastus2");
        assert_eq!(d.vm_size, "Standard_EC4es_v5");
        assert_eq!(d.domain.record, "node-7");
        assert_eq!(d.domain.zone.name, "seismicdev.net");
        assert_eq!(d.domain.zone.resource_group, "yocto-testnet");
        assert_eq!(d.certbot_email, "c@seismic.systems");
        assert_eq!(d.source_prefix, "203.0.113.5/32");
        assert!(!d.show_logs);
    }

    #[test]
    fn test_explicit_source_ip_wins_over_discovered() {
        let mut opts = cli();
        opts.source_ip = Some("198.51.100.0/24".into());
        let d = opts.into_descriptor(Some("203.0.113.5".into())).unwrap();
        assert_eq!(d.source_prefix, "198.51.100.0/24");
    }

    #[test]
    fn test_missing_required_fields() {
        let mut opts = cli();
        opts.image = None;
        assert!(matches!(
            opts.into_descriptor(Some("203.0.113.5".into())),
            Err(DeployError::Config(_))
        ));
        assert!(cli().into_descriptor(None).is_err());
    }

    #[test]
    fn test_merge_prefers_cli() {
        let file = DeployOptions {
            name: Some("from-file".into()),
            region: Some("westeurope".into()),
            record: Some("rpc".into()),
            show_logs: true,
            ..Default::default()
        };
        let merged = cli().merge(file);
        assert_eq!(merged.name.as_deref(), Some("node-7"));
        assert_eq!(merged.region.as_deref(), Some("westeurope"));
        assert_eq!(merged.record.as_deref(), Some("rpc"));
        assert!(merged.show_logs);
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");
        std::fs::write(
            &path,
            r#"{"name": "node-9", "vm_size": "Standard_EC8es_v5", "show_logs": true}"#,
        )
        .unwrap();

        let opts = DeployOptions::from_file(&path).unwrap();
        assert_eq!(opts.name.as_deref(), Some("node-9"));
        assert_eq!(opts.vm_size.as_deref(), Some("Standard_EC8es_v5"));
        assert!(opts.show_logs);
        assert!(opts.image.is_none());
    }

    #[test]
    fn test_from_file_rejects_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");
        std::fs::write(&path, r#"{"nmae": "typo"}"#).unwrap();
        assert!(matches!(
            DeployOptions::from_file(&path),
            Err(DeployError::Config(_))
        ));
    }

    struct EchoRunner(&'static str);

    #[async_trait]
    impl CommandRunner for EchoRunner {
        async fn run(&self, cmd: &CliCommand) -> DeployResult<CommandOutput> {
            assert_eq!(cmd.program(), "curl");
            assert_eq!(cmd.raw_args(), ["-s", "ifconfig.me"]);
            Ok(CommandOutput::new(self.0))
        }
    }

    #[tokio::test]
    async fn test_discover_source_ip() {
        let ip = discover_source_ip(&EchoRunner("203.0.113.5\n")).await.unwrap();
        assert_eq!(ip, "203.0.113.5");
    }

    #[tokio::test]
    async fn test_discover_rejects_non_ip() {
        let err = discover_source_ip(&EchoRunner("<html>rate limited</html>"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidArgument(_)));
    }
}
