//! Azure CLI implementation of the control plane.

use super::runner::{CliCommand, CommandRunner};
use super::{ControlPlane, ReservedAddress};
use crate::disk::DiskHandle;
use crate::dns::DnsZone;
use crate::network::{NsgRef, SecurityRule};
use crate::vm::VmSpec;
use async_trait::async_trait;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const AZ: &str = "az";
const AZCOPY: &str = "azcopy";

/// Fixed properties of every uploaded OS disk.
mod disk_props {
    pub const OS_TYPE: &str = "Linux";
    pub const SKU: &str = "standard_lrs";
    pub const SECURITY_TYPE: &str = "ConfidentialVM_NonPersistedTPM";
    pub const HYPER_V_GENERATION: &str = "V2";
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantAccessResponse {
    access_sas: String,
}

/// `ControlPlane` backed by the `az` and `azcopy` command line tools.
#[derive(Clone)]
pub struct AzureCli {
    runner: Arc<dyn CommandRunner>,
    /// Stream output of long-running commands to the terminal.
    show_logs: bool,
}

impl AzureCli {
    pub fn new(runner: Arc<dyn CommandRunner>, show_logs: bool) -> Self {
        Self { runner, show_logs }
    }

    fn az(&self) -> CliCommand {
        CliCommand::new(AZ)
    }
}

impl std::fmt::Debug for AzureCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCli")
            .field("show_logs", &self.show_logs)
            .finish()
    }
}

fn parse_ipv4(raw: &str, what: &str) -> DeployResult<Ipv4Addr> {
    raw.trim().parse().map_err(|_| {
        DeployError::Internal(format!("control plane returned invalid {what}: {raw:?}"))
    })
}

#[async_trait]
impl ControlPlane for AzureCli {
    async fn create_resource_group(&self, name: &str, region: &str) -> DeployResult<()> {
        let cmd = self
            .az()
            .args(["group", "create", "--name", name, "--location", region]);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn create_public_ip(
        &self,
        name: &str,
        resource_group: &str,
        region: &str,
    ) -> DeployResult<ReservedAddress> {
        let cmd = self.az().args([
            "network",
            "public-ip",
            "create",
            "--resource-group",
            resource_group,
            "--name",
            name,
            "--location",
            region,
            "--version",
            "IPv4",
            "--sku",
            "standard",
            "--zone",
            "1",
            "2",
            "3",
            "--query",
            "publicIp.ipAddress",
            "-o",
            "tsv",
        ]);
        let out = self.runner.run(&cmd).await?;
        Ok(ReservedAddress {
            name: name.to_string(),
            address: parse_ipv4(out.trimmed(), "public IP address")?,
        })
    }

    async fn list_dns_a_records(
        &self,
        zone: &DnsZone,
        record: &str,
    ) -> DeployResult<Vec<Ipv4Addr>> {
        // The suffix filter also matches `rpc.<record>`; keep only the exact set.
        let query = format!(
            "[?name=='{}'].ARecords[].ipv4Address",
            record.replace('\'', "\\'")
        );
        let cmd = self.az().args([
            "network",
            "dns",
            "record-set",
            "a",
            "list",
            "--resource-group",
            &zone.resource_group,
            "--zone-name",
            &zone.name,
            "--recordsetnamesuffix",
            record,
            "--query",
            &query,
            "-o",
            "tsv",
        ]);
        let out = self.runner.run(&cmd).await?;
        out.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| parse_ipv4(line, "DNS A record"))
            .collect()
    }

    async fn remove_dns_a_record(
        &self,
        zone: &DnsZone,
        record: &str,
        address: Ipv4Addr,
    ) -> DeployResult<()> {
        let cmd = self.az().args([
            "network",
            "dns",
            "record-set",
            "a",
            "remove-record",
            "--resource-group",
            &zone.resource_group,
            "--zone-name",
            &zone.name,
            "--record-set-name",
            record,
            "--ipv4-address",
            &address.to_string(),
            "--keep-empty-record-set",
        ]);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn add_dns_a_record(
        &self,
        zone: &DnsZone,
        record: &str,
        address: Ipv4Addr,
        ttl_secs: u32,
    ) -> DeployResult<()> {
        let cmd = self.az().args([
            "network",
            "dns",
            "record-set",
            "a",
            "add-record",
            "--ttl",
            &ttl_secs.to_string(),
            "--resource-group",
            &zone.resource_group,
            "--zone-name",
            &zone.name,
            "--record-set-name",
            record,
            "--ipv4-address",
            &address.to_string(),
        ]);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn create_upload_disk(&self, disk: &DiskHandle) -> DeployResult<()> {
        let cmd = self
            .az()
            .args([
                "disk",
                "create",
                "-n",
                &disk.name,
                "-g",
                &disk.resource_group,
                "-l",
                &disk.region,
                "--os-type",
                disk_props::OS_TYPE,
                "--upload-type",
                "Upload",
                "--upload-size-bytes",
                &disk.upload_size_bytes.to_string(),
                "--sku",
                disk_props::SKU,
                "--security-type",
                disk_props::SECURITY_TYPE,
                "--hyper-v-generation",
                disk_props::HYPER_V_GENERATION,
            ])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn grant_disk_write(
        &self,
        disk: &DiskHandle,
        duration: Duration,
    ) -> DeployResult<String> {
        // Output carries the SAS URI, so it is always captured.
        let cmd = self.az().args([
            "disk",
            "grant-access",
            "-n",
            &disk.name,
            "-g",
            &disk.resource_group,
            "--access-level",
            "Write",
            "--duration-in-seconds",
            &duration.as_secs().to_string(),
            "-o",
            "json",
        ]);
        let out = self.runner.run(&cmd).await?;
        let grant: GrantAccessResponse = serde_json::from_str(&out.stdout)?;
        if grant.access_sas.is_empty() {
            return Err(DeployError::Internal(format!(
                "grant-access for disk {} returned an empty SAS URI",
                disk.name
            )));
        }
        Ok(grant.access_sas)
    }

    async fn copy_to_page_blob(&self, image: &Path, sas_uri: &str) -> DeployResult<()> {
        let cmd = CliCommand::new(AZCOPY)
            .arg("copy")
            .arg(image.to_string_lossy())
            .secret_arg(sas_uri)
            .args(["--blob-type", "PageBlob"])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn revoke_disk_access(&self, disk: &DiskHandle) -> DeployResult<()> {
        let cmd = self
            .az()
            .args([
                "disk",
                "revoke-access",
                "-n",
                &disk.name,
                "-g",
                &disk.resource_group,
            ])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn create_nsg(&self, group: &NsgRef) -> DeployResult<()> {
        let cmd = self
            .az()
            .args([
                "network",
                "nsg",
                "create",
                "--name",
                &group.name,
                "--resource-group",
                &group.resource_group,
                "--location",
                &group.region,
            ])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn create_nsg_rule(&self, group: &NsgRef, rule: &SecurityRule) -> DeployResult<()> {
        let cmd = self
            .az()
            .args([
                "network",
                "nsg",
                "rule",
                "create",
                "--nsg-name",
                &group.name,
                "--resource-group",
                &group.resource_group,
                "--name",
                &rule.name,
                "--priority",
                &rule.priority.to_string(),
                "--destination-port-ranges",
                &rule.port.to_string(),
                "--access",
                "Allow",
                "--direction",
                "Inbound",
                "--protocol",
                rule.protocol.as_az(),
                "--source-address-prefixes",
                rule.source.as_az(),
            ])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn create_vm(&self, spec: &VmSpec<'_>) -> DeployResult<()> {
        let profile = spec.profile;
        let mut cmd = self.az().args([
            "vm",
            "create",
            "--name",
            spec.name,
            "--size",
            spec.size,
            "--resource-group",
            spec.resource_group,
            "--location",
            spec.region,
            "--attach-os-disk",
            spec.os_disk_name,
            "--security-type",
            profile.security_type,
            "--enable-vtpm",
            bool_flag(profile.enable_vtpm),
            "--enable-secure-boot",
            bool_flag(profile.enable_secure_boot),
            "--os-disk-security-encryption-type",
            profile.os_disk_encryption,
            "--os-type",
            "Linux",
            "--nsg",
            spec.nsg_name,
            "--public-ip-address",
            spec.public_ip_name,
        ]);
        if let Some(user_data) = spec.user_data {
            cmd = cmd.arg("--user-data").arg(user_data.to_string_lossy());
        }
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn delete_vm(&self, name: &str, resource_group: &str) -> DeployResult<()> {
        let cmd = self
            .az()
            .args(["vm", "delete", "-g", resource_group, "--name", name, "--yes"])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn delete_disk(&self, name: &str, resource_group: &str) -> DeployResult<()> {
        let cmd = self
            .az()
            .args(["disk", "delete", "-g", resource_group, "-n", name, "--yes"])
            .stream_output(self.show_logs);
        self.runner.run(&cmd).await?;
        Ok(())
    }
}

fn bool_flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CommandOutput;
    use crate::network::standard_rule_table;
    use crate::vm::DEVNET_PROFILE;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Records every command and replies with scripted stdout.
    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<CliCommand>>,
        replies: Mutex<VecDeque<String>>,
    }

    impl RecordingRunner {
        fn replying(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            })
        }

        fn last(&self) -> CliCommand {
            self.commands.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, cmd: &CliCommand) -> DeployResult<CommandOutput> {
            self.commands.lock().push(cmd.clone());
            let reply = self.replies.lock().pop_front().unwrap_or_default();
            Ok(CommandOutput::new(reply))
        }
    }

    fn zone() -> DnsZone {
        DnsZone {
            name: "seismicdev.net".into(),
            resource_group: "yocto-testnet".into(),
        }
    }

    fn disk() -> DiskHandle {
        DiskHandle {
            name: "node-7_image.vhd".into(),
            resource_group: "node-7".into(),
            region: "eastus2".into(),
            upload_size_bytes: 2_147_483_648,
        }
    }

    #[tokio::test]
    async fn test_create_public_ip_parses_address() {
        let runner = RecordingRunner::replying(&["20.1.2.3\n"]);
        let az = AzureCli::new(runner.clone(), false);

        let reserved = az.create_public_ip("node-7", "node-7", "eastus2").await.unwrap();
        assert_eq!(reserved.address, Ipv4Addr::new(20, 1, 2, 3));
        assert_eq!(reserved.name, "node-7");

        let cmd = runner.last();
        assert_eq!(cmd.program(), "az");
        assert_eq!(cmd.flag_value("--sku"), Some("standard"));
        assert_eq!(cmd.flag_value("--query"), Some("publicIp.ipAddress"));
    }

    #[tokio::test]
    async fn test_create_public_ip_rejects_garbage() {
        let runner = RecordingRunner::replying(&["None"]);
        let az = AzureCli::new(runner, false);
        let err = az.create_public_ip("n", "rg", "eastus2").await.unwrap_err();
        assert!(matches!(err, DeployError::Internal(_)));
    }

    #[tokio::test]
    async fn test_list_dns_records_skips_blank_lines() {
        let runner = RecordingRunner::replying(&["10.0.0.1\n\n10.0.0.2\n"]);
        let az = AzureCli::new(runner.clone(), false);

        let ips = az.list_dns_a_records(&zone(), "node-7").await.unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(runner.last().flag_value("--recordsetnamesuffix"), Some("node-7"));
    }

    #[tokio::test]
    async fn test_list_dns_records_matches_exact_record_name() {
        let runner = RecordingRunner::replying(&["10.0.0.1\n"]);
        let az = AzureCli::new(runner.clone(), false);

        az.list_dns_a_records(&zone(), "node-7").await.unwrap();
        assert_eq!(
            runner.last().flag_value("--query"),
            Some("[?name=='node-7'].ARecords[].ipv4Address")
        );
    }

    #[tokio::test]
    async fn test_list_dns_records_empty() {
        let runner = RecordingRunner::replying(&["\n"]);
        let az = AzureCli::new(runner, false);
        assert!(az.list_dns_a_records(&zone(), "node-7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_dns_record_keeps_empty_set() {
        let runner = RecordingRunner::replying(&[]);
        let az = AzureCli::new(runner.clone(), false);
        az.remove_dns_a_record(&zone(), "node-7", Ipv4Addr::new(10, 0, 0, 1))
            .await
            .unwrap();

        let cmd = runner.last();
        assert!(cmd.raw_args().iter().any(|a| a == "--keep-empty-record-set"));
        assert_eq!(cmd.flag_value("--ipv4-address"), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_add_dns_record_uses_ttl() {
        let runner = RecordingRunner::replying(&[]);
        let az = AzureCli::new(runner.clone(), false);
        az.add_dns_a_record(&zone(), "node-7", Ipv4Addr::new(20, 1, 2, 3), 300)
            .await
            .unwrap();
        let cmd = runner.last();
        assert_eq!(cmd.flag_value("--ttl"), Some("300"));
        assert_eq!(cmd.flag_value("--record-set-name"), Some("node-7"));
    }

    #[tokio::test]
    async fn test_create_disk_uses_exact_size() {
        let runner = RecordingRunner::replying(&[]);
        let az = AzureCli::new(runner.clone(), true);
        az.create_upload_disk(&disk()).await.unwrap();

        let cmd = runner.last();
        assert_eq!(cmd.flag_value("--upload-size-bytes"), Some("2147483648"));
        assert_eq!(cmd.flag_value("--upload-type"), Some("Upload"));
        assert_eq!(
            cmd.flag_value("--security-type"),
            Some("ConfidentialVM_NonPersistedTPM")
        );
        assert_eq!(cmd.flag_value("--hyper-v-generation"), Some("V2"));
        assert!(cmd.is_streamed());
    }

    #[tokio::test]
    async fn test_grant_parses_sas() {
        let runner = RecordingRunner::replying(&[r#"{"accessSas": "https://md/abc?sig=1"}"#]);
        let az = AzureCli::new(runner.clone(), true);
        let sas = az
            .grant_disk_write(&disk(), Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(sas, "https://md/abc?sig=1");

        let cmd = runner.last();
        assert_eq!(cmd.flag_value("--access-level"), Some("Write"));
        assert_eq!(cmd.flag_value("--duration-in-seconds"), Some("86400"));
        assert!(!cmd.is_streamed());
    }

    #[tokio::test]
    async fn test_grant_rejects_malformed_output() {
        let runner = RecordingRunner::replying(&["not json"]);
        let az = AzureCli::new(runner, false);
        let err = az
            .grant_disk_write(&disk(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Json(_)));
    }

    #[tokio::test]
    async fn test_copy_redacts_sas() {
        let runner = RecordingRunner::replying(&[]);
        let az = AzureCli::new(runner.clone(), false);
        az.copy_to_page_blob(Path::new("/img/node.vhd"), "https://md/abc?sig=secret")
            .await
            .unwrap();

        let cmd = runner.last();
        assert_eq!(cmd.program(), "azcopy");
        assert_eq!(cmd.flag_value("--blob-type"), Some("PageBlob"));
        assert!(!cmd.to_string().contains("sig=secret"));
    }

    #[tokio::test]
    async fn test_nsg_rule_shape() {
        let runner = RecordingRunner::replying(&[]);
        let az = AzureCli::new(runner.clone(), false);
        let group = NsgRef {
            name: "node-7".into(),
            resource_group: "node-7".into(),
            region: "eastus2".into(),
        };
        let table = standard_rule_table("203.0.113.5/32").unwrap();
        for rule in table.rules() {
            az.create_nsg_rule(&group, rule).await.unwrap();
        }

        let commands = runner.commands.lock().clone();
        let ssh = &commands[0];
        assert_eq!(ssh.flag_value("--name"), Some("AllowSSH"));
        assert_eq!(ssh.flag_value("--source-address-prefixes"), Some("203.0.113.5/32"));
        assert_eq!(ssh.flag_value("--destination-port-ranges"), Some("22"));

        let any = commands
            .iter()
            .find(|c| c.flag_value("--name") == Some("ANY30303"))
            .unwrap();
        assert_eq!(any.flag_value("--protocol"), Some("*"));
        assert_eq!(any.flag_value("--source-address-prefixes"), Some("*"));
    }

    #[tokio::test]
    async fn test_create_vm_flags() {
        let runner = RecordingRunner::replying(&[]);
        let az = AzureCli::new(runner.clone(), false);
        let spec = VmSpec {
            name: "node-7",
            size: "Standard_EC4es_v5",
            resource_group: "node-7",
            region: "eastus2",
            os_disk_name: "node-7_image.vhd",
            nsg_name: "node-7",
            public_ip_name: "node-7",
            profile: &DEVNET_PROFILE,
            user_data: Some(Path::new("/tmp/user-data.yaml")),
        };
        az.create_vm(&spec).await.unwrap();

        let cmd = runner.last();
        assert_eq!(cmd.flag_value("--attach-os-disk"), Some("node-7_image.vhd"));
        assert_eq!(cmd.flag_value("--security-type"), Some("ConfidentialVM"));
        assert_eq!(cmd.flag_value("--enable-vtpm"), Some("true"));
        assert_eq!(cmd.flag_value("--enable-secure-boot"), Some("false"));
        assert_eq!(
            cmd.flag_value("--os-disk-security-encryption-type"),
            Some("NonPersistedTPM")
        );
        assert_eq!(cmd.flag_value("--user-data"), Some("/tmp/user-data.yaml"));
    }
}
