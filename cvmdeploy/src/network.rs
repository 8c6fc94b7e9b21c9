//! Network security group provisioning.
//!
//! The inbound rule set is plain data ([`SERVICE_PORTS`]) turned into a
//! validated [`SecurityRuleTable`] and applied rule by rule.

use crate::control::ControlPlane;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

/// Azure accepts rule priorities in this range; lower wins.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u16> = 100..=4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Any,
}

impl Protocol {
    pub fn as_az(&self) -> &'static str {
        match self {
            Protocol::Tcp => "Tcp",
            Protocol::Udp => "Udp",
            Protocol::Any => "*",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortRange {
    Single(u16),
    Range(u16, u16),
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRange::Single(port) => write!(f, "{}", port),
            PortRange::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

/// Where inbound traffic may originate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    Any,
    /// An address or CIDR prefix, passed through verbatim.
    Prefix(String),
}

impl RuleSource {
    pub fn as_az(&self) -> &str {
        match self {
            RuleSource::Any => "*",
            RuleSource::Prefix(prefix) => prefix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub priority: u16,
    pub port: PortRange,
    pub protocol: Protocol,
    pub source: RuleSource,
    pub description: String,
}

/// A set of inbound allow rules with unique names and priorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRuleTable {
    rules: Vec<SecurityRule>,
}

impl SecurityRuleTable {
    pub fn new(rules: Vec<SecurityRule>) -> DeployResult<Self> {
        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for rule in &rules {
            if rule.name.is_empty() {
                return Err(DeployError::Config("security rule with empty name".into()));
            }
            if !PRIORITY_RANGE.contains(&rule.priority) {
                return Err(DeployError::Config(format!(
                    "security rule {} has priority {} outside {}..={}",
                    rule.name,
                    rule.priority,
                    PRIORITY_RANGE.start(),
                    PRIORITY_RANGE.end()
                )));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(DeployError::Config(format!(
                    "duplicate security rule name {}",
                    rule.name
                )));
            }
            if !priorities.insert(rule.priority) {
                return Err(DeployError::Config(format!(
                    "security rule {} reuses priority {}",
                    rule.name, rule.priority
                )));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&SecurityRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// Public service ports: (name, priority, port, protocol, description).
///
/// The SSH rule is not listed here; its source is the caller's prefix.
pub const SERVICE_PORTS: &[(&str, u16, u16, Protocol, &str)] = &[
    ("AllowAnyHTTPInbound", 101, 80, Protocol::Tcp, "HTTP"),
    ("AllowAnyHTTPSInbound", 102, 443, Protocol::Tcp, "HTTPS"),
    ("TCP8545", 110, 8545, Protocol::Tcp, "Execution JSON-RPC"),
    ("TCP8551", 111, 8551, Protocol::Tcp, "Engine API"),
    ("TCP8645", 112, 8645, Protocol::Tcp, "Enclave RPC"),
    ("TCP8745", 113, 8745, Protocol::Tcp, "Enclave RPC (secondary)"),
    ("ANY30303", 114, 30303, Protocol::Any, "P2P discovery and sync"),
    ("TCP7878", 115, 7878, Protocol::Tcp, "Node service"),
    ("TCP7936", 116, 7936, Protocol::Tcp, "Attestation service"),
];

pub const SSH_RULE_NAME: &str = "AllowSSH";
pub const SSH_PRIORITY: u16 = 100;

/// Check that `source` is a single address or CIDR prefix narrower than
/// the whole address space.
pub fn validate_ssh_source(source: &str) -> DeployResult<()> {
    let invalid = |why: &str| {
        DeployError::InvalidArgument(format!("invalid SSH source {:?}: {}", source, why))
    };
    let source = source.trim();
    if source.is_empty() || source == "*" {
        return Err(invalid("must be an address or CIDR prefix"));
    }
    let (addr, prefix) = match source.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (source, None),
    };
    let addr: IpAddr = addr.parse().map_err(|_| invalid("not an IP address"))?;
    if let Some(prefix) = prefix {
        let bits: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if bits == 0 {
            return Err(invalid("a /0 prefix would open SSH to everyone"));
        }
        if bits > max {
            return Err(invalid("prefix length too long"));
        }
    }
    Ok(())
}

/// Build the standard devnet inbound table with SSH restricted to
/// `ssh_source`.
pub fn standard_rule_table(ssh_source: &str) -> DeployResult<SecurityRuleTable> {
    validate_ssh_source(ssh_source)?;

    let mut rules = Vec::with_capacity(SERVICE_PORTS.len() + 1);
    rules.push(SecurityRule {
        name: SSH_RULE_NAME.to_string(),
        priority: SSH_PRIORITY,
        port: PortRange::Single(22),
        protocol: Protocol::Tcp,
        source: RuleSource::Prefix(ssh_source.to_string()),
        description: "SSH from the deploying host".to_string(),
    });
    rules.extend(
        SERVICE_PORTS
            .iter()
            .map(|&(name, priority, port, protocol, description)| SecurityRule {
                name: name.to_string(),
                priority,
                port: PortRange::Single(port),
                protocol,
                source: RuleSource::Any,
                description: description.to_string(),
            }),
    );
    SecurityRuleTable::new(rules)
}

/// A network security group by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsgRef {
    pub name: String,
    pub resource_group: String,
    pub region: String,
}

pub struct NetworkSecurityProvisioner<'a> {
    control: &'a dyn ControlPlane,
}

impl<'a> NetworkSecurityProvisioner<'a> {
    pub fn new(control: &'a dyn ControlPlane) -> Self {
        Self { control }
    }

    /// Create the group, then apply every rule in table order.
    ///
    /// Rules are upserted by name, so applying the same table again leaves
    /// the group unchanged.
    pub async fn provision(&self, group: &NsgRef, table: &SecurityRuleTable) -> DeployResult<()> {
        tracing::info!(nsg = %group.name, "Creating network security group");
        self.control.create_nsg(group).await?;

        for rule in table.rules() {
            tracing::info!(
                nsg = %group.name,
                rule = %rule.name,
                priority = rule.priority,
                port = %rule.port,
                protocol = rule.protocol.as_az(),
                "Applying inbound rule"
            );
            self.control.create_nsg_rule(group, rule).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::FakeControlPlane;

    fn group() -> NsgRef {
        NsgRef {
            name: "node-7".into(),
            resource_group: "node-7".into(),
            region: "eastus2".into(),
        }
    }

    #[test]
    fn test_standard_table_contents() {
        let table = standard_rule_table("203.0.113.5/32").unwrap();
        assert_eq!(table.rules().len(), 10);

        let ssh = table.get("AllowSSH").unwrap();
        assert_eq!(ssh.priority, 100);
        assert_eq!(ssh.port, PortRange::Single(22));
        assert_eq!(ssh.source, RuleSource::Prefix("203.0.113.5/32".into()));

        let p2p = table.get("ANY30303").unwrap();
        assert_eq!(p2p.protocol, Protocol::Any);
        assert_eq!(p2p.port.to_string(), "30303");

        // Only SSH is restricted.
        assert!(
            table
                .rules()
                .iter()
                .filter(|r| r.name != "AllowSSH")
                .all(|r| r.source == RuleSource::Any)
        );
    }

    #[test]
    fn test_priorities_and_names_unique() {
        let table = standard_rule_table("203.0.113.5").unwrap();
        let priorities: HashSet<_> = table.rules().iter().map(|r| r.priority).collect();
        let names: HashSet<_> = table.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(priorities.len(), table.rules().len());
        assert_eq!(names.len(), table.rules().len());
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let mut rules = standard_rule_table("203.0.113.5/32").unwrap().rules().to_vec();
        rules[1].priority = 100;
        assert!(matches!(
            SecurityRuleTable::new(rules),
            Err(DeployError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut rules = standard_rule_table("203.0.113.5/32").unwrap().rules().to_vec();
        rules[2].name = "AllowSSH".into();
        assert!(SecurityRuleTable::new(rules).is_err());
    }

    #[test]
    fn test_priority_out_of_range_rejected() {
        let mut rules = standard_rule_table("203.0.113.5/32").unwrap().rules().to_vec();
        rules[0].priority = 99;
        assert!(SecurityRuleTable::new(rules.clone()).is_err());
        rules[0].priority = 4097;
        assert!(SecurityRuleTable::new(rules).is_err());
    }

    #[test]
    fn test_ssh_source_validation() {
        assert!(validate_ssh_source("203.0.113.5").is_ok());
        assert!(validate_ssh_source("203.0.113.0/24").is_ok());
        assert!(validate_ssh_source("2001:db8::1/128").is_ok());
        assert!(validate_ssh_source("*").is_err());
        assert!(validate_ssh_source("0.0.0.0/0").is_err());
        assert!(validate_ssh_source("203.0.113.5/33").is_err());
        assert!(validate_ssh_source("example.com").is_err());
        assert!(validate_ssh_source("").is_err());
    }

    #[test]
    fn test_port_range_display() {
        assert_eq!(PortRange::Single(22).to_string(), "22");
        assert_eq!(PortRange::Range(30000, 30010).to_string(), "30000-30010");
    }

    #[tokio::test]
    async fn test_provision_applies_all_rules() {
        let fake = FakeControlPlane::new();
        let table = standard_rule_table("203.0.113.5/32").unwrap();
        NetworkSecurityProvisioner::new(&fake)
            .provision(&group(), &table)
            .await
            .unwrap();

        let state = fake.state();
        let rules = state.nsgs.get("node-7").unwrap();
        assert_eq!(rules.len(), 10);
        assert_eq!(
            rules.get("AllowSSH").unwrap().source,
            RuleSource::Prefix("203.0.113.5/32".into())
        );
    }

    #[tokio::test]
    async fn test_reprovision_creates_no_duplicates() {
        let fake = FakeControlPlane::new();
        let table = standard_rule_table("203.0.113.5/32").unwrap();
        let provisioner = NetworkSecurityProvisioner::new(&fake);
        provisioner.provision(&group(), &table).await.unwrap();
        provisioner.provision(&group(), &table).await.unwrap();

        assert_eq!(fake.state().nsgs.get("node-7").unwrap().len(), 10);
        assert_eq!(fake.count("create_nsg_rule"), 20);
    }

    #[tokio::test]
    async fn test_rule_failure_stops_provisioning() {
        let fake = FakeControlPlane::new();
        fake.fail_after("create_nsg_rule", 3);
        let table = standard_rule_table("203.0.113.5/32").unwrap();

        let result = NetworkSecurityProvisioner::new(&fake)
            .provision(&group(), &table)
            .await;
        assert!(result.is_err());
        assert_eq!(fake.count("create_nsg_rule"), 4);
        assert_eq!(fake.state().nsgs.get("node-7").unwrap().len(), 3);
    }
}
