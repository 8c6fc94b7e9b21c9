//! Deployment state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Step a deployment is in, in execution order.
///
/// `Done` and `Failed` are terminal. Ordering follows execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Validating,
    ResourceGroupCreating,
    AddressReserving,
    DnsReconciling,
    DiskCreating,
    AccessGranting,
    Transferring,
    AccessRevoking,
    SecurityProvisioning,
    Launching,
    Done,
    Failed,
}

impl DeployState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployState::Validating => "validating",
            DeployState::ResourceGroupCreating => "resource_group_creating",
            DeployState::AddressReserving => "address_reserving",
            DeployState::DnsReconciling => "dns_reconciling",
            DeployState::DiskCreating => "disk_creating",
            DeployState::AccessGranting => "access_granting",
            DeployState::Transferring => "transferring",
            DeployState::AccessRevoking => "access_revoking",
            DeployState::SecurityProvisioning => "security_provisioning",
            DeployState::Launching => "launching",
            DeployState::Done => "done",
            DeployState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_STATES.iter().copied().find(|state| state.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Done | DeployState::Failed)
    }
}

const ALL_STATES: [DeployState; 12] = [
    DeployState::Validating,
    DeployState::ResourceGroupCreating,
    DeployState::AddressReserving,
    DeployState::DnsReconciling,
    DeployState::DiskCreating,
    DeployState::AccessGranting,
    DeployState::Transferring,
    DeployState::AccessRevoking,
    DeployState::SecurityProvisioning,
    DeployState::Launching,
    DeployState::Done,
    DeployState::Failed,
];

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry into a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: DeployState,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn now(state: DeployState) -> Self {
        Self {
            state,
            at: Utc::now(),
        }
    }
}
