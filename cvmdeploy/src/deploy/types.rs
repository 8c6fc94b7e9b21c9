//! Type definitions for the deployment pipeline.

use super::state::{DeployState, StateTransition};
use crate::control::{ControlPlane, ReservedAddress};
use crate::descriptor::DeploymentDescriptor;
use crate::disk::{AccessGrant, DiskHandle};
use crate::dns::DnsReconcileReport;
use crate::network::NsgRef;
use crate::vm::LaunchedVm;
use std::ffi::OsString;
use std::sync::Arc;

/// Shared state of one deployment run.
///
/// Tasks copy their inputs out under the lock, release it for remote calls,
/// and write their outputs back.
pub struct DeployPipelineContext {
    pub descriptor: DeploymentDescriptor,
    pub control: Arc<dyn ControlPlane>,
    /// Overrides `PATH` for the tool check.
    pub tool_path: Option<OsString>,
    pub state: DeployState,
    pub transitions: Vec<StateTransition>,

    pub image_size: Option<u64>,
    pub address: Option<ReservedAddress>,
    pub dns: Option<DnsReconcileReport>,
    pub disk: Option<DiskHandle>,
    /// Held from `AccessGranting` until `AccessRevoking` takes it.
    pub grant: Option<AccessGrant>,
    pub nsg: Option<NsgRef>,
    pub vm: Option<LaunchedVm>,
}

impl DeployPipelineContext {
    pub fn new(
        descriptor: DeploymentDescriptor,
        control: Arc<dyn ControlPlane>,
        tool_path: Option<OsString>,
    ) -> Self {
        Self {
            descriptor,
            control,
            tool_path,
            state: DeployState::Validating,
            transitions: Vec::new(),
            image_size: None,
            address: None,
            dns: None,
            disk: None,
            grant: None,
            nsg: None,
            vm: None,
        }
    }

    pub fn enter(&mut self, state: DeployState) {
        self.state = state;
        self.transitions.push(StateTransition::now(state));
    }
}
