//! In-memory control plane for tests.
//!
//! Models just enough of the remote side to check the deployment's
//! invariants: record sets are never deleted, disks only accept writes while
//! a grant is active, rule priorities cannot collide, and a VM can only be
//! created on a fully written disk whose grant has been revoked.

use super::{ControlPlane, ReservedAddress};
use crate::disk::DiskHandle;
use crate::dns::DnsZone;
use crate::network::{NsgRef, SecurityRule};
use crate::vm::VmSpec;
use async_trait::async_trait;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDisk {
    pub resource_group: String,
    pub size: u64,
    pub written: Option<u64>,
    pub grant_active: bool,
}

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub resource_group: String,
    pub size: String,
    pub region: String,
    pub disk: String,
    pub nsg: String,
    pub public_ip: String,
    pub security_type: String,
    pub vtpm: bool,
    pub secure_boot: bool,
    pub encryption: String,
    pub user_data_path: Option<PathBuf>,
    pub user_data: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    /// Every operation issued, in order, including ones that failed.
    pub calls: Vec<&'static str>,
    pub resource_groups: BTreeSet<String>,
    pub public_ips: BTreeMap<String, Ipv4Addr>,
    /// Keyed by (zone, record name).
    pub record_sets: BTreeMap<(String, String), Vec<Ipv4Addr>>,
    pub disks: BTreeMap<String, FakeDisk>,
    pub grants_issued: usize,
    pub revocations: usize,
    pub nsgs: BTreeMap<String, BTreeMap<String, SecurityRule>>,
    pub vms: BTreeMap<String, FakeVm>,
    /// User-data path of every VM create call, and whether it existed then.
    pub user_data_seen: Vec<(PathBuf, bool)>,
}

#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
    /// Operation name → number of calls allowed to succeed before failing.
    failures: Mutex<HashMap<&'static str, usize>>,
    /// Operation name → number of upcoming calls that never complete.
    stalls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        self.fail_after(op, 0);
    }

    /// Let `successes` calls to `op` succeed, then fail the rest.
    pub fn fail_after(&self, op: &'static str, successes: usize) {
        self.failures.lock().insert(op, successes);
    }

    /// Make the next call to `op` hang until its future is dropped.
    pub fn stall_next(&self, op: &'static str) {
        *self.stalls.lock().entry(op).or_default() += 1;
    }

    fn take_stall(&self, op: &'static str) -> bool {
        match self.stalls.lock().get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn seed_record_set(&self, zone: &str, record: &str, addresses: &[Ipv4Addr]) {
        self.state
            .lock()
            .record_sets
            .insert((zone.to_string(), record.to_string()), addresses.to_vec());
    }

    pub fn record_set(&self, zone: &str, record: &str) -> Option<Vec<Ipv4Addr>> {
        self.state
            .lock()
            .record_sets
            .get(&(zone.to_string(), record.to_string()))
            .cloned()
    }

    /// Record the call and apply failure injection.
    fn enter(&self, op: &'static str) -> DeployResult<MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock();
        let previous = state.calls.iter().filter(|c| **c == op).count();
        state.calls.push(op);
        if let Some(&allowed) = self.failures.lock().get(op)
            && previous >= allowed
        {
            return Err(remote_error(op, "injected failure"));
        }
        Ok(state)
    }
}

fn remote_error(op: &str, message: &str) -> DeployError {
    DeployError::CommandFailed {
        command: format!("fake {op}"),
        status: Some(1),
        stderr: message.to_string(),
    }
}

fn disk_from_sas(sas_uri: &str) -> Option<&str> {
    sas_uri
        .strip_prefix("https://fake.blob/")
        .and_then(|rest| rest.split('?').next())
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_resource_group(&self, name: &str, _region: &str) -> DeployResult<()> {
        let mut state = self.enter("create_resource_group")?;
        state.resource_groups.insert(name.to_string());
        Ok(())
    }

    async fn create_public_ip(
        &self,
        name: &str,
        resource_group: &str,
        _region: &str,
    ) -> DeployResult<ReservedAddress> {
        let mut state = self.enter("create_public_ip")?;
        if !state.resource_groups.contains(resource_group) {
            return Err(remote_error("create_public_ip", "ResourceGroupNotFound"));
        }
        let next = state.public_ips.len() as u8 + 10;
        let address = *state
            .public_ips
            .entry(name.to_string())
            .or_insert(Ipv4Addr::new(20, 0, 0, next));
        Ok(ReservedAddress {
            name: name.to_string(),
            address,
        })
    }

    async fn list_dns_a_records(
        &self,
        zone: &DnsZone,
        record: &str,
    ) -> DeployResult<Vec<Ipv4Addr>> {
        let state = self.enter("list_dns_a_records")?;
        Ok(state
            .record_sets
            .get(&(zone.name.clone(), record.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_dns_a_record(
        &self,
        zone: &DnsZone,
        record: &str,
        address: Ipv4Addr,
    ) -> DeployResult<()> {
        let mut state = self.enter("remove_dns_a_record")?;
        let set = state
            .record_sets
            .get_mut(&(zone.name.clone(), record.to_string()))
            .ok_or_else(|| remote_error("remove_dns_a_record", "record set not found"))?;
        let before = set.len();
        set.retain(|a| *a != address);
        if set.len() == before {
            return Err(remote_error("remove_dns_a_record", "record not found"));
        }
        Ok(())
    }

    async fn add_dns_a_record(
        &self,
        zone: &DnsZone,
        record: &str,
        address: Ipv4Addr,
        _ttl_secs: u32,
    ) -> DeployResult<()> {
        let mut state = self.enter("add_dns_a_record")?;
        let set = state
            .record_sets
            .entry((zone.name.clone(), record.to_string()))
            .or_default();
        if !set.contains(&address) {
            set.push(address);
        }
        Ok(())
    }

    async fn create_upload_disk(&self, disk: &DiskHandle) -> DeployResult<()> {
        let mut state = self.enter("create_upload_disk")?;
        if state.disks.contains_key(&disk.name) {
            return Err(remote_error(
                "create_upload_disk",
                "(Conflict) disk already exists",
            ));
        }
        state.disks.insert(
            disk.name.clone(),
            FakeDisk {
                resource_group: disk.resource_group.clone(),
                size: disk.upload_size_bytes,
                written: None,
                grant_active: false,
            },
        );
        Ok(())
    }

    async fn grant_disk_write(
        &self,
        disk: &DiskHandle,
        _duration: Duration,
    ) -> DeployResult<String> {
        let mut state = self.enter("grant_disk_write")?;
        state.grants_issued += 1;
        let issued = state.grants_issued;
        let entry = state
            .disks
            .get_mut(&disk.name)
            .ok_or_else(|| remote_error("grant_disk_write", "disk not found"))?;
        entry.grant_active = true;
        Ok(format!("https://fake.blob/{}?sig={}", disk.name, issued))
    }

    async fn copy_to_page_blob(&self, image: &Path, sas_uri: &str) -> DeployResult<()> {
        let mut state = self.enter("copy_to_page_blob")?;
        let name = disk_from_sas(sas_uri)
            .ok_or_else(|| remote_error("copy_to_page_blob", "bad SAS URI"))?;
        let len = std::fs::metadata(image)?.len();
        let entry = state
            .disks
            .get_mut(name)
            .ok_or_else(|| remote_error("copy_to_page_blob", "disk not found"))?;
        if !entry.grant_active {
            return Err(remote_error("copy_to_page_blob", "AuthenticationFailed"));
        }
        if len != entry.size {
            return Err(remote_error("copy_to_page_blob", "size mismatch"));
        }
        entry.written = Some(len);
        Ok(())
    }

    async fn revoke_disk_access(&self, disk: &DiskHandle) -> DeployResult<()> {
        if self.take_stall("revoke_disk_access") {
            std::future::pending::<()>().await;
        }
        let mut state = self.enter("revoke_disk_access")?;
        state.revocations += 1;
        if let Some(entry) = state.disks.get_mut(&disk.name) {
            entry.grant_active = false;
        }
        Ok(())
    }

    async fn create_nsg(&self, group: &NsgRef) -> DeployResult<()> {
        let mut state = self.enter("create_nsg")?;
        state.nsgs.entry(group.name.clone()).or_default();
        Ok(())
    }

    async fn create_nsg_rule(&self, group: &NsgRef, rule: &SecurityRule) -> DeployResult<()> {
        let mut state = self.enter("create_nsg_rule")?;
        let rules = state
            .nsgs
            .get_mut(&group.name)
            .ok_or_else(|| remote_error("create_nsg_rule", "nsg not found"))?;
        if rules
            .values()
            .any(|r| r.priority == rule.priority && r.name != rule.name)
        {
            return Err(remote_error("create_nsg_rule", "SecurityRuleConflict"));
        }
        rules.insert(rule.name.clone(), rule.clone());
        Ok(())
    }

    async fn create_vm(&self, spec: &VmSpec<'_>) -> DeployResult<()> {
        let mut state = self.enter("create_vm")?;
        if let Some(path) = spec.user_data {
            state.user_data_seen.push((path.to_path_buf(), path.exists()));
        }
        if state.vms.contains_key(spec.name) {
            return Err(remote_error("create_vm", "(Conflict) vm already exists"));
        }
        let disk = state
            .disks
            .get(spec.os_disk_name)
            .ok_or_else(|| remote_error("create_vm", "disk not found"))?;
        if disk.grant_active {
            return Err(remote_error("create_vm", "disk has an active SAS"));
        }
        if disk.written != Some(disk.size) {
            return Err(remote_error("create_vm", "disk not fully uploaded"));
        }
        if !state.nsgs.contains_key(spec.nsg_name) {
            return Err(remote_error("create_vm", "nsg not found"));
        }
        if !state.public_ips.contains_key(spec.public_ip_name) {
            return Err(remote_error("create_vm", "public ip not found"));
        }
        let user_data = match spec.user_data {
            Some(path) => Some(std::fs::read_to_string(path)?),
            None => None,
        };
        let profile = spec.profile;
        state.vms.insert(
            spec.name.to_string(),
            FakeVm {
                resource_group: spec.resource_group.to_string(),
                size: spec.size.to_string(),
                region: spec.region.to_string(),
                disk: spec.os_disk_name.to_string(),
                nsg: spec.nsg_name.to_string(),
                public_ip: spec.public_ip_name.to_string(),
                security_type: profile.security_type.to_string(),
                vtpm: profile.enable_vtpm,
                secure_boot: profile.enable_secure_boot,
                encryption: profile.os_disk_encryption.to_string(),
                user_data_path: spec.user_data.map(Path::to_path_buf),
                user_data,
            },
        );
        Ok(())
    }

    async fn delete_vm(&self, name: &str, _resource_group: &str) -> DeployResult<()> {
        let mut state = self.enter("delete_vm")?;
        state
            .vms
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| remote_error("delete_vm", "ResourceNotFound"))
    }

    async fn delete_disk(&self, name: &str, _resource_group: &str) -> DeployResult<()> {
        let mut state = self.enter("delete_disk")?;
        state
            .disks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| remote_error("delete_disk", "ResourceNotFound"))
    }
}
