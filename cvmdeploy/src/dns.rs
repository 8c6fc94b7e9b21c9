//! DNS A-record reconciliation.
//!
//! Converges a record set to exactly one address by removing every other
//! address and adding the new one if it is missing. The record set itself is
//! never deleted. Remove-then-add is not atomic: resolvers may briefly see no
//! address.

use crate::control::ControlPlane;
use cvmdeploy_shared::errors::DeployResult;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// TTL (seconds) applied to the node's A record.
pub const RECORD_TTL_SECS: u32 = 300;

/// A DNS zone and the resource group that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZone {
    /// Zone name, e.g. `seismicdev.net`.
    pub name: String,
    pub resource_group: String,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsReconcileReport {
    pub removed: Vec<Ipv4Addr>,
    /// `None` when the address was already present.
    pub added: Option<Ipv4Addr>,
    pub ttl: u32,
}

pub struct DnsReconciler<'a> {
    control: &'a dyn ControlPlane,
}

impl<'a> DnsReconciler<'a> {
    pub fn new(control: &'a dyn ControlPlane) -> Self {
        Self { control }
    }

    /// Make `record` in `zone` resolve to `new_ip` only.
    ///
    /// The first failed removal aborts before the add, leaving the set with
    /// whatever addresses were not yet removed.
    pub async fn reconcile(
        &self,
        zone: &DnsZone,
        record: &str,
        new_ip: Ipv4Addr,
    ) -> DeployResult<DnsReconcileReport> {
        let existing = self.control.list_dns_a_records(zone, record).await?;
        tracing::debug!(
            zone = %zone.name,
            record = %record,
            existing = ?existing,
            "Current A records"
        );

        let already_present = existing.contains(&new_ip);
        let mut removed = Vec::with_capacity(existing.len());
        for address in existing.into_iter().filter(|a| *a != new_ip) {
            tracing::info!(record = %record, address = %address, "Removing A record");
            self.control
                .remove_dns_a_record(zone, record, address)
                .await?;
            removed.push(address);
        }

        if already_present {
            tracing::info!(
                record = %record,
                zone = %zone.name,
                address = %new_ip,
                "A record already present"
            );
            return Ok(DnsReconcileReport {
                removed,
                added: None,
                ttl: RECORD_TTL_SECS,
            });
        }

        tracing::info!(
            record = %record,
            zone = %zone.name,
            address = %new_ip,
            ttl = RECORD_TTL_SECS,
            "Adding A record"
        );
        self.control
            .add_dns_a_record(zone, record, new_ip, RECORD_TTL_SECS)
            .await?;

        Ok(DnsReconcileReport {
            removed,
            added: Some(new_ip),
            ttl: RECORD_TTL_SECS,
        })
    }
}
