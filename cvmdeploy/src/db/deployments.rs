//! Deployment records.

use super::{Database, db_err};
use crate::deploy::{DeployRun, DeployState};
use chrono::{DateTime, SecondsFormat, Utc};
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub name: String,
    pub resource_group: String,
    pub region: String,
    pub size: String,
    pub nsg: String,
}

/// What a deployment run left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub status: DeploymentStatus,
    /// Image file the disk was uploaded from.
    pub artifact: PathBuf,
    pub public_ip: Option<Ipv4Addr>,
    pub url: String,
    pub vm: VmRecord,
    pub disk_name: String,
    pub last_state: Option<DeployState>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Latest failed rerun of a deployment that had already succeeded.
    #[serde(default)]
    pub last_attempt: Option<FailedAttempt>,
}

/// A failed run kept alongside the successful record it did not replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub artifact: PathBuf,
    pub last_state: Option<DeployState>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn from_run(run: &DeployRun) -> Self {
        let descriptor = &run.descriptor;
        Self {
            name: descriptor.name.clone(),
            status: if run.is_success() {
                DeploymentStatus::Succeeded
            } else {
                DeploymentStatus::Failed
            },
            artifact: descriptor.image_path.clone(),
            public_ip: run.address.as_ref().map(|a| a.address),
            url: descriptor.url(),
            vm: VmRecord {
                name: descriptor.vm_name().to_string(),
                resource_group: descriptor.resource_group().to_string(),
                region: descriptor.region.clone(),
                size: descriptor.vm_size.clone(),
                nsg: descriptor.nsg_name().to_string(),
            },
            disk_name: descriptor.disk_name(),
            last_state: run.last_step(),
            error: run.error.as_ref().map(ToString::to_string),
            created_at: Utc::now(),
            last_attempt: None,
        }
    }
}

/// Deployment records keyed by deployment name.
#[derive(Clone)]
pub struct DeploymentStore {
    db: Database,
}

impl DeploymentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the record for `record.name`.
    pub fn save(&self, record: &DeploymentRecord) -> DeployResult<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT OR REPLACE INTO deployments (name, status, created_at, record) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.name,
                record.status.as_str(),
                record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                json
            ],
        ))?;
        tracing::debug!(deployment = %record.name, status = %record.status, "Saved deployment record");
        Ok(())
    }

    /// Store the outcome of a run.
    ///
    /// A failed run never replaces a succeeded record: it is kept as that
    /// record's `last_attempt` instead. Returns what was stored.
    pub fn record_run(&self, record: DeploymentRecord) -> DeployResult<DeploymentRecord> {
        let stored = match self.get(&record.name)? {
            Some(mut existing)
                if existing.status == DeploymentStatus::Succeeded
                    && record.status == DeploymentStatus::Failed =>
            {
                tracing::warn!(
                    deployment = %record.name,
                    "Failed rerun kept as last attempt of the succeeded deployment"
                );
                existing.last_attempt = Some(FailedAttempt {
                    artifact: record.artifact,
                    last_state: record.last_state,
                    error: record.error,
                    at: record.created_at,
                });
                existing
            }
            _ => record,
        };
        self.save(&stored)?;
        Ok(stored)
    }

    pub fn get(&self, name: &str) -> DeployResult<Option<DeploymentRecord>> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT record FROM deployments WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()
        )?;
        let record = json
            .map(|j| serde_json::from_str::<DeploymentRecord>(&j))
            .transpose()?;
        Ok(record)
    }

    /// All records, newest first.
    pub fn list(&self) -> DeployResult<Vec<DeploymentRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(
            conn.prepare("SELECT record FROM deployments ORDER BY created_at DESC, name ASC")
        )?;
        let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;

        let mut records = Vec::new();
        for row in rows {
            let json = db_err!(row)?;
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    /// Returns whether a record was removed.
    pub fn remove(&self, name: &str) -> DeployResult<bool> {
        let conn = self.db.conn();
        let removed = db_err!(conn.execute("DELETE FROM deployments WHERE name = ?1", [name]))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
pub(crate) fn test_record(name: &str, created_at: DateTime<Utc>) -> DeploymentRecord {
    DeploymentRecord {
        name: name.to_string(),
        status: DeploymentStatus::Succeeded,
        artifact: PathBuf::from("/images/seismic-devnet.vhd"),
        public_ip: Some(Ipv4Addr::new(20, 0, 0, 10)),
        url: format!("https://{name}.seismicdev.net"),
        vm: VmRecord {
            name: name.to_string(),
            resource_group: name.to_string(),
            region: "eastus2".into(),
            size: "Standard_EC4es_v5".into(),
            nsg: name.to_string(),
        },
        disk_name: format!("{name}_seismic-devnet.vhd"),
        last_state: Some(DeployState::Launching),
        error: None,
        created_at,
        last_attempt: None,
    }
}
