//! Scoped write access to a managed disk.
//!
//! An [`AccessGrant`] holds the SAS URI returned by `grant-access`. It must be
//! consumed with [`AccessGrant::revoke`]. If it is dropped while still armed
//! (early return, cancellation, panic) a best-effort revoke is spawned on the
//! current tokio runtime; [`drain_pending_revocations`] waits for those.

use super::DiskHandle;
use crate::control::ControlPlane;
use cvmdeploy_shared::errors::DeployResult;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

static PENDING_REVOCATIONS: Mutex<Vec<JoinHandle<()>>> = parking_lot::const_mutex(Vec::new());

pub struct AccessGrant {
    disk: DiskHandle,
    sas_uri: String,
    control: Arc<dyn ControlPlane>,
    armed: bool,
}

impl AccessGrant {
    pub(crate) fn new(disk: DiskHandle, sas_uri: String, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            disk,
            sas_uri,
            control,
            armed: true,
        }
    }

    pub fn disk(&self) -> &DiskHandle {
        &self.disk
    }

    /// The signed write URI. Never log this.
    pub fn sas_uri(&self) -> &str {
        &self.sas_uri
    }

    /// Revoke the grant. Issues exactly one revoke call once it resolves.
    ///
    /// Stays armed until the call returns, so a cancelled revoke falls back
    /// to the background revoke in `Drop`.
    pub async fn revoke(mut self) -> DeployResult<()> {
        tracing::info!(disk = %self.disk.name, "Revoking disk write access");
        let result = self.control.revoke_disk_access(&self.disk).await;
        self.armed = false;
        result
    }
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGrant")
            .field("disk", &self.disk.name)
            .field("sas_uri", &"<redacted>")
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for AccessGrant {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        tracing::warn!(
            disk = %self.disk.name,
            "Disk write grant dropped without revoke, revoking in background"
        );
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                disk = %self.disk.name,
                "No async runtime available; disk write access was not revoked"
            );
            return;
        };

        let control = Arc::clone(&self.control);
        let disk = self.disk.clone();
        let task = handle.spawn(async move {
            if let Err(e) = control.revoke_disk_access(&disk).await {
                tracing::error!(disk = %disk.name, error = %e, "Background revoke failed");
            }
        });
        PENDING_REVOCATIONS.lock().push(task);
    }
}

/// Wait for revokes scheduled by dropped grants.
pub async fn drain_pending_revocations() {
    let pending: Vec<_> = std::mem::take(&mut *PENDING_REVOCATIONS.lock());
    for task in pending {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background revoke task did not complete");
        }
    }
}
