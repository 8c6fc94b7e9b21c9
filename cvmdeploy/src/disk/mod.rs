//! Disk upload: image measurement, upload-mode disk creation, scoped write
//! grant, page blob transfer and revocation.

mod grant;

pub use grant::{AccessGrant, drain_pending_revocations};

use crate::control::ControlPlane;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Lifetime requested for the write SAS.
pub const GRANT_DURATION: Duration = Duration::from_secs(86_400);

/// A managed disk created in upload mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskHandle {
    pub name: String,
    pub resource_group: String,
    pub region: String,
    /// Exact length of the image this disk was sized for.
    pub upload_size_bytes: u64,
}

/// Exact byte length of a disk image.
///
/// Fails for a missing path, anything that is not a regular file, and an
/// empty file.
pub fn measure_image(path: &Path) -> DeployResult<u64> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        DeployError::Image(format!("cannot read image {}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(DeployError::Image(format!(
            "image {} is not a regular file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(DeployError::Image(format!(
            "image {} is empty",
            path.display()
        )));
    }
    Ok(metadata.len())
}

pub struct DiskUploader {
    control: Arc<dyn ControlPlane>,
}

impl DiskUploader {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    pub async fn create_disk(
        &self,
        name: &str,
        resource_group: &str,
        region: &str,
        size_bytes: u64,
    ) -> DeployResult<DiskHandle> {
        let disk = DiskHandle {
            name: name.to_string(),
            resource_group: resource_group.to_string(),
            region: region.to_string(),
            upload_size_bytes: size_bytes,
        };
        tracing::info!(
            disk = %disk.name,
            size_bytes,
            "Creating upload-mode managed disk"
        );
        self.control.create_upload_disk(&disk).await?;
        Ok(disk)
    }

    pub async fn grant_write(&self, disk: &DiskHandle) -> DeployResult<AccessGrant> {
        tracing::info!(
            disk = %disk.name,
            duration_secs = GRANT_DURATION.as_secs(),
            "Requesting disk write access"
        );
        let sas = self.control.grant_disk_write(disk, GRANT_DURATION).await?;
        Ok(AccessGrant::new(disk.clone(), sas, Arc::clone(&self.control)))
    }

    /// Copy the image into the disk through the grant.
    ///
    /// The image is re-measured first; a length that no longer matches the
    /// disk is a data integrity error.
    pub async fn transfer(&self, image: &Path, grant: &AccessGrant) -> DeployResult<()> {
        check_image_matches(image, grant.disk())?;
        tracing::info!(
            disk = %grant.disk().name,
            image = %image.display(),
            "Transferring image as page blob"
        );
        self.control.copy_to_page_blob(image, grant.sas_uri()).await
    }

    /// Measure, create, grant, transfer and revoke.
    ///
    /// The grant is revoked on every path. A transfer failure takes
    /// precedence over a revoke failure.
    pub async fn upload(
        &self,
        image: &Path,
        disk_name: &str,
        resource_group: &str,
        region: &str,
    ) -> DeployResult<DiskHandle> {
        let size = measure_image(image)?;
        let disk = self
            .create_disk(disk_name, resource_group, region, size)
            .await?;
        let grant = self.grant_write(&disk).await?;

        let transferred = self.transfer(image, &grant).await;
        let revoked = grant.revoke().await;

        match (transferred, revoked) {
            (Err(e), Err(revoke_err)) => {
                tracing::error!(
                    disk = %disk.name,
                    error = %revoke_err,
                    "Revoke after failed transfer also failed"
                );
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(disk),
        }
    }
}

pub(crate) fn check_image_matches(image: &Path, disk: &DiskHandle) -> DeployResult<()> {
    let size = measure_image(image)?;
    if size != disk.upload_size_bytes {
        return Err(DeployError::Image(format!(
            "image {} is {} bytes but disk {} was created for {} bytes",
            image.display(),
            size,
            disk.name,
            disk.upload_size_bytes
        )));
    }
    Ok(())
}
