//! One-shot boot configuration passed to the VM as user data.

use crate::descriptor::DeploymentDescriptor;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Values the guest reads on first boot to request its TLS certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    pub certbot_email: String,
    pub record_name: String,
    pub domain: String,
}

impl BootConfig {
    pub fn new(
        certbot_email: impl Into<String>,
        record_name: impl Into<String>,
        domain: impl Into<String>,
    ) -> DeployResult<Self> {
        let config = Self {
            certbot_email: certbot_email.into(),
            record_name: record_name.into(),
            domain: domain.into(),
        };
        for (key, value) in config.entries() {
            if value.is_empty() || value.contains(['"', '\n', '\r']) {
                return Err(DeployError::Config(format!(
                    "boot config value {key}={value:?} is empty or not quotable"
                )));
            }
        }
        Ok(config)
    }

    pub fn from_descriptor(descriptor: &DeploymentDescriptor) -> DeployResult<Self> {
        Self::new(
            &descriptor.certbot_email,
            &descriptor.domain.record,
            &descriptor.domain.zone.name,
        )
    }

    fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("CERTBOT_EMAIL", &self.certbot_email),
            ("RECORD_NAME", &self.record_name),
            ("DOMAIN", &self.domain),
        ]
    }

    /// `KEY="value"` lines, one per entry.
    pub fn render(&self) -> String {
        self.entries()
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\"\n"))
            .collect()
    }

    /// Write the document to a fresh temporary file.
    ///
    /// The file is removed when the returned value is dropped.
    pub fn materialize(&self) -> DeployResult<BootConfigFile> {
        let mut file = tempfile::Builder::new()
            .prefix("cvmdeploy-user-data-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(self.render().as_bytes())?;
        file.flush()?;
        tracing::debug!(path = %file.path().display(), "Wrote boot config");
        Ok(BootConfigFile { file })
    }
}

/// Boot configuration on disk for the duration of one launch call.
#[derive(Debug)]
pub struct BootConfigFile {
    file: NamedTempFile,
}

impl BootConfigFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for BootConfigFile {
    fn drop(&mut self) {
        tracing::debug!(path = %self.file.path().display(), "Removing boot config");
    }
}
