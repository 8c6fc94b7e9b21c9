//! On-disk layout of the cvmdeploy home directory.
//!
//! ```text
//! ~/.cvmdeploy/
//! ├── db/cvmdeploy.db
//! └── logs/cvmdeploy.log.<date>
//! ```

use cvmdeploy_shared::errors::{DeployError, DeployResult};
use std::path::{Path, PathBuf};

pub const HOME_DIR_NAME: &str = ".cvmdeploy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    home: PathBuf,
}

impl HomeLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `~/.cvmdeploy`.
    pub fn default_home() -> DeployResult<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(HOME_DIR_NAME))
            .ok_or_else(|| {
                DeployError::Config("cannot determine home directory; pass --home".into())
            })
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("cvmdeploy.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Create the directory tree.
    pub fn prepare(&self) -> DeployResult<()> {
        for dir in [self.db_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                DeployError::Storage(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
