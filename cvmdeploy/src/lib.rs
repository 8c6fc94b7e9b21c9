//! cvmdeploy: deploy a devnet node image as an Azure confidential VM.
//!
//! A deployment reserves a static address, points a DNS record at it,
//! uploads the image as a confidential OS disk, opens the node's service
//! ports and launches the VM with a boot configuration document.

pub mod control;
pub mod db;
pub mod deploy;
pub mod descriptor;
pub mod disk;
pub mod dns;
pub mod layout;
pub mod logging;
pub mod network;
pub mod options;
pub mod pipeline;
pub mod preflight;
pub mod teardown;
pub mod vm;

pub use control::{AzureCli, ControlPlane, ProcessRunner};
pub use db::{Database, DeploymentRecord, DeploymentStatus, DeploymentStore};
pub use deploy::{DeployRun, DeployState, DeploySummary, DeploymentBuilder};
pub use descriptor::DeploymentDescriptor;
pub use disk::{DiskHandle, DiskUploader};
pub use layout::HomeLayout;
pub use options::DeployOptions;
pub use teardown::{TeardownReport, delete_deployment};

pub use cvmdeploy_shared::errors::{DeployError, DeployResult};
