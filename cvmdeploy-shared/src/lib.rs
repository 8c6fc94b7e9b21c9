//! Types shared between the cvmdeploy library and binary.

pub mod errors;

pub use errors::{DeployError, DeployResult};
