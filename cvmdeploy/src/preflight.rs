//! Required external tool checks.

use cvmdeploy_shared::errors::{DeployError, DeployResult};
use std::ffi::OsStr;
use std::path::PathBuf;

/// Tools a deployment invokes.
pub const DEPLOY_TOOLS: &[&str] = &["az", "azcopy"];

/// Tools teardown invokes.
pub const TEARDOWN_TOOLS: &[&str] = &["az"];

/// Fail with every tool in `tools` that is not on `PATH`.
pub fn check_tools(tools: &[&str]) -> DeployResult<()> {
    check_tools_in(tools, None)
}

/// Like [`check_tools`], searching `search_path` instead of `PATH` when set.
pub fn check_tools_in(tools: &[&str], search_path: Option<&OsStr>) -> DeployResult<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|tool| resolve(tool, search_path).is_none())
        .map(|tool| tool.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    tracing::error!(missing = ?missing, "Required tools not found");
    Err(DeployError::MissingTools(missing))
}

fn resolve(tool: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let found = match search_path {
        Some(paths) => {
            let cwd = std::env::current_dir().unwrap_or_default();
            which::which_in(tool, Some(paths), cwd)
        }
        None => which::which(tool),
    };
    match found {
        Ok(path) => {
            tracing::debug!(tool, path = %path.display(), "Found tool");
            Some(path)
        }
        Err(_) => None,
    }
}

#[cfg(test)]
pub(crate) fn fake_tool_dir(tools: &[&str]) -> tempfile::TempDir {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    for tool in tools {
        let path = dir.path().join(tool);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    dir
}
