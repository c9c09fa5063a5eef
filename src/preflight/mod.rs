//! Preflight checks for image builds.
//!
//! The image build step runs `apexer` from the host bin directory and
//! declares its helper tools there too; `$PATH` is never consulted. Checking
//! exactly those paths up front turns a failure deep inside image creation
//! into one clear list of what is missing.
//!
//! # Example
//!
//! ```rust,ignore
//! use apex_bundler::config::BuildConfig;
//! use apex_bundler::preflight::check_host_tools;
//!
//! let config = BuildConfig::load("bundler.toml".as_ref())?;
//! check_host_tools(&config)?;
//! ```

use std::path::PathBuf;

use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{BundleError, Result};
use crate::invoke::COMMAND_DEPS;
use crate::process::which_in;

/// Locate `tool` where the image build step runs it from.
///
/// Returns the same path [`BuildConfig::host_tool`] gives, and only if an
/// executable is actually there.
pub fn find_tool(config: &BuildConfig, tool: &str) -> Option<PathBuf> {
    which_in(tool, config.host_bin_dir().as_os_str())
}

/// Check that specific tools are available in the host bin directory.
///
/// # Returns
///
/// * `Ok(paths)` with the resolved location of each tool, in order
/// * `Err(ToolNotFound)` listing every missing tool
pub fn check_required_tools(config: &BuildConfig, tools: &[&str]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::with_capacity(tools.len());
    let mut missing = Vec::new();

    for tool in tools {
        match find_tool(config, tool) {
            Some(path) => {
                debug!(tool, path = %path.display(), "found host tool");
                found.push(path);
            }
            None => missing.push(tool.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(BundleError::ToolNotFound {
            tools: missing,
            dir: config.host_bin_dir(),
        });
    }
    Ok(found)
}

/// Check every tool the image builder depends on.
pub fn check_host_tools(config: &BuildConfig) -> Result<Vec<PathBuf>> {
    check_required_tools(config, &COMMAND_DEPS)
}
