//! In-process execution of a [`BuildInvocation`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{BuildInvocation, StagingCommand, APEXER};
use crate::cache;
use crate::error::{BundleError, Result};
use crate::fs_config::{CannedFsConfig, MANIFEST_IMAGE_PATH};
use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    /// Inputs unchanged since the last successful build; the tool was not run.
    UpToDate,
}

/// Execute `invocation`, producing its output package.
///
/// A failing tool leaves no output behind. Nothing is retried.
pub fn execute(invocation: &BuildInvocation, fs_config: &CannedFsConfig) -> Result<BuildOutcome> {
    write_if_changed(&invocation.fs_config, &fs_config.render())?;

    for input in &invocation.implicit_inputs {
        if !input.is_file() {
            return Err(BundleError::MissingInput(input.clone()));
        }
    }

    let inputs: Vec<&Path> = invocation.implicit_inputs.iter().map(PathBuf::as_path).collect();
    let tools: Vec<&Path> = invocation.command_deps.iter().map(PathBuf::as_path).collect();
    let hash = cache::fingerprint(&invocation.command_line(), &inputs, &tools)?;
    if !cache::needs_rebuild(&hash, &invocation.fingerprint, &invocation.output) {
        info!(
            bundle = %invocation.bundle,
            output = %invocation.output.display(),
            "inputs unchanged, skipping image build"
        );
        return Ok(BuildOutcome::UpToDate);
    }

    stage(invocation)?;
    verify_staged_tree(invocation, fs_config)?;

    cache::invalidate(&invocation.fingerprint)?;
    info!("{}", invocation.description);
    let result = Cmd::new(invocation.tool.program.to_string_lossy())
        .args(&invocation.tool.args)
        .envs(&invocation.tool.env)
        .display_name(APEXER)
        .run();

    match result {
        Ok(output) => {
            debug!(stdout = output.stdout_trimmed(), "apexer finished");
        }
        Err(err) => {
            remove_partial_output(&invocation.output);
            return Err(err);
        }
    }

    cache::write_cached_hash(&invocation.fingerprint, &hash)?;
    Ok(BuildOutcome::Built)
}

/// Run the staging commands, leaving the image tree ready for the tool.
pub fn stage(invocation: &BuildInvocation) -> Result<()> {
    for command in &invocation.staging {
        match command {
            StagingCommand::ResetDir { path } => {
                if path.exists() {
                    fs::remove_dir_all(path)
                        .map_err(|e| BundleError::io(format!("removing '{}'", path.display()), e))?;
                }
                fs::create_dir_all(path)
                    .map_err(|e| BundleError::io(format!("creating '{}'", path.display()), e))?;
            }
            StagingCommand::CreateDir { path } => {
                fs::create_dir_all(path)
                    .map_err(|e| BundleError::io(format!("creating '{}'", path.display()), e))?;
            }
            StagingCommand::Copy {
                source,
                destination,
            } => {
                fs::copy(source, destination).map_err(|e| {
                    BundleError::io(
                        format!(
                            "copying '{}' to '{}'",
                            source.display(),
                            destination.display()
                        ),
                        e,
                    )
                })?;
            }
        }
    }
    debug!(
        image_dir = %invocation.image_dir.display(),
        commands = invocation.staging.len(),
        "staged image tree"
    );
    Ok(())
}

/// Check that the staged tree holds exactly the paths of the permission table,
/// with files where files were copied.
pub fn verify_staged_tree(invocation: &BuildInvocation, fs_config: &CannedFsConfig) -> Result<()> {
    let expected: BTreeSet<String> = fs_config
        .records()
        .iter()
        .map(|r| r.path.as_str())
        .filter(|p| *p != "/" && *p != MANIFEST_IMAGE_PATH)
        .map(|p| p.trim_start_matches('/').to_string())
        .collect();
    let expected_files: BTreeSet<String> = invocation
        .staged_files()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    let mut actual = BTreeSet::new();
    let mut actual_files = BTreeSet::new();
    for entry in WalkDir::new(&invocation.image_dir).min_depth(1) {
        let entry = entry.map_err(|e| {
            BundleError::StagedTreeMismatch(format!(
                "walking '{}': {e}",
                invocation.image_dir.display()
            ))
        })?;
        let relative = entry
            .path()
            .strip_prefix(&invocation.image_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        if !entry.file_type().is_dir() {
            actual_files.insert(relative.clone());
        }
        actual.insert(relative);
    }

    let mut problems = Vec::new();
    for missing in expected.difference(&actual) {
        problems.push(format!("missing '{missing}'"));
    }
    for extra in actual.difference(&expected) {
        problems.push(format!("unexpected '{extra}'"));
    }
    for file in expected_files.symmetric_difference(&actual_files) {
        if expected.contains(file) && actual.contains(file) {
            problems.push(format!("'{file}' has the wrong kind"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(BundleError::StagedTreeMismatch(problems.join(", ")))
    }
}

fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BundleError::io(format!("creating '{}'", parent.display()), e))?;
    }
    fs::write(path, content)
        .map_err(|e| BundleError::io(format!("writing '{}'", path.display()), e))
}

fn remove_partial_output(output: &Path) {
    if output.exists() {
        if let Err(e) = fs::remove_file(output) {
            warn!(
                output = %output.display(),
                error = %e,
                "failed to remove partial output"
            );
        }
    }
}
