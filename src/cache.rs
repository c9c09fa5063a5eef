//! Input fingerprints for skipping unchanged image builds.
//!
//! The fingerprint is a SHA256 over the full command line, the contents of
//! every declared input and the contents of every host tool the step runs.
//! Touching a file without changing it does not trigger a rebuild; changing
//! flags, paths, input bytes or a tool binary does.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{BundleError, Result};

/// Fingerprint of `command_line`, the contents of `inputs` and the contents
/// of `tools`, in order.
///
/// Fails if any input cannot be read. A tool that does not exist hashes as
/// absent, so installing it later changes the fingerprint.
pub fn fingerprint(command_line: &str, inputs: &[&Path], tools: &[&Path]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(command_line.as_bytes());
    for path in inputs {
        let content = fs::read(path).map_err(|e| read_error(path, e))?;
        update_prefixed(&mut hasher, &content);
    }
    for tool in tools {
        update_prefixed(&mut hasher, tool.to_string_lossy().as_bytes());
        match fs::read(tool) {
            Ok(content) => {
                hasher.update([1u8]);
                update_prefixed(&mut hasher, &content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => hasher.update([0u8]),
            Err(e) => return Err(read_error(tool, e)),
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// Length-prefix each chunk so boundaries move the hash.
fn update_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn read_error(path: &Path, e: std::io::Error) -> BundleError {
    BundleError::io(format!("reading '{}' for hashing", path.display()), e)
}

/// Read a stored fingerprint. Returns None if it doesn't exist or can't be read.
pub fn read_cached_hash(hash_file: &Path) -> Option<String> {
    if !hash_file.exists() {
        return None;
    }
    match fs::read_to_string(hash_file) {
        Ok(s) => Some(s.trim().to_string()),
        Err(e) => {
            warn!(
                path = %hash_file.display(),
                error = %e,
                "failed to read fingerprint, will rebuild"
            );
            None
        }
    }
}

pub fn write_cached_hash(hash_file: &Path, hash: &str) -> Result<()> {
    if let Some(parent) = hash_file.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BundleError::io(format!("creating '{}'", parent.display()), e))?;
    }
    fs::write(hash_file, hash)
        .map_err(|e| BundleError::io(format!("writing '{}'", hash_file.display()), e))
}

/// True unless `target` exists and its stored fingerprint equals `hash`.
///
/// A missing fingerprint always rebuilds; an output of unknown provenance is
/// never trusted.
pub fn needs_rebuild(hash: &str, hash_file: &Path, target: &Path) -> bool {
    if !target.exists() {
        return true;
    }
    match read_cached_hash(hash_file) {
        Some(cached) => cached != hash,
        None => true,
    }
}

/// Remove a stored fingerprint, ignoring a missing file.
pub fn invalidate(hash_file: &Path) -> Result<()> {
    match fs::remove_file(hash_file) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BundleError::io(
            format!("removing '{}'", hash_file.display()),
            e,
        )),
    }
}
