//! Filesystem metadata for the image.
//!
//! The image builder needs a canned permission table covering every path in
//! the image. All entries get the same owner and mode; the image root and the
//! manifest are always present.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::layout::LayoutPlan;

/// Owner uid/gid of every path in the image (`system`).
pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;
pub const DEFAULT_MODE: u32 = 0o644;

/// In-image path of the manifest, written by the image builder itself.
pub const MANIFEST_IMAGE_PATH: &str = "/manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionRecord {
    /// Absolute in-image path.
    pub path: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl PermissionRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
            mode: DEFAULT_MODE,
        }
    }
}

impl fmt::Display for PermissionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {:04o}", self.path, self.uid, self.gid, self.mode)
    }
}

/// Canned permission table, one record per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CannedFsConfig {
    records: Vec<PermissionRecord>,
}

impl CannedFsConfig {
    /// Table for `plan`: `/`, `/manifest.json`, then every layout entry in plan order.
    pub fn for_layout(plan: &LayoutPlan) -> Self {
        let mut records = Vec::with_capacity(plan.entries.len() + 2);
        records.push(PermissionRecord::new("/"));
        records.push(PermissionRecord::new(MANIFEST_IMAGE_PATH));
        for entry in &plan.entries {
            records.push(PermissionRecord::new(image_path(entry.path())));
        }
        Self { records }
    }

    pub fn records(&self) -> &[PermissionRecord] {
        &self.records
    }

    #[cfg(test)]
    pub fn contains(&self, path: &str) -> bool {
        self.records.iter().any(|r| r.path == path)
    }

    /// Text form consumed by the image builder.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&record.to_string());
            out.push('\n');
        }
        out
    }
}

/// Absolute in-image form of a path relative to the image root.
pub fn image_path(relative: &Path) -> String {
    format!("/{}", relative.to_string_lossy().trim_start_matches('/'))
}

/// Everything the image builder needs besides the staged tree.
///
/// The security-context file and the manifest are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub fs_config: CannedFsConfig,
    pub file_contexts: PathBuf,
    pub manifest: PathBuf,
}

impl ImageMetadata {
    pub fn new(plan: &LayoutPlan, file_contexts: PathBuf, manifest: PathBuf) -> Self {
        Self {
            fs_config: CannedFsConfig::for_layout(plan),
            file_contexts,
            manifest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Arch, ArchType};
    use crate::layout::{plan_layout, ResolvedArtifact};

    fn artifacts() -> Vec<ResolvedArtifact> {
        vec![
            ResolvedArtifact::SharedLib {
                name: "libc".into(),
                output: PathBuf::from("out/arm64/libc.so"),
                arch: Arch::native(ArchType::Arm64),
            },
            ResolvedArtifact::SharedLib {
                name: "libc".into(),
                output: PathBuf::from("out/arm/libc.so"),
                arch: Arch::native(ArchType::Arm),
            },
            ResolvedArtifact::Executable {
                name: "toybox".into(),
                output: PathBuf::from("out/toybox"),
            },
        ]
    }

    #[test]
    fn test_render_format() {
        let plan = plan_layout(&artifacts()[2..]).unwrap();
        let table = CannedFsConfig::for_layout(&plan);

        assert_eq!(
            table.render(),
            "/ 1000 1000 0644\n\
             /manifest.json 1000 1000 0644\n\
             /bin/toybox 1000 1000 0644\n\
             /bin 1000 1000 0644\n"
        );
    }

    #[test]
    fn test_every_layout_entry_listed_once() {
        let plan = plan_layout(&artifacts()).unwrap();
        let table = CannedFsConfig::for_layout(&plan);

        assert_eq!(table.records().len(), plan.entries.len() + 2);
        for entry in &plan.entries {
            let path = image_path(entry.path());
            let hits = table.records().iter().filter(|r| r.path == path).count();
            assert_eq!(hits, 1, "{path}");
        }
        assert!(table.contains("/lib64/libc.so"));
        assert!(table.contains("/lib"));
    }

    #[test]
    fn test_empty_layout_keeps_root_and_manifest() {
        let table = CannedFsConfig::for_layout(&LayoutPlan::default());
        assert_eq!(
            table.render(),
            "/ 1000 1000 0644\n/manifest.json 1000 1000 0644\n"
        );
    }

    #[test]
    fn test_removing_artifact_only_removes_records() {
        let full = CannedFsConfig::for_layout(&plan_layout(&artifacts()).unwrap());
        let mut fewer = artifacts();
        fewer.remove(1);
        let reduced = CannedFsConfig::for_layout(&plan_layout(&fewer).unwrap());

        for record in reduced.records() {
            assert!(full.contains(&record.path), "{} appeared", record.path);
        }
        assert!(!reduced.contains("/lib/libc.so"));
        assert!(!reduced.contains("/lib"));
    }

    #[test]
    fn test_metadata_passes_paths_through() {
        let plan = plan_layout(&artifacts()).unwrap();
        let metadata = ImageMetadata::new(
            &plan,
            PathBuf::from("art/file_contexts"),
            PathBuf::from("art/manifest.json"),
        );
        assert_eq!(metadata.file_contexts, PathBuf::from("art/file_contexts"));
        assert_eq!(metadata.manifest, PathBuf::from("art/manifest.json"));
        assert_eq!(metadata.fs_config, CannedFsConfig::for_layout(&plan));
    }
}
