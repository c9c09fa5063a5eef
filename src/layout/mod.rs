//! Canonical in-image layout.
//!
//! Every resolved artifact gets exactly one destination inside the image:
//!
//! | category | directory | file name |
//! |---|---|---|
//! | shared lib | `lib` / `lib64`, plus `/<arch>` for native-bridge arches | output base name |
//! | executable | `bin` | output base name |
//! | java lib | `javalib` | base name of the first output |
//! | prebuilt | `etc/<sub_dir>` | output base name |
//!
//! The planner records each destination directory (and its ancestors) once,
//! and keeps the copy manifest as an ordered list so that everything derived
//! from it is reproducible.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::arch::Arch;
use crate::bundle::DependencyCategory;
use crate::error::{BundleError, Result};
use crate::graph::{BuiltModule, DependencyEdge, ModuleGraph, NativeKind};

/// In-image directory of executables.
pub const BIN_DIR: &str = "bin";
/// In-image directory of Java libraries.
pub const JAVALIB_DIR: &str = "javalib";
/// In-image root of prebuilt files.
pub const ETC_DIR: &str = "etc";

/// A built dependency, shaped by the category it was declared under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ResolvedArtifact {
    SharedLib {
        name: String,
        output: PathBuf,
        arch: Arch,
    },
    Executable {
        name: String,
        output: PathBuf,
    },
    /// Only the primary (first) output of a Java library is embedded.
    JavaLib {
        name: String,
        primary_output: PathBuf,
    },
    Prebuilt {
        name: String,
        output: PathBuf,
        sub_dir: String,
    },
}

impl ResolvedArtifact {
    /// Shape a built module according to the tag of the edge that selected it.
    pub fn from_built(tag: DependencyCategory, module: BuiltModule) -> Result<Self> {
        let mismatch = |module: &BuiltModule, expected: &str| BundleError::ModuleKindMismatch {
            name: module.name().to_string(),
            expected: expected.to_string(),
            actual: module.kind_name().to_string(),
        };

        match (tag, module) {
            (
                DependencyCategory::SharedLib,
                BuiltModule::Native {
                    name,
                    output,
                    arch,
                    kind: NativeKind::Library,
                },
            ) => Ok(ResolvedArtifact::SharedLib { name, output, arch }),
            (
                DependencyCategory::Executable,
                BuiltModule::Native {
                    name,
                    output,
                    kind: NativeKind::Binary,
                    ..
                },
            ) => Ok(ResolvedArtifact::Executable { name, output }),
            (DependencyCategory::JavaLib, BuiltModule::Java { name, outputs }) => {
                let primary_output = outputs
                    .into_iter()
                    .next()
                    .ok_or_else(|| BundleError::NoOutputs { name: name.clone() })?;
                Ok(ResolvedArtifact::JavaLib {
                    name,
                    primary_output,
                })
            }
            (
                DependencyCategory::Prebuilt,
                BuiltModule::PrebuiltEtc {
                    name,
                    output,
                    sub_dir,
                },
            ) => Ok(ResolvedArtifact::Prebuilt {
                name,
                output,
                sub_dir,
            }),
            (DependencyCategory::SharedLib, module) => Err(mismatch(&module, "cc_library")),
            (DependencyCategory::Executable, module) => Err(mismatch(&module, "cc_binary")),
            (DependencyCategory::JavaLib, module) => Err(mismatch(&module, "java_library")),
            (DependencyCategory::Prebuilt, module) => Err(mismatch(&module, "prebuilt_etc")),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResolvedArtifact::SharedLib { name, .. }
            | ResolvedArtifact::Executable { name, .. }
            | ResolvedArtifact::JavaLib { name, .. }
            | ResolvedArtifact::Prebuilt { name, .. } => name,
        }
    }

    /// Built file that is copied into the image.
    pub fn source(&self) -> &Path {
        match self {
            ResolvedArtifact::SharedLib { output, .. }
            | ResolvedArtifact::Executable { output, .. }
            | ResolvedArtifact::Prebuilt { output, .. } => output,
            ResolvedArtifact::JavaLib { primary_output, .. } => primary_output,
        }
    }

    /// Directory inside the image, relative to the image root.
    pub fn destination_dir(&self) -> Result<PathBuf> {
        match self {
            ResolvedArtifact::SharedLib { arch, .. } => {
                let mut dir = PathBuf::from(arch.arch_type.multilib().lib_dir());
                if let Some(abi) = arch.abi_qualifier() {
                    dir.push(abi);
                }
                Ok(dir)
            }
            ResolvedArtifact::Executable { .. } => Ok(PathBuf::from(BIN_DIR)),
            ResolvedArtifact::JavaLib { .. } => Ok(PathBuf::from(JAVALIB_DIR)),
            ResolvedArtifact::Prebuilt { name, sub_dir, .. } => {
                Ok(Path::new(ETC_DIR).join(relative_sub_dir(name, sub_dir)?))
            }
        }
    }

    /// Full destination path inside the image, relative to the image root.
    pub fn destination(&self) -> Result<PathBuf> {
        let base_name = self
            .source()
            .file_name()
            .ok_or_else(|| BundleError::NoOutputs {
                name: self.name().to_string(),
            })?;
        Ok(self.destination_dir()?.join(base_name))
    }
}

/// Normalise a prebuilt sub-directory; it must stay inside `etc`.
fn relative_sub_dir(name: &str, raw: &str) -> Result<PathBuf> {
    let invalid = |reason: &str| BundleError::InvalidSubDir {
        name: name.to_string(),
        sub_dir: raw.to_string(),
        reason: reason.to_string(),
    };

    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return Err(invalid("must be relative"));
    }
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must not leave the etc directory"));
            }
        }
    }
    Ok(normalized)
}

/// Look up the built module of every edge, in edge order.
///
/// Any edge the graph cannot satisfy aborts the whole resolution.
pub fn resolve_artifacts<G: ModuleGraph + ?Sized>(
    edges: &[DependencyEdge],
    graph: &G,
) -> Result<Vec<ResolvedArtifact>> {
    edges
        .iter()
        .map(|edge| {
            let module = graph.built_module(edge)?;
            ResolvedArtifact::from_built(edge.tag, module)
        })
        .collect()
}

/// One file copied into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyEntry {
    pub source: PathBuf,
    /// Relative to the image root.
    pub destination: PathBuf,
}

/// Ordered copy operations, unique by destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CopyManifest(Vec<CopyEntry>);

impl CopyManifest {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(|entry| entry.source.as_path())
    }

    #[cfg(test)]
    pub fn destinations(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(|entry| entry.destination.as_path())
    }
}

impl<'a> IntoIterator for &'a CopyManifest {
    type Item = &'a CopyEntry;
    type IntoIter = std::slice::Iter<'a, CopyEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A path that will exist inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum LayoutEntry {
    File(PathBuf),
    Dir(PathBuf),
}

impl LayoutEntry {
    pub fn path(&self) -> &Path {
        match self {
            LayoutEntry::File(path) | LayoutEntry::Dir(path) => path,
        }
    }
}

impl fmt::Display for LayoutEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutEntry::File(path) => write!(f, "{}", path.display()),
            LayoutEntry::Dir(path) => write!(f, "{}/", path.display()),
        }
    }
}

/// Result of planning: what to copy, and every path the image will contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutPlan {
    pub copy_manifest: CopyManifest,
    /// Files and directories in first-seen order.
    pub entries: Vec<LayoutEntry>,
}

impl LayoutPlan {
    #[cfg(test)]
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter_map(|entry| match entry {
            LayoutEntry::File(path) => Some(path.as_path()),
            LayoutEntry::Dir(_) => None,
        })
    }

    #[cfg(test)]
    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter_map(|entry| match entry {
            LayoutEntry::Dir(path) => Some(path.as_path()),
            LayoutEntry::File(_) => None,
        })
    }
}

/// Accumulates artifacts into a [`LayoutPlan`].
#[derive(Debug, Default)]
pub struct LayoutPlanner {
    copies: Vec<CopyEntry>,
    entries: Vec<LayoutEntry>,
    // destination -> index into `copies`
    files: BTreeMap<PathBuf, usize>,
    dirs: BTreeSet<PathBuf>,
}

impl LayoutPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place one artifact.
    ///
    /// The same source placed twice at the same destination is recorded once.
    /// A different source at an already used destination is rejected, as is
    /// a path used both as a file and as a directory.
    pub fn add(&mut self, artifact: &ResolvedArtifact) -> Result<()> {
        let destination = artifact.destination()?;
        let source = artifact.source();

        if let Some(&index) = self.files.get(&destination) {
            let existing = &self.copies[index].source;
            if existing == source {
                debug!(
                    destination = %destination.display(),
                    "same artifact placed twice, keeping one copy"
                );
                return Ok(());
            }
            return Err(BundleError::LayoutConflict {
                destination,
                existing: existing.clone(),
                incoming: source.to_path_buf(),
            });
        }
        if self.dirs.contains(&destination) {
            return Err(BundleError::PathKindCollision { path: destination });
        }

        let new_dirs = self.missing_ancestors(&destination)?;

        self.files.insert(destination.clone(), self.copies.len());
        self.copies.push(CopyEntry {
            source: source.to_path_buf(),
            destination: destination.clone(),
        });
        self.entries.push(LayoutEntry::File(destination));
        for dir in new_dirs {
            self.dirs.insert(dir.clone());
            self.entries.push(LayoutEntry::Dir(dir));
        }
        Ok(())
    }

    /// Ancestor directories of `destination` not recorded yet, outermost first.
    fn missing_ancestors(&self, destination: &Path) -> Result<Vec<PathBuf>> {
        let mut ancestors: Vec<PathBuf> = destination
            .ancestors()
            .skip(1)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .collect();
        ancestors.reverse();

        let mut missing = Vec::new();
        for dir in ancestors {
            if self.files.contains_key(&dir) {
                return Err(BundleError::PathKindCollision { path: dir });
            }
            if !self.dirs.contains(&dir) {
                missing.push(dir);
            }
        }
        Ok(missing)
    }

    pub fn finish(self) -> LayoutPlan {
        LayoutPlan {
            copy_manifest: CopyManifest(self.copies),
            entries: self.entries,
        }
    }
}

/// Plan the layout of `artifacts`, in order.
pub fn plan_layout(artifacts: &[ResolvedArtifact]) -> Result<LayoutPlan> {
    let mut planner = LayoutPlanner::new();
    for artifact in artifacts {
        planner.add(artifact)?;
    }
    Ok(planner.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchType;

    fn shared_lib(name: &str, output: &str, arch: Arch) -> ResolvedArtifact {
        ResolvedArtifact::SharedLib {
            name: name.into(),
            output: PathBuf::from(output),
            arch,
        }
    }

    fn paths(plan: &LayoutPlan) -> Vec<String> {
        plan.copy_manifest
            .destinations()
            .map(|p| p.display().to_string())
            .collect()
    }

    #[test]
    fn test_shared_lib_placement_by_multilib() {
        let artifacts = vec![
            shared_lib("libc", "out/arm64/libc.so", Arch::native(ArchType::Arm64)),
            shared_lib("libc", "out/arm/libc.so", Arch::native(ArchType::Arm)),
            shared_lib("libc", "out/nb/libc.so", Arch::native_bridge(ArchType::Arm64)),
        ];
        let plan = plan_layout(&artifacts).unwrap();

        assert_eq!(
            paths(&plan),
            vec!["lib64/libc.so", "lib/libc.so", "lib64/arm64/libc.so"]
        );
        let dirs: Vec<&Path> = plan.directories().collect();
        assert_eq!(
            dirs,
            vec![Path::new("lib64"), Path::new("lib"), Path::new("lib64/arm64")]
        );
    }

    #[test]
    fn test_executable_goes_to_bin() {
        let artifacts = vec![ResolvedArtifact::Executable {
            name: "toybox".into(),
            output: PathBuf::from("out/toybox/toybox"),
        }];
        let plan = plan_layout(&artifacts).unwrap();

        assert_eq!(paths(&plan), vec!["bin/toybox"]);
        assert!(plan.directories().any(|d| d == Path::new("bin")));
    }

    #[test]
    fn test_java_lib_uses_primary_output_only() {
        let module = BuiltModule::Java {
            name: "core-oj".into(),
            outputs: vec![
                PathBuf::from("out/core-oj.jar"),
                PathBuf::from("out/core-oj-hostdex.jar"),
            ],
        };
        let artifact = ResolvedArtifact::from_built(DependencyCategory::JavaLib, module).unwrap();
        let plan = plan_layout(&[artifact]).unwrap();

        assert_eq!(plan.copy_manifest.len(), 1);
        assert_eq!(paths(&plan), vec!["javalib/core-oj.jar"]);
    }

    #[test]
    fn test_java_lib_without_outputs_fails() {
        let module = BuiltModule::Java {
            name: "empty".into(),
            outputs: vec![],
        };
        let err = ResolvedArtifact::from_built(DependencyCategory::JavaLib, module).unwrap_err();
        assert!(matches!(err, BundleError::NoOutputs { .. }));
    }

    #[test]
    fn test_prebuilt_sub_dir_and_ancestors() {
        let artifacts = vec![
            ResolvedArtifact::Prebuilt {
                name: "ld.config.txt".into(),
                output: PathBuf::from("out/ld.config.txt"),
                sub_dir: "linker/./conf".into(),
            },
            ResolvedArtifact::Prebuilt {
                name: "hosts".into(),
                output: PathBuf::from("out/hosts"),
                sub_dir: String::new(),
            },
        ];
        let plan = plan_layout(&artifacts).unwrap();

        assert_eq!(paths(&plan), vec!["etc/linker/conf/ld.config.txt", "etc/hosts"]);
        let dirs: Vec<&Path> = plan.directories().collect();
        assert_eq!(
            dirs,
            vec![Path::new("etc"), Path::new("etc/linker"), Path::new("etc/linker/conf")]
        );
    }

    #[test]
    fn test_prebuilt_sub_dir_cannot_escape() {
        for sub_dir in ["../bin", "/etc", "a/../../b"] {
            let artifact = ResolvedArtifact::Prebuilt {
                name: "evil".into(),
                output: PathBuf::from("out/evil"),
                sub_dir: sub_dir.into(),
            };
            let err = plan_layout(&[artifact]).unwrap_err();
            assert!(matches!(err, BundleError::InvalidSubDir { .. }), "{sub_dir}");
        }
    }

    #[test]
    fn test_directories_recorded_once() {
        let artifacts = vec![
            shared_lib("libc", "out/libc.so", Arch::native(ArchType::Arm64)),
            shared_lib("libm", "out/libm.so", Arch::native(ArchType::Arm64)),
            shared_lib("libdl", "out/libdl.so", Arch::native(ArchType::Arm64)),
        ];
        let plan = plan_layout(&artifacts).unwrap();

        assert_eq!(plan.directories().count(), 1);
        assert_eq!(plan.files().count(), 3);
        assert_eq!(plan.entries.len(), 4);
    }

    #[test]
    fn test_identical_placement_is_merged() {
        let lib = shared_lib("libc", "out/libc.so", Arch::native(ArchType::Arm64));
        let plan = plan_layout(&[lib.clone(), lib]).unwrap();

        assert_eq!(plan.copy_manifest.len(), 1);
        assert_eq!(plan.files().count(), 1);
    }

    #[test]
    fn test_conflicting_sources_rejected() {
        let artifacts = vec![
            shared_lib("libfoo", "out/a/libfoo.so", Arch::native(ArchType::Arm64)),
            shared_lib("libfoo_v2", "out/b/libfoo.so", Arch::native(ArchType::Arm64)),
        ];
        let err = plan_layout(&artifacts).unwrap_err();

        match err {
            BundleError::LayoutConflict {
                destination,
                existing,
                incoming,
            } => {
                assert_eq!(destination, PathBuf::from("lib64/libfoo.so"));
                assert_eq!(existing, PathBuf::from("out/a/libfoo.so"));
                assert_eq!(incoming, PathBuf::from("out/b/libfoo.so"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_file_and_directory_collision_rejected() {
        let artifacts = vec![
            ResolvedArtifact::Prebuilt {
                name: "linker".into(),
                output: PathBuf::from("out/linker"),
                sub_dir: String::new(),
            },
            ResolvedArtifact::Prebuilt {
                name: "ld.config.txt".into(),
                output: PathBuf::from("out/ld.config.txt"),
                sub_dir: "linker".into(),
            },
        ];
        let err = plan_layout(&artifacts).unwrap_err();
        assert!(matches!(err, BundleError::PathKindCollision { .. }));
    }

    #[test]
    fn test_kind_mismatch_from_built() {
        let module = BuiltModule::PrebuiltEtc {
            name: "hosts".into(),
            output: PathBuf::from("hosts"),
            sub_dir: String::new(),
        };
        let err = ResolvedArtifact::from_built(DependencyCategory::Executable, module).unwrap_err();
        assert_eq!(
            err.to_string(),
            "module 'hosts' is a prebuilt_etc, but was declared as a cc_binary dependency"
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let artifacts = vec![
            shared_lib("libc", "out/arm/libc.so", Arch::native(ArchType::Arm)),
            shared_lib("libc", "out/arm64/libc.so", Arch::native(ArchType::Arm64)),
            ResolvedArtifact::Executable {
                name: "toybox".into(),
                output: PathBuf::from("out/toybox"),
            },
        ];
        assert_eq!(plan_layout(&artifacts).unwrap(), plan_layout(&artifacts).unwrap());
    }
}
