//! End-to-end bundle assembly.
//!
//! [`plan_bundle`] runs the pure stages in order (resolve, layout, metadata,
//! invoke, install) and returns everything they derived. [`build_bundle`]
//! executes a plan. Each failure is reported with the stage that raised it;
//! nothing derived is cached between runs except the image fingerprint.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::bundle::BundleSpec;
use crate::config::BuildConfig;
use crate::error::{BundleError, PipelineError, Result, Stage};
use crate::fs_config::ImageMetadata;
use crate::graph::{DependencyEdge, ModuleGraph};
use crate::install::InstallDescriptor;
use crate::invoke::run::{self, BuildOutcome};
use crate::invoke::{BuildInvocation, BundlePaths};
use crate::layout::{plan_layout, resolve_artifacts, LayoutPlan, ResolvedArtifact};
use crate::manifest::ApexManifest;
use crate::resolve::dependency_edges;

/// Everything derived for one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundlePlan {
    pub bundle: String,
    pub edges: Vec<DependencyEdge>,
    pub artifacts: Vec<ResolvedArtifact>,
    pub layout: LayoutPlan,
    pub metadata: ImageMetadata,
    pub invocation: BuildInvocation,
    pub install: InstallDescriptor,
}

impl BundlePlan {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| BundleError::Serialize {
            what: "bundle plan",
            source,
        })
    }
}

/// Plan `spec` against `graph` without touching the filesystem.
pub fn plan_bundle<G: ModuleGraph + ?Sized>(
    spec: &BundleSpec,
    graph: &G,
    config: &BuildConfig,
) -> Result<BundlePlan, PipelineError> {
    let fail = |stage: Stage| move |source: BundleError| PipelineError::new(&spec.name, stage, source);

    let arches = config.arches();
    let edges = dependency_edges(spec, config.os, &arches).map_err(fail(Stage::Resolve))?;
    let artifacts = resolve_artifacts(&edges, graph).map_err(fail(Stage::Resolve))?;
    info!(
        bundle = %spec.name,
        edges = edges.len(),
        artifacts = artifacts.len(),
        "resolved dependencies"
    );

    let layout = plan_layout(&artifacts).map_err(fail(Stage::Layout))?;
    info!(
        bundle = %spec.name,
        files = layout.copy_manifest.len(),
        entries = layout.entries.len(),
        "planned image layout"
    );

    let metadata = ImageMetadata::new(&layout, spec.file_contexts_path(), spec.manifest_path());

    let paths = BundlePaths::new(config, &spec.name, &spec.output_file_name());
    let invocation = BuildInvocation::compile(&spec.name, &layout, &metadata, &paths, config);

    let install = InstallDescriptor::new(
        &spec.name,
        &spec.module_dir,
        &invocation.output,
        &config.install_dir,
    );

    Ok(BundlePlan {
        bundle: spec.name.clone(),
        edges,
        artifacts,
        layout,
        metadata,
        invocation,
        install,
    })
}

/// Validate the manifest and execute the plan's image build under an
/// exclusive lock on its output.
pub fn build_bundle(plan: &BundlePlan) -> Result<BuildOutcome, PipelineError> {
    let fail = |stage: Stage| move |source: BundleError| PipelineError::new(&plan.bundle, stage, source);

    let manifest = ApexManifest::load(&plan.metadata.manifest).map_err(fail(Stage::Metadata))?;
    if manifest.name != plan.bundle {
        warn!(
            bundle = %plan.bundle,
            manifest_name = %manifest.name,
            "manifest name differs from bundle name"
        );
    }

    let _lock = OutputLock::acquire(&plan.invocation.output).map_err(fail(Stage::Invoke))?;
    let outcome = run::execute(&plan.invocation, &plan.metadata.fs_config).map_err(|source| {
        let stage = match source {
            BundleError::MissingInput(_)
            | BundleError::StagedTreeMismatch(_)
            | BundleError::Io { .. } => Stage::Staging,
            _ => Stage::Invoke,
        };
        PipelineError::new(&plan.bundle, stage, source)
    })?;

    info!(
        bundle = %plan.bundle,
        output = %plan.invocation.output.display(),
        up_to_date = outcome == BuildOutcome::UpToDate,
        "bundle ready"
    );
    Ok(outcome)
}

/// Exclusive advisory lock on one output file, held until dropped.
#[derive(Debug)]
pub struct OutputLock {
    _file: File,
}

impl OutputLock {
    pub fn acquire(output: &Path) -> Result<Self> {
        let path = lock_path(output);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BundleError::io(format!("creating '{}'", parent.display()), e))?;
        }

        // Never unlink the lock file: a second process could then lock a
        // fresh file at the same path while the first still holds the old one.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| BundleError::io(format!("opening lock file '{}'", path.display()), e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(BundleError::OutputLocked(output.to_path_buf()));
        }
        Ok(Self { _file: file })
    }
}

fn lock_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!(".{name}.lock"))
}
