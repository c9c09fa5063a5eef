//! Assembly of APEX-style package images.
//!
//! A bundle declares native shared libraries, executables, Java libraries and
//! prebuilt files by name. This crate turns that declaration into one sealed
//! package image:
//!
//! - **Dependency resolution** - one edge per dependency, fanned out per device arch
//! - **Layout planning** - canonical, collision-free in-image paths
//! - **Metadata** - canned uid/gid/mode table for every path
//! - **Build invocation** - one input-complete `apexer` step
//! - **Install descriptor** - how the package is installed verbatim
//!
//! # Architecture
//!
//! ```text
//! BundleSpec ──► resolve ──► DependencyEdge* ──► ModuleGraph (engine)
//!                                                     │
//!                                              ResolvedArtifact*
//!                                                     │
//!                 layout ◄────────────────────────────┘
//!                    │
//!                    ├──► fs_config ──► CannedFsConfig
//!                    └──► invoke ─────► BuildInvocation ──► invoke::run ──► <name>.apex
//!                                             │
//!                                          install ──► InstallDescriptor
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use apex_bundler::{bundle, config::BuildConfig, graph::registry::ModuleRegistry, pipeline};
//!
//! let config = BuildConfig::load("bundler.toml".as_ref())?;
//! let graph = ModuleRegistry::load("modules.toml".as_ref(), config.os, config.arches())?;
//! for spec in bundle::load_bundles("apex.toml".as_ref())? {
//!     let plan = pipeline::plan_bundle(&spec, &graph, &config)?;
//!     pipeline::build_bundle(&plan)?;
//! }
//! ```

pub mod arch;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs_config;
pub mod graph;
pub mod install;
pub mod invoke;
pub mod layout;
pub mod manifest;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod resolve;

pub use bundle::{BundleSpec, DependencyCategory};
pub use config::BuildConfig;
pub use error::{BundleError, PipelineError, Stage};
pub use pipeline::{build_bundle, plan_bundle, BundlePlan};
