//! Seam to the build-graph engine.
//!
//! The engine owns module definitions, builds them, and hands back their
//! outputs. This crate only talks to it through two traits:
//!
//! - [`DepsContext`] - where the resolver registers dependency edges
//! - [`ModuleGraph`] - where built outputs are looked up per edge
//!
//! [`EdgeRecorder`] is the in-process [`DepsContext`]; [`registry::ModuleRegistry`]
//! is a [`ModuleGraph`] over a TOML description of already-built modules,
//! which is what the CLI and the tests use.

pub mod registry;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::arch::{Arch, Os};
use crate::bundle::DependencyCategory;
use crate::error::Result;

/// Mutator names of the variation axes a dependency can be constrained on.
pub const ARCH_MUTATOR: &str = "arch";
pub const IMAGE_MUTATOR: &str = "image";
pub const LINK_MUTATOR: &str = "link";

/// `image` variation of modules installed in the core system image.
pub const CORE_IMAGE: &str = "core";

/// `link` variation of shared native libraries.
pub const SHARED_LINK: &str = "shared";

/// One `(mutator, variation)` constraint of a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variation {
    pub mutator: String,
    pub variation: String,
}

impl Variation {
    pub fn new(mutator: impl Into<String>, variation: impl Into<String>) -> Self {
        Self {
            mutator: mutator.into(),
            variation: variation.into(),
        }
    }

    pub fn arch(os: Os, arch: Arch) -> Self {
        Self::new(ARCH_MUTATOR, arch.variation(os))
    }

    pub fn core_image() -> Self {
        Self::new(IMAGE_MUTATOR, CORE_IMAGE)
    }

    pub fn shared_link() -> Self {
        Self::new(LINK_MUTATOR, SHARED_LINK)
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mutator, self.variation)
    }
}

/// Render variations as `arch:android_arm64, image:core`.
pub fn describe_variations(variations: &[Variation]) -> String {
    variations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A dependency registered by the resolver.
///
/// Every edge is a far edge: it may point at a variant whose variations are
/// incomparable with the bundle's own (`common` arch vs `android_arm64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    #[serde(with = "category_serde")]
    pub tag: DependencyCategory,
    pub name: String,
    pub variations: Vec<Variation>,
}

impl DependencyEdge {
    /// The requested `arch` variation, if the edge is arch constrained.
    pub fn arch_variation(&self) -> Option<&str> {
        self.variations
            .iter()
            .find(|v| v.mutator == ARCH_MUTATOR)
            .map(|v| v.variation.as_str())
    }

    #[cfg(test)]
    pub fn requires(&self, mutator: &str, variation: &str) -> bool {
        self.variations
            .iter()
            .any(|v| v.mutator == mutator && v.variation == variation)
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.tag, self.name)?;
        if !self.variations.is_empty() {
            write!(f, " [{}]", describe_variations(&self.variations))?;
        }
        Ok(())
    }
}

mod category_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::bundle::DependencyCategory;

    pub fn serialize<S: Serializer>(tag: &DependencyCategory, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&tag.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DependencyCategory, D::Error> {
        let raw = String::deserialize(d)?;
        DependencyCategory::ALL
            .into_iter()
            .find(|c| c.to_string() == raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown dependency tag '{raw}'")))
    }
}

/// Where dependency edges are registered.
pub trait DepsContext {
    /// OS of the device the bundle targets.
    fn os(&self) -> Os;

    /// Register one edge per name, all sharing `variations` and `tag`.
    fn add_far_variation_dependencies(
        &mut self,
        variations: &[Variation],
        tag: DependencyCategory,
        names: &[String],
    );
}

/// A module after the engine built the variant an edge selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltModule {
    /// Native library or executable.
    Native {
        name: String,
        output: PathBuf,
        arch: Arch,
        kind: NativeKind,
    },
    /// Java library with its outputs in declaration order.
    Java { name: String, outputs: Vec<PathBuf> },
    /// Prebuilt file destined for `etc/<sub_dir>`.
    PrebuiltEtc {
        name: String,
        output: PathBuf,
        sub_dir: String,
    },
}

impl BuiltModule {
    pub fn name(&self) -> &str {
        match self {
            BuiltModule::Native { name, .. }
            | BuiltModule::Java { name, .. }
            | BuiltModule::PrebuiltEtc { name, .. } => name,
        }
    }

    /// Module type name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BuiltModule::Native {
                kind: NativeKind::Library,
                ..
            } => "cc_library",
            BuiltModule::Native {
                kind: NativeKind::Binary,
                ..
            } => "cc_binary",
            BuiltModule::Java { .. } => "java_library",
            BuiltModule::PrebuiltEtc { .. } => "prebuilt_etc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeKind {
    Library,
    Binary,
}

/// Lookup of built outputs for registered edges.
pub trait ModuleGraph {
    /// The module built for `edge`.
    ///
    /// Fails when the module does not exist or no variant satisfies the
    /// edge's variations; the caller propagates that as a resolution error.
    fn built_module(&self, edge: &DependencyEdge) -> Result<BuiltModule>;
}

/// Simple [`DepsContext`] that records edges in registration order.
#[derive(Debug, Clone)]
pub struct EdgeRecorder {
    os: Os,
    edges: Vec<DependencyEdge>,
}

impl EdgeRecorder {
    pub fn new(os: Os) -> Self {
        Self {
            os,
            edges: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn into_edges(self) -> Vec<DependencyEdge> {
        self.edges
    }
}

impl DepsContext for EdgeRecorder {
    fn os(&self) -> Os {
        self.os
    }

    fn add_far_variation_dependencies(
        &mut self,
        variations: &[Variation],
        tag: DependencyCategory,
        names: &[String],
    ) {
        for name in names {
            self.edges.push(DependencyEdge {
                tag,
                name: name.clone(),
                variations: variations.to_vec(),
            });
        }
    }
}
