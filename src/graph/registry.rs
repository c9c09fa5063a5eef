//! TOML-backed module graph.
//!
//! Describes modules the engine has already built:
//!
//! ```toml
//! [[cc_library]]
//! name = "libc"
//! variants = [
//!     { arch = "arm64", output = "out/libc/android_arm64/libc.so" },
//!     { arch = "arm", output = "out/libc/android_arm/libc.so" },
//! ]
//!
//! [[java_library]]
//! name = "core-oj"
//! outputs = ["out/core-oj/core-oj.jar"]
//!
//! [[prebuilt_etc]]
//! name = "ld.config.txt"
//! src = "out/linker/ld.config.txt"
//! sub_dir = "linker"
//! ```
//!
//! Relative paths are resolved against the directory of the TOML file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::{
    describe_variations, BuiltModule, DependencyEdge, ModuleGraph, NativeKind, IMAGE_MUTATOR,
    LINK_MUTATOR, CORE_IMAGE, SHARED_LINK,
};
use crate::arch::{Arch, ArchType, Os};
use crate::bundle::DependencyCategory;
use crate::config::resolve_repo_path;
use crate::error::{BundleError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct NativeVariant {
    arch: Arch,
    output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModuleDef {
    Native {
        kind: NativeKind,
        variants: Vec<NativeVariant>,
    },
    Java {
        outputs: Vec<PathBuf>,
    },
    PrebuiltEtc {
        output: PathBuf,
        sub_dir: String,
    },
}

impl ModuleDef {
    fn kind_name(&self) -> &'static str {
        match self {
            ModuleDef::Native {
                kind: NativeKind::Library,
                ..
            } => "cc_library",
            ModuleDef::Native {
                kind: NativeKind::Binary,
                ..
            } => "cc_binary",
            ModuleDef::Java { .. } => "java_library",
            ModuleDef::PrebuiltEtc { .. } => "prebuilt_etc",
        }
    }
}

/// Built modules of one device configuration.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    os: Os,
    /// Device architectures, primary first. Edges without an `arch`
    /// variation resolve to the first one a module was built for.
    device_arches: Vec<Arch>,
    modules: BTreeMap<String, ModuleDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryToml {
    #[serde(default)]
    cc_library: Vec<NativeToml>,
    #[serde(default)]
    cc_binary: Vec<NativeToml>,
    #[serde(default)]
    java_library: Vec<JavaToml>,
    #[serde(default)]
    prebuilt_etc: Vec<PrebuiltToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NativeToml {
    name: String,
    variants: Vec<VariantToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariantToml {
    arch: String,
    output: String,
    #[serde(default = "default_native")]
    native: bool,
}

fn default_native() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JavaToml {
    name: String,
    outputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrebuiltToml {
    name: String,
    src: String,
    #[serde(default)]
    sub_dir: String,
}

impl ModuleRegistry {
    pub fn new(os: Os, device_arches: Vec<Arch>) -> Self {
        Self {
            os,
            device_arches,
            modules: BTreeMap::new(),
        }
    }

    /// Load a registry from a TOML file.
    pub fn load(path: &Path, os: Os, device_arches: Vec<Arch>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BundleError::io(format!("reading module graph '{}'", path.display()), e)
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, path, base, os, device_arches)
    }

    fn parse(
        text: &str,
        path: &Path,
        base: &Path,
        os: Os,
        device_arches: Vec<Arch>,
    ) -> Result<Self> {
        let invalid = |message: String| BundleError::ModuleGraph {
            path: path.to_path_buf(),
            message,
        };
        let name_of = |raw: &str| {
            let name = raw.trim();
            if name.is_empty() {
                Err(invalid("module name must not be empty".to_string()))
            } else {
                Ok(name.to_string())
            }
        };
        let parsed: RegistryToml = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;
        let mut registry = Self::new(os, device_arches);

        let natives = parsed
            .cc_library
            .into_iter()
            .map(|m| (NativeKind::Library, m))
            .chain(parsed.cc_binary.into_iter().map(|m| (NativeKind::Binary, m)));
        for (kind, module) in natives {
            let mut variants = Vec::with_capacity(module.variants.len());
            for variant in module.variants {
                let arch_type: ArchType = variant.arch.parse()?;
                variants.push(NativeVariant {
                    arch: Arch {
                        arch_type,
                        native: variant.native,
                    },
                    output: resolve_repo_path(base, &variant.output),
                });
            }
            registry
                .insert(&name_of(&module.name)?, ModuleDef::Native { kind, variants })
                .map_err(|e| invalid(e.to_string()))?;
        }

        for module in parsed.java_library {
            let outputs = module
                .outputs
                .iter()
                .map(|output| resolve_repo_path(base, output))
                .collect();
            registry
                .insert(&name_of(&module.name)?, ModuleDef::Java { outputs })
                .map_err(|e| invalid(e.to_string()))?;
        }

        for module in parsed.prebuilt_etc {
            let def = ModuleDef::PrebuiltEtc {
                output: resolve_repo_path(base, &module.src),
                sub_dir: module.sub_dir,
            };
            registry
                .insert(&name_of(&module.name)?, def)
                .map_err(|e| invalid(e.to_string()))?;
        }

        Ok(registry)
    }

    fn insert(&mut self, name: &str, def: ModuleDef) -> Result<()> {
        if self.modules.contains_key(name) {
            return Err(BundleError::DuplicateModule(name.to_string()));
        }
        self.modules.insert(name.to_string(), def);
        Ok(())
    }

    /// Register a native module built for `arches`.
    pub fn add_native(
        &mut self,
        name: &str,
        kind: NativeKind,
        variants: impl IntoIterator<Item = (Arch, PathBuf)>,
    ) -> Result<&mut Self> {
        let variants = variants
            .into_iter()
            .map(|(arch, output)| NativeVariant { arch, output })
            .collect();
        self.insert(name, ModuleDef::Native { kind, variants })?;
        Ok(self)
    }

    pub fn add_java(&mut self, name: &str, outputs: Vec<PathBuf>) -> Result<&mut Self> {
        self.insert(name, ModuleDef::Java { outputs })?;
        Ok(self)
    }

    pub fn add_prebuilt_etc(
        &mut self,
        name: &str,
        output: PathBuf,
        sub_dir: &str,
    ) -> Result<&mut Self> {
        self.insert(
            name,
            ModuleDef::PrebuiltEtc {
                output,
                sub_dir: sub_dir.to_string(),
            },
        )?;
        Ok(self)
    }

    fn select_native(
        &self,
        name: &str,
        variants: &[NativeVariant],
        edge: &DependencyEdge,
    ) -> Result<NativeVariant> {
        let no_match = || BundleError::NoMatchingVariant {
            name: name.to_string(),
            variations: describe_variations(&edge.variations),
        };

        if let Some(requested) = edge.arch_variation() {
            return variants
                .iter()
                .find(|v| v.arch.variation(self.os) == requested)
                .cloned()
                .ok_or_else(no_match);
        }

        // Default arch selection: primary device arch first.
        for arch in &self.device_arches {
            if let Some(variant) = variants.iter().find(|v| v.arch == *arch) {
                return Ok(variant.clone());
            }
        }
        match variants {
            [only] => Ok(only.clone()),
            _ => Err(no_match()),
        }
    }
}

impl ModuleGraph for ModuleRegistry {
    fn built_module(&self, edge: &DependencyEdge) -> Result<BuiltModule> {
        let def = self
            .modules
            .get(&edge.name)
            .ok_or_else(|| BundleError::UnknownModule {
                category: edge.tag.to_string(),
                name: edge.name.clone(),
            })?;

        let mismatch = |expected: &str| BundleError::ModuleKindMismatch {
            name: edge.name.clone(),
            expected: expected.to_string(),
            actual: def.kind_name().to_string(),
        };

        for variation in &edge.variations {
            let supported = match variation.mutator.as_str() {
                IMAGE_MUTATOR => variation.variation == CORE_IMAGE,
                LINK_MUTATOR => variation.variation == SHARED_LINK,
                _ => true,
            };
            if !supported {
                return Err(BundleError::NoMatchingVariant {
                    name: edge.name.clone(),
                    variations: describe_variations(&edge.variations),
                });
            }
        }

        let built = match (edge.tag, def) {
            (DependencyCategory::SharedLib, ModuleDef::Native { kind, variants })
                if *kind == NativeKind::Library =>
            {
                let variant = self.select_native(&edge.name, variants, edge)?;
                BuiltModule::Native {
                    name: edge.name.clone(),
                    output: variant.output,
                    arch: variant.arch,
                    kind: *kind,
                }
            }
            (DependencyCategory::Executable, ModuleDef::Native { kind, variants })
                if *kind == NativeKind::Binary =>
            {
                let variant = self.select_native(&edge.name, variants, edge)?;
                BuiltModule::Native {
                    name: edge.name.clone(),
                    output: variant.output,
                    arch: variant.arch,
                    kind: *kind,
                }
            }
            (DependencyCategory::JavaLib, ModuleDef::Java { outputs }) => BuiltModule::Java {
                name: edge.name.clone(),
                outputs: outputs.clone(),
            },
            (DependencyCategory::Prebuilt, ModuleDef::PrebuiltEtc { output, sub_dir }) => {
                BuiltModule::PrebuiltEtc {
                    name: edge.name.clone(),
                    output: output.clone(),
                    sub_dir: sub_dir.clone(),
                }
            }
            (DependencyCategory::SharedLib, _) => return Err(mismatch("cc_library")),
            (DependencyCategory::Executable, _) => return Err(mismatch("cc_binary")),
            (DependencyCategory::JavaLib, _) => return Err(mismatch("java_library")),
            (DependencyCategory::Prebuilt, _) => return Err(mismatch("prebuilt_etc")),
        };

        debug!(edge = %edge, module = built.kind_name(), "resolved dependency");
        Ok(built)
    }
}
