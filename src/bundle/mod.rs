//! Declarative bundle definitions.
//!
//! A bundle names its manifest, its security-context (`file_contexts`) file
//! and four ordered lists of dependencies, one per [`DependencyCategory`].
//! Definitions live in a TOML file next to the manifest:
//!
//! ```toml
//! [[bundle]]
//! name = "com.android.runtime"
//! native_shared_libs = ["libc", "libm"]
//! executables = ["linker"]
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BundleError, Result};

/// Default manifest file name, relative to the bundle definition directory.
pub const DEFAULT_MANIFEST: &str = "manifest.json";

/// Default security-context file name, relative to the bundle definition directory.
pub const DEFAULT_FILE_CONTEXTS: &str = "file_contexts";

/// Suffix of the produced package file.
pub const APEX_SUFFIX: &str = ".apex";

/// Category of an embedded dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyCategory {
    SharedLib,
    Executable,
    JavaLib,
    Prebuilt,
}

impl DependencyCategory {
    pub const ALL: [DependencyCategory; 4] = [
        DependencyCategory::SharedLib,
        DependencyCategory::Executable,
        DependencyCategory::JavaLib,
        DependencyCategory::Prebuilt,
    ];
}

impl fmt::Display for DependencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyCategory::SharedLib => write!(f, "sharedLib"),
            DependencyCategory::Executable => write!(f, "executable"),
            DependencyCategory::JavaLib => write!(f, "javaLib"),
            DependencyCategory::Prebuilt => write!(f, "prebuilt"),
        }
    }
}

/// A bundle definition, fixed once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    pub name: String,
    /// Directory of the definition file; `manifest` and `file_contexts` are relative to it.
    pub module_dir: PathBuf,
    pub manifest: PathBuf,
    pub file_contexts: PathBuf,
    pub native_shared_libs: Vec<String>,
    pub executables: Vec<String>,
    pub java_libs: Vec<String>,
    pub prebuilts: Vec<String>,
}

impl BundleSpec {
    /// A bundle with default manifest and file contexts and no dependencies.
    pub fn new(name: impl Into<String>, module_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            module_dir: module_dir.into(),
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            file_contexts: PathBuf::from(DEFAULT_FILE_CONTEXTS),
            native_shared_libs: Vec::new(),
            executables: Vec::new(),
            java_libs: Vec::new(),
            prebuilts: Vec::new(),
        }
    }

    /// Manifest path resolved against the definition directory.
    pub fn manifest_path(&self) -> PathBuf {
        self.module_dir.join(&self.manifest)
    }

    /// Security-context file path resolved against the definition directory.
    pub fn file_contexts_path(&self) -> PathBuf {
        self.module_dir.join(&self.file_contexts)
    }

    /// File name of the produced package, `<name>.apex`.
    pub fn output_file_name(&self) -> String {
        format!("{}{}", self.name, APEX_SUFFIX)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BundleFileToml {
    #[serde(default)]
    bundle: Vec<BundleToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BundleToml {
    name: String,
    manifest: Option<String>,
    file_contexts: Option<String>,
    #[serde(default)]
    native_shared_libs: Vec<String>,
    #[serde(default)]
    executables: Vec<String>,
    #[serde(default)]
    java_libs: Vec<String>,
    #[serde(default)]
    prebuilts: Vec<String>,
}

/// Load every `[[bundle]]` defined in `path`.
pub fn load_bundles(path: &Path) -> Result<Vec<BundleSpec>> {
    let text = fs::read_to_string(path)
        .map_err(|e| BundleError::io(format!("reading bundle definition '{}'", path.display()), e))?;
    let module_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    parse_bundles(&text, path, &module_dir)
}

fn parse_bundles(text: &str, path: &Path, module_dir: &Path) -> Result<Vec<BundleSpec>> {
    let invalid = |message: String| BundleError::Definition {
        path: path.to_path_buf(),
        message,
    };

    let parsed: BundleFileToml = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;
    if parsed.bundle.is_empty() {
        return Err(invalid("no [[bundle]] defined".to_string()));
    }

    let mut bundles: Vec<BundleSpec> = Vec::with_capacity(parsed.bundle.len());
    for raw in parsed.bundle {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid("bundle name must not be empty".to_string()));
        }
        if name.contains('/') {
            return Err(invalid(format!("bundle name '{name}' must not contain '/'")));
        }
        if bundles.iter().any(|b| b.name == name) {
            return Err(invalid(format!("bundle '{name}' is defined twice")));
        }

        bundles.push(BundleSpec {
            name,
            module_dir: module_dir.to_path_buf(),
            manifest: PathBuf::from(raw.manifest.as_deref().unwrap_or(DEFAULT_MANIFEST)),
            file_contexts: PathBuf::from(
                raw.file_contexts.as_deref().unwrap_or(DEFAULT_FILE_CONTEXTS),
            ),
            native_shared_libs: clean_names(raw.native_shared_libs),
            executables: clean_names(raw.executables),
            java_libs: clean_names(raw.java_libs),
            prebuilts: clean_names(raw.prebuilts),
        });
    }

    Ok(bundles)
}

// Order is significant; only blanks are dropped.
fn clean_names(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
