//! Build configuration.
//!
//! Everything the pipeline needs from the surrounding build lives in one
//! explicit [`BuildConfig`] that is threaded through every stage. It can be
//! loaded from TOML; every field has a default:
//!
//! ```toml
//! source_root = "."
//! out_dir = "out/soong"
//! host_prebuilt_os = "linux-x86"
//! signing_key = "system/apex/apexer/testdata/testkey.pem"
//! device_arches = ["arm64", "arm"]
//! native_bridge_arches = []
//! install_dir = "target/product/generic/system/apex"
//! ```
//!
//! Relative paths are resolved against `source_root`, which itself is
//! resolved against the directory holding the config file.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::arch::{parse_arches, Arch, Os};
use crate::error::{BundleError, Result};

pub const DEFAULT_OUT_DIR: &str = "out/soong";
pub const DEFAULT_HOST_PREBUILT_OS: &str = "linux-x86";
pub const DEFAULT_SIGNING_KEY: &str = "system/apex/apexer/testdata/testkey.pem";
pub const DEFAULT_INSTALL_DIR: &str = "target/product/generic/system/apex";
pub const DEFAULT_DEVICE_ARCHES: [&str; 2] = ["arm64", "arm"];

/// Name of the per-bundle output directory under `out_dir`.
pub const BUNDLES_DIR: &str = "bundles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub source_root: PathBuf,
    pub out_dir: PathBuf,
    pub os: Os,
    pub host_prebuilt_os: String,
    pub signing_key: PathBuf,
    /// Search path handed to the image builder, in lookup order.
    pub tool_path: Vec<PathBuf>,
    /// Device architectures, primary first.
    pub device_arches: Vec<Arch>,
    pub native_bridge_arches: Vec<Arch>,
    /// Install location, relative to the product output root.
    pub install_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildConfigToml {
    source_root: Option<String>,
    out_dir: Option<String>,
    os: Option<Os>,
    host_prebuilt_os: Option<String>,
    signing_key: Option<String>,
    tool_path: Option<Vec<String>>,
    device_arches: Option<Vec<String>>,
    native_bridge_arches: Option<Vec<String>>,
    install_dir: Option<String>,
}

impl BuildConfig {
    /// Default configuration for a source tree rooted at `source_root`.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        let source_root = source_root.into();
        let out_dir = source_root.join(DEFAULT_OUT_DIR);
        let tool_path = default_tool_path(&source_root, &out_dir, DEFAULT_HOST_PREBUILT_OS);
        Self {
            signing_key: source_root.join(DEFAULT_SIGNING_KEY),
            out_dir,
            os: Os::Android,
            host_prebuilt_os: DEFAULT_HOST_PREBUILT_OS.to_string(),
            tool_path,
            device_arches: DEFAULT_DEVICE_ARCHES
                .iter()
                .filter_map(|name| name.parse().ok().map(Arch::native))
                .collect(),
            native_bridge_arches: Vec::new(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            source_root,
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BundleError::io(format!("reading build config '{}'", path.display()), e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, path, base)
    }

    fn parse(text: &str, path: &Path, base: &Path) -> Result<Self> {
        let invalid = |message: String| BundleError::Config {
            path: path.to_path_buf(),
            message,
        };
        let raw: BuildConfigToml = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let source_root = resolve_repo_path(base, raw.source_root.as_deref().unwrap_or("."));
        let out_dir = resolve_repo_path(
            &source_root,
            raw.out_dir.as_deref().unwrap_or(DEFAULT_OUT_DIR),
        );
        let host_prebuilt_os = raw
            .host_prebuilt_os
            .map(|os| os.trim().to_string())
            .unwrap_or_else(|| DEFAULT_HOST_PREBUILT_OS.to_string());
        if host_prebuilt_os.is_empty() || host_prebuilt_os.contains('/') {
            return Err(invalid(format!(
                "host_prebuilt_os '{host_prebuilt_os}' is not a directory name"
            )));
        }

        let tool_path = match raw.tool_path {
            Some(entries) if entries.is_empty() => {
                return Err(invalid("tool_path must not be empty".to_string()));
            }
            Some(entries) => entries
                .iter()
                .map(|entry| resolve_repo_path(&source_root, entry))
                .collect(),
            None => default_tool_path(&source_root, &out_dir, &host_prebuilt_os),
        };

        let device_names = raw
            .device_arches
            .unwrap_or_else(|| DEFAULT_DEVICE_ARCHES.iter().map(|s| s.to_string()).collect());
        let device_arches = parse_arches(&device_names, true).map_err(|e| invalid(e.to_string()))?;
        let native_bridge_arches = parse_arches(&raw.native_bridge_arches.unwrap_or_default(), false)
            .map_err(|e| invalid(e.to_string()))?;

        let install_dir = raw
            .install_dir
            .unwrap_or_else(|| DEFAULT_INSTALL_DIR.to_string());
        let install_dir = parse_relative_path(&install_dir)
            .map_err(|reason| invalid(format!("install_dir {reason}, got '{install_dir}'")))?;

        Ok(Self {
            signing_key: resolve_repo_path(
                &source_root,
                raw.signing_key.as_deref().unwrap_or(DEFAULT_SIGNING_KEY),
            ),
            out_dir,
            os: raw.os.unwrap_or(Os::Android),
            host_prebuilt_os,
            tool_path,
            device_arches,
            native_bridge_arches,
            install_dir,
            source_root,
        })
    }

    /// Every architecture libraries are built for: native ones first, then native-bridge ones.
    pub fn arches(&self) -> Vec<Arch> {
        self.device_arches
            .iter()
            .chain(&self.native_bridge_arches)
            .copied()
            .collect()
    }

    /// Directory holding the host tools the image builder depends on.
    pub fn host_bin_dir(&self) -> PathBuf {
        self.out_dir
            .join("host")
            .join(&self.host_prebuilt_os)
            .join("bin")
    }

    /// Location of one host tool the image build step runs or depends on.
    pub fn host_tool(&self, name: &str) -> PathBuf {
        self.host_bin_dir().join(name)
    }

    /// `tool_path` joined with `:`, as exported to the image builder.
    pub fn tool_path_string(&self) -> String {
        self.tool_path
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Output directory of one bundle.
    pub fn bundle_out_dir(&self, bundle: &str) -> PathBuf {
        self.out_dir.join(BUNDLES_DIR).join(bundle)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

fn default_tool_path(source_root: &Path, out_dir: &Path, host_os: &str) -> Vec<PathBuf> {
    vec![
        out_dir.join("host").join(host_os).join("bin"),
        source_root
            .join("prebuilts")
            .join("sdk")
            .join("tools")
            .join(host_os)
            .join("bin"),
    ]
}

pub(crate) fn resolve_repo_path(repo_root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        let mut resolved = repo_root.to_path_buf();
        for component in candidate.components() {
            if component != Component::CurDir {
                resolved.push(component);
            }
        }
        resolved
    }
}

fn parse_relative_path(raw: &str) -> std::result::Result<PathBuf, &'static str> {
    let candidate = Path::new(raw.trim());
    if candidate.as_os_str().is_empty() {
        return Err("must not be empty");
    }
    if candidate.is_absolute() {
        return Err("must be relative");
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err("must not contain '..'");
    }
    Ok(candidate.to_path_buf())
}
