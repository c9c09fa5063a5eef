//! Image builder invocation.
//!
//! [`BuildInvocation::compile`] turns a layout plan and its metadata into one
//! fully specified build step: how to stage the image tree, how to call
//! `apexer` on it, and every file the step reads. The step is plain data; it
//! can be rendered as a single shell command, exported for an external
//! scheduler (JSON or a ninja `build` edge), or executed in-process by
//! [`run::execute`].
//!
//! ```text
//! rm -rf <image> && mkdir -p <image> && (mkdir -p <image>/lib64 && cp libc.so <image>/lib64/libc.so) &&
//!     APEXER_TOOL_PATH=<host bin>:<sdk tools bin> apexer --verbose --force --manifest ... <image> <out>
//! ```

pub mod run;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::BuildConfig;
use crate::error::{BundleError, Result};
use crate::fs_config::ImageMetadata;
use crate::layout::LayoutPlan;

pub const APEXER: &str = "apexer";

/// Environment variable telling `apexer` where its own helper tools live.
pub const TOOL_PATH_ENV: &str = "APEXER_TOOL_PATH";

/// Host tools the image builder runs, directly or through `apexer`.
pub const COMMAND_DEPS: [&str; 10] = [
    APEXER,
    "avbtool",
    "e2fsdroid",
    "merge_zips",
    "mke2fs",
    "resize2fs",
    "sefcontext_compile",
    "soong_zip",
    "zipalign",
    "aapt2",
];

/// Name of the ninja rule the exported build edges refer to.
pub const NINJA_RULE_NAME: &str = "apex";

/// Rule declaration matching [`BuildInvocation::ninja_build_edge`].
pub const NINJA_RULE: &str = "rule apex\n  command = $command\n  description = $description\n";

/// Where one bundle's intermediate and final files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundlePaths {
    pub out_dir: PathBuf,
    /// Scratch directory the image tree is staged into.
    pub image_dir: PathBuf,
    pub fs_config: PathBuf,
    pub output: PathBuf,
    /// Input fingerprint of the last successful build.
    pub fingerprint: PathBuf,
}

impl BundlePaths {
    pub fn new(config: &BuildConfig, bundle: &str, output_file_name: &str) -> Self {
        let out_dir = config.bundle_out_dir(bundle);
        Self {
            image_dir: out_dir.join("image"),
            fs_config: out_dir.join("canned_fs_config"),
            output: out_dir.join(output_file_name),
            fingerprint: out_dir.join(format!(".{bundle}-inputs.hash")),
            out_dir,
        }
    }
}

/// One step of materialising the image tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StagingCommand {
    /// Remove and recreate the scratch directory.
    ResetDir { path: PathBuf },
    CreateDir { path: PathBuf },
    Copy { source: PathBuf, destination: PathBuf },
}

impl StagingCommand {
    pub fn to_shell(&self) -> String {
        match self {
            StagingCommand::ResetDir { path } => {
                let path = shell_quote(&path.to_string_lossy());
                format!("rm -rf {path} && mkdir -p {path}")
            }
            StagingCommand::CreateDir { path } => {
                format!("mkdir -p {}", shell_quote(&path.to_string_lossy()))
            }
            StagingCommand::Copy {
                source,
                destination,
            } => format!(
                "cp {} {}",
                shell_quote(&source.to_string_lossy()),
                shell_quote(&destination.to_string_lossy())
            ),
        }
    }
}

/// The image builder call itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ToolCommand {
    pub fn to_shell(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.env {
            let _ = write!(out, "{key}={} ", shell_quote(value));
        }
        out.push_str(&shell_quote(&self.program.to_string_lossy()));
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell_quote(arg));
        }
        out
    }
}

/// A compiled, input-complete image build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInvocation {
    pub bundle: String,
    pub description: String,
    pub image_dir: PathBuf,
    pub staging: Vec<StagingCommand>,
    pub tool: ToolCommand,
    /// Every file the step reads: copy sources in manifest order, then the
    /// permission table, manifest, security contexts and signing key.
    pub implicit_inputs: Vec<PathBuf>,
    /// Host tools the step runs.
    pub command_deps: Vec<PathBuf>,
    pub output: PathBuf,
    pub fs_config: PathBuf,
    pub fingerprint: PathBuf,
}

impl BuildInvocation {
    pub fn compile(
        bundle: &str,
        plan: &LayoutPlan,
        metadata: &ImageMetadata,
        paths: &BundlePaths,
        config: &BuildConfig,
    ) -> Self {
        let image_dir = paths.image_dir.clone();

        let mut staging = vec![StagingCommand::ResetDir {
            path: image_dir.clone(),
        }];
        let mut created: BTreeSet<PathBuf> = BTreeSet::new();
        for entry in &plan.copy_manifest {
            let destination = image_dir.join(&entry.destination);
            if let Some(parent) = entry.destination.parent() {
                if !parent.as_os_str().is_empty() && created.insert(parent.to_path_buf()) {
                    staging.push(StagingCommand::CreateDir {
                        path: image_dir.join(parent),
                    });
                }
            }
            staging.push(StagingCommand::Copy {
                source: entry.source.clone(),
                destination,
            });
        }

        let mut implicit_inputs: Vec<PathBuf> =
            plan.copy_manifest.sources().map(Path::to_path_buf).collect();
        implicit_inputs.extend([
            paths.fs_config.clone(),
            metadata.manifest.clone(),
            metadata.file_contexts.clone(),
            config.signing_key.clone(),
        ]);

        let command_deps = COMMAND_DEPS.iter().map(|tool| config.host_tool(tool)).collect();

        let path_arg = |p: &Path| p.to_string_lossy().into_owned();
        let tool = ToolCommand {
            program: config.host_tool(APEXER),
            args: vec![
                "--verbose".to_string(),
                "--force".to_string(),
                "--manifest".to_string(),
                path_arg(&metadata.manifest),
                "--file_contexts".to_string(),
                path_arg(&metadata.file_contexts),
                "--canned_fs_config".to_string(),
                path_arg(&paths.fs_config),
                "--key".to_string(),
                path_arg(&config.signing_key),
                path_arg(&image_dir),
                path_arg(&paths.output),
            ],
            env: BTreeMap::from([(TOOL_PATH_ENV.to_string(), config.tool_path_string())]),
        };

        Self {
            bundle: bundle.to_string(),
            description: format!(
                "APEX {} => {}",
                image_dir.display(),
                paths.output.display()
            ),
            image_dir,
            staging,
            tool,
            implicit_inputs,
            command_deps,
            output: paths.output.clone(),
            fs_config: paths.fs_config.clone(),
            fingerprint: paths.fingerprint.clone(),
        }
    }

    /// Files the image tree is expected to contain, relative to its root.
    pub fn staged_files(&self) -> impl Iterator<Item = &Path> {
        self.staging.iter().filter_map(|cmd| match cmd {
            StagingCommand::Copy { destination, .. } => destination.strip_prefix(&self.image_dir).ok(),
            _ => None,
        })
    }

    /// The whole step as one shell command.
    pub fn command_line(&self) -> String {
        let mut staging = self.staging.iter();
        let reset = staging
            .next()
            .map(StagingCommand::to_shell)
            .unwrap_or_else(|| "true".to_string());
        let copies: Vec<String> = staging.map(StagingCommand::to_shell).collect();
        let copies = if copies.is_empty() {
            "true".to_string()
        } else {
            copies.join(" && ")
        };
        format!("{reset} && ({copies}) && {}", self.tool.to_shell())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| BundleError::Serialize {
            what: "build invocation",
            source,
        })
    }

    /// A ninja `build` edge for this step, using [`NINJA_RULE`].
    pub fn ninja_build_edge(&self) -> String {
        let mut out = format!(
            "build {}: {NINJA_RULE_NAME} |",
            ninja_escape_path(&self.output)
        );
        for path in self.implicit_inputs.iter().chain(&self.command_deps) {
            out.push(' ');
            out.push_str(&ninja_escape_path(path));
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "  command = {}", self.command_line().replace('$', "$$"));
        let _ = writeln!(out, "  description = {}", self.description.replace('$', "$$"));
        out
    }
}

/// Quote `value` for `sh` unless it only holds characters that need none.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+@,%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

fn ninja_escape_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('$', "$$")
        .replace(' ', "$ ")
        .replace(':', "$:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Arch, ArchType};
    use crate::layout::{plan_layout, ResolvedArtifact};

    fn config() -> BuildConfig {
        BuildConfig::new("/src")
    }

    fn compile(artifacts: &[ResolvedArtifact]) -> BuildInvocation {
        let config = config();
        let plan = plan_layout(artifacts).unwrap();
        let metadata = ImageMetadata::new(
            &plan,
            PathBuf::from("/src/art/file_contexts"),
            PathBuf::from("/src/art/manifest.json"),
        );
        let paths = BundlePaths::new(&config, "com.android.art", "com.android.art.apex");
        BuildInvocation::compile("com.android.art", &plan, &metadata, &paths, &config)
    }

    fn libs() -> Vec<ResolvedArtifact> {
        vec![
            ResolvedArtifact::SharedLib {
                name: "libc".into(),
                output: PathBuf::from("/src/out/arm64/libc.so"),
                arch: Arch::native(ArchType::Arm64),
            },
            ResolvedArtifact::SharedLib {
                name: "libm".into(),
                output: PathBuf::from("/src/out/arm64/libm.so"),
                arch: Arch::native(ArchType::Arm64),
            },
            ResolvedArtifact::Executable {
                name: "dex2oat".into(),
                output: PathBuf::from("/src/out/dex2oat"),
            },
        ]
    }

    #[test]
    fn test_paths_layout() {
        let paths = BundlePaths::new(&config(), "com.android.art", "com.android.art.apex");
        let root = PathBuf::from("/src/out/soong/bundles/com.android.art");
        assert_eq!(paths.image_dir, root.join("image"));
        assert_eq!(paths.fs_config, root.join("canned_fs_config"));
        assert_eq!(paths.output, root.join("com.android.art.apex"));
        assert_eq!(paths.fingerprint, root.join(".com.android.art-inputs.hash"));
    }

    #[test]
    fn test_staging_creates_each_dir_once_before_copy() {
        let invocation = compile(&libs());
        let image = &invocation.image_dir;

        assert_eq!(
            invocation.staging,
            vec![
                StagingCommand::ResetDir { path: image.clone() },
                StagingCommand::CreateDir {
                    path: image.join("lib64")
                },
                StagingCommand::Copy {
                    source: PathBuf::from("/src/out/arm64/libc.so"),
                    destination: image.join("lib64/libc.so"),
                },
                StagingCommand::Copy {
                    source: PathBuf::from("/src/out/arm64/libm.so"),
                    destination: image.join("lib64/libm.so"),
                },
                StagingCommand::CreateDir {
                    path: image.join("bin")
                },
                StagingCommand::Copy {
                    source: PathBuf::from("/src/out/dex2oat"),
                    destination: image.join("bin/dex2oat"),
                },
            ]
        );
        let staged: Vec<&Path> = invocation.staged_files().collect();
        assert_eq!(
            staged,
            vec![
                Path::new("lib64/libc.so"),
                Path::new("lib64/libm.so"),
                Path::new("bin/dex2oat")
            ]
        );
    }

    #[test]
    fn test_inputs_cover_everything_read() {
        let invocation = compile(&libs());

        for cmd in &invocation.staging {
            if let StagingCommand::Copy { source, .. } = cmd {
                assert!(invocation.implicit_inputs.contains(source));
            }
        }
        let tail: Vec<&Path> = invocation.implicit_inputs[3..]
            .iter()
            .map(PathBuf::as_path)
            .collect();
        assert_eq!(
            tail,
            vec![
                Path::new("/src/out/soong/bundles/com.android.art/canned_fs_config"),
                Path::new("/src/art/manifest.json"),
                Path::new("/src/art/file_contexts"),
                Path::new("/src/system/apex/apexer/testdata/testkey.pem"),
            ]
        );
    }

    #[test]
    fn test_command_deps_in_host_bin() {
        let invocation = compile(&libs());
        assert_eq!(invocation.command_deps.len(), COMMAND_DEPS.len());
        for dep in &invocation.command_deps {
            assert!(dep.starts_with("/src/out/soong/host/linux-x86/bin"));
        }
        assert_eq!(
            invocation.tool.program,
            PathBuf::from("/src/out/soong/host/linux-x86/bin/apexer")
        );
    }

    #[test]
    fn test_command_line_shape() {
        let invocation = compile(&libs()[2..]);
        let image = "/src/out/soong/bundles/com.android.art/image";
        let expected = format!(
            "rm -rf {image} && mkdir -p {image} && \
             (mkdir -p {image}/bin && cp /src/out/dex2oat {image}/bin/dex2oat) && \
             APEXER_TOOL_PATH=/src/out/soong/host/linux-x86/bin:/src/prebuilts/sdk/tools/linux-x86/bin \
             /src/out/soong/host/linux-x86/bin/apexer --verbose --force \
             --manifest /src/art/manifest.json --file_contexts /src/art/file_contexts \
             --canned_fs_config /src/out/soong/bundles/com.android.art/canned_fs_config \
             --key /src/system/apex/apexer/testdata/testkey.pem \
             {image} /src/out/soong/bundles/com.android.art/com.android.art.apex"
        );
        assert_eq!(invocation.command_line(), expected);
        assert_eq!(
            invocation.description,
            format!("APEX {image} => /src/out/soong/bundles/com.android.art/com.android.art.apex")
        );
    }

    #[test]
    fn test_empty_layout_still_valid_shell() {
        let invocation = compile(&[]);
        assert!(invocation.command_line().contains("&& (true) &&"));
        assert_eq!(invocation.implicit_inputs.len(), 4);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/a/b.so"), "/a/b.so");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_json_export() {
        let invocation = compile(&libs());
        let json: serde_json::Value = serde_json::from_str(&invocation.to_json().unwrap()).unwrap();

        assert_eq!(json["bundle"], "com.android.art");
        assert_eq!(json["staging"][0]["op"], "reset_dir");
        assert_eq!(json["staging"][2]["op"], "copy");
        assert_eq!(json["tool"]["env"]["APEXER_TOOL_PATH"], config().tool_path_string());
    }

    #[test]
    fn test_ninja_build_edge() {
        let invocation = compile(&libs());
        let edge = invocation.ninja_build_edge();
        let first = edge.lines().next().unwrap();

        assert!(first.starts_with(
            "build /src/out/soong/bundles/com.android.art/com.android.art.apex: apex | /src/out/arm64/libc.so"
        ));
        assert!(first.ends_with("/src/out/soong/host/linux-x86/bin/aapt2"));
        assert!(edge.contains("\n  command = rm -rf "));
        assert!(edge.contains("\n  description = APEX "));
    }
}
